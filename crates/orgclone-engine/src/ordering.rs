//! Dependency orderer.
//!
//! Topologically sorts entity types over their hard foreign keys so every
//! referenced type is cloned before any type referencing it. Soft FKs only
//! refine placement: a cycle through a soft FK is never an error, since
//! soft references are repaired per row rather than guaranteed to resolve.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use orgclone_core::{EntityTypeDescriptor, Error, Result};

/// Validated clone order for one job.
#[derive(Debug, Clone)]
pub struct DependencyOrder {
    sequence: Vec<Arc<EntityTypeDescriptor>>,
    ranks: Vec<Vec<Arc<EntityTypeDescriptor>>>,
}

impl DependencyOrder {
    /// Types in clone order.
    pub fn sequence(&self) -> &[Arc<EntityTypeDescriptor>] {
        &self.sequence
    }

    /// Types grouped by dependency depth. Types within one rank share no
    /// hard edge and may be cloned concurrently.
    pub fn ranks(&self) -> &[Vec<Arc<EntityTypeDescriptor>>] {
        &self.ranks
    }

    pub fn names(&self) -> Vec<&str> {
        self.sequence.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Edge listing for one type in a [`DependencyOrder`], used by plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderedType {
    pub name: String,
    pub rank: usize,
    pub hard_dependencies: Vec<String>,
    pub soft_references: Vec<String>,
}

impl DependencyOrder {
    pub fn describe(&self) -> Vec<OrderedType> {
        self.ranks
            .iter()
            .enumerate()
            .flat_map(|(rank, types)| {
                types.iter().map(move |d| OrderedType {
                    name: d.name.clone(),
                    rank,
                    hard_dependencies: d.hard_dependencies().map(str::to_string).collect(),
                    soft_references: d
                        .soft_foreign_keys
                        .iter()
                        .map(|fk| format!("{} -> {}", fk.field, fk.target))
                        .collect(),
                })
            })
            .collect()
    }
}

/// Order `descriptors` (given in registration order) by their hard FKs.
///
/// Soft FKs to types in the input also constrain placement, so a soft
/// target is fully cloned (and mapped) in an earlier rank than the type
/// referencing it. A soft edge that would close a cycle is dropped; soft
/// edges never make ordering fail.
///
/// The sequence is rank by rank, ties broken by input position, so the
/// result is deterministic. Fails with `CyclicDependency` naming the types
/// on or between hard-FK cycles, and with `UnknownEntityType` when a hard
/// FK targets a type outside the input.
pub fn order(descriptors: &[Arc<EntityTypeDescriptor>]) -> Result<DependencyOrder> {
    let n = descriptors.len();
    let position: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut dependencies: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for (i, desc) in descriptors.iter().enumerate() {
        for target in desc.hard_dependencies() {
            let j = *position
                .get(target)
                .ok_or_else(|| Error::UnknownEntityType(target.to_string()))?;
            dependencies[i].insert(j);
        }
    }

    if kahn(&dependencies).is_none() {
        let involved = cycle_members(&dependencies);
        let names: Vec<String> = involved
            .into_iter()
            .map(|i| descriptors[i].name.clone())
            .collect();
        debug!(
            subsystem = "engine",
            component = "orderer",
            cycle = ?names,
            "Hard foreign-key graph is cyclic"
        );
        return Err(Error::CyclicDependency(names));
    }

    for (i, desc) in descriptors.iter().enumerate() {
        for fk in &desc.soft_foreign_keys {
            let Some(&j) = position.get(fk.target.as_str()) else {
                continue;
            };
            if j == i || depends_on(&dependencies, j, i) {
                debug!(
                    subsystem = "engine",
                    component = "orderer",
                    entity_type = %desc.name,
                    field = %fk.field,
                    target = %fk.target,
                    "Soft reference would close a cycle, not used for ordering"
                );
                continue;
            }
            dependencies[i].insert(j);
        }
    }

    let topo = kahn(&dependencies).ok_or_else(|| {
        Error::Internal("soft references introduced a dependency cycle".to_string())
    })?;

    let mut rank = vec![0usize; n];
    for &i in &topo {
        rank[i] = dependencies[i]
            .iter()
            .map(|&j| rank[j] + 1)
            .max()
            .unwrap_or(0);
    }
    let depth = topo.iter().map(|&i| rank[i] + 1).max().unwrap_or(0);
    let mut ranks: Vec<Vec<Arc<EntityTypeDescriptor>>> = vec![Vec::new(); depth];
    for i in 0..n {
        ranks[rank[i]].push(Arc::clone(&descriptors[i]));
    }

    let sequence: Vec<Arc<EntityTypeDescriptor>> = ranks.iter().flatten().cloned().collect();

    debug!(
        subsystem = "engine",
        component = "orderer",
        op = "order",
        entity_types = n,
        ranks = depth,
        "Dependency order computed"
    );

    Ok(DependencyOrder { sequence, ranks })
}

/// Kahn's algorithm with a min-heap ready queue. `None` on a cycle.
fn kahn(dependencies: &[HashSet<usize>]) -> Option<Vec<usize>> {
    let n = dependencies.len();
    let dependents = dependents_of(dependencies);
    let mut in_degree: Vec<usize> = dependencies.iter().map(HashSet::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();

    let mut placed = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        placed.push(i);
        for &k in &dependents[i] {
            in_degree[k] -= 1;
            if in_degree[k] == 0 {
                ready.push(Reverse(k));
            }
        }
    }
    (placed.len() == n).then_some(placed)
}

fn dependents_of(dependencies: &[HashSet<usize>]) -> Vec<Vec<usize>> {
    let mut dependents = vec![Vec::new(); dependencies.len()];
    for (i, deps) in dependencies.iter().enumerate() {
        for &j in deps {
            dependents[j].push(i);
        }
    }
    dependents
}

/// True when `from` transitively depends on `to`.
fn depends_on(dependencies: &[HashSet<usize>], from: usize, to: usize) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(i) = stack.pop() {
        if i == to {
            return true;
        }
        if seen.insert(i) {
            stack.extend(dependencies[i].iter().copied());
        }
    }
    false
}

/// Nodes that never become ready, minus those nothing else left depends
/// on. What remains lies on a cycle or between two cycles.
fn cycle_members(dependencies: &[HashSet<usize>]) -> Vec<usize> {
    let dependents = dependents_of(dependencies);
    let mut remaining: HashSet<usize> = (0..dependencies.len()).collect();

    // Peel off nodes whose dependencies are all gone (Kahn's pass).
    loop {
        let roots: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| !dependencies[i].iter().any(|j| remaining.contains(j)))
            .collect();
        if roots.is_empty() {
            break;
        }
        for root in roots {
            remaining.remove(&root);
        }
    }

    loop {
        let leaves: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| !dependents[i].iter().any(|k| remaining.contains(k)))
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(&leaf);
        }
    }

    let mut members: Vec<usize> = remaining.into_iter().collect();
    members.sort_unstable();
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclone_core::{commerce_registry, site_registry};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn desc(name: &str, deps: &[&str]) -> Arc<EntityTypeDescriptor> {
        let mut d = EntityTypeDescriptor::new(name);
        for dep in deps {
            d = d.hard_fk(format!("{}_id", dep), *dep);
        }
        Arc::new(d)
    }

    fn assert_topological(order: &DependencyOrder) {
        let names = order.names();
        for (i, d) in order.sequence().iter().enumerate() {
            for dep in d.hard_dependencies() {
                let j = names.iter().position(|n| *n == dep).unwrap();
                assert!(j < i, "{} placed before its dependency {}", d.name, dep);
            }
        }
    }

    #[test]
    fn test_dependency_precedes_dependant() {
        let types = vec![desc("product", &["product_sub_type"]), desc("product_sub_type", &[])];
        let order = order(&types).unwrap();
        assert_eq!(order.names(), vec!["product_sub_type", "product"]);
    }

    #[test]
    fn test_tie_break_by_registration_order() {
        let types = vec![desc("faq", &[]), desc("banners", &[]), desc("pages", &[])];
        let order = order(&types).unwrap();
        assert_eq!(order.names(), vec!["faq", "banners", "pages"]);
    }

    #[test]
    fn test_sequence_runs_rank_by_rank() {
        // c is independent of a, so it shares a's rank and runs before b.
        let types = vec![desc("a", &[]), desc("b", &["a"]), desc("c", &[])];
        let order = order(&types).unwrap();
        assert_eq!(order.names(), vec!["a", "c", "b"]);

        let flattened: Vec<&str> = order
            .ranks()
            .iter()
            .flatten()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(flattened, order.names());
    }

    #[test]
    fn test_soft_target_runs_in_earlier_rank() {
        let types = vec![
            Arc::new(
                EntityTypeDescriptor::new("product").soft_fk("course_connected_id", "course", true),
            ),
            desc("course", &[]),
        ];
        let order = order(&types).unwrap();
        assert_eq!(order.names(), vec!["course", "product"]);
        assert_eq!(order.ranks().len(), 2);
    }

    #[test]
    fn test_soft_cycle_is_not_an_error() {
        // course hard-depends on product; product's soft FK back to course
        // cannot be honored and is left out of the order.
        let types = vec![
            Arc::new(
                EntityTypeDescriptor::new("product").soft_fk("course_connected_id", "course", true),
            ),
            desc("course", &["product"]),
            Arc::new(EntityTypeDescriptor::new("menu").soft_fk("parent_id", "menu", false)),
        ];
        let order = order(&types).unwrap();
        assert_eq!(order.names(), vec!["product", "menu", "course"]);
        assert_topological(&order);
    }

    #[test]
    fn test_diamond_ranks() {
        let types = vec![
            desc("plan_feature", &["plan", "feature"]),
            desc("plan", &["product"]),
            desc("feature", &[]),
            desc("product", &[]),
        ];
        let order = order(&types).unwrap();
        assert_topological(&order);

        let ranks: Vec<Vec<&str>> = order
            .ranks()
            .iter()
            .map(|r| r.iter().map(|d| d.name.as_str()).collect())
            .collect();
        assert_eq!(
            ranks,
            vec![vec!["feature", "product"], vec!["plan"], vec!["plan_feature"]]
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let types = vec![
            desc("standalone", &[]),
            desc("a", &["b"]),
            desc("b", &["a"]),
            desc("downstream", &["a"]),
        ];
        let err = order(&types).unwrap_err();
        match err {
            Error::CyclicDependency(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let types = vec![desc("menu", &["menu"])];
        let err = order(&types).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(names) if names == vec!["menu"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let types = vec![desc("product", &["missing"])];
        let err = order(&types).unwrap_err();
        assert!(matches!(err, Error::UnknownEntityType(name) if name == "missing"));
    }

    #[test]
    fn test_empty_input() {
        let order = order(&[]).unwrap();
        assert!(order.is_empty());
        assert!(order.ranks().is_empty());
    }

    #[test]
    fn test_builtin_catalogs_are_acyclic() {
        for registry in [commerce_registry().unwrap(), site_registry().unwrap()] {
            let order = order(&registry.cloneable()).unwrap();
            assert_eq!(order.len(), registry.cloneable().len());
            assert_topological(&order);
        }
    }

    #[test]
    fn test_commerce_sequence() {
        let registry = commerce_registry().unwrap();
        let order = order(&registry.cloneable()).unwrap();
        assert_eq!(
            order.names(),
            vec![
                "product_sub_type",
                "feature",
                "product",
                "pricingplan",
                "pricingplan_features",
                "inventory",
            ]
        );
    }

    #[test]
    fn test_generated_acyclic_graphs() {
        let mut rng = StdRng::seed_from_u64(0x0c10_e5ee);
        for _ in 0..200 {
            let n = rng.gen_range(1..16);
            // Edges only point at lower indices, so the hard graph is acyclic.
            let mut types: Vec<EntityTypeDescriptor> = (0..n)
                .map(|i| EntityTypeDescriptor::new(format!("t{i}")))
                .collect();
            for i in 1..n {
                for j in 0..i {
                    if rng.gen_bool(0.2) {
                        types[i] = types[i].clone().hard_fk(format!("t{j}_id"), format!("t{j}"));
                    }
                }
                for j in 0..n {
                    if rng.gen_bool(0.1) {
                        types[i] = types[i]
                            .clone()
                            .soft_fk(format!("t{j}_ref"), format!("t{j}"), false);
                    }
                }
            }
            let mut types: Vec<Arc<EntityTypeDescriptor>> = types.into_iter().map(Arc::new).collect();
            // Registration order is not topological order.
            types.reverse();

            let order = order(&types).unwrap();
            assert_eq!(order.len(), n);
            assert_topological(&order);

            let rank_of: HashMap<String, usize> = order
                .describe()
                .into_iter()
                .map(|t| (t.name, t.rank))
                .collect();
            for d in order.sequence() {
                for dep in d.hard_dependencies() {
                    assert!(rank_of[dep] < rank_of[&d.name]);
                }
            }
        }
    }

    #[test]
    fn test_describe_lists_edges() {
        let registry = commerce_registry().unwrap();
        let order = order(&registry.cloneable()).unwrap();
        let described = order.describe();
        let product = described.iter().find(|t| t.name == "product").unwrap();
        assert_eq!(product.rank, 1);
        assert_eq!(product.hard_dependencies, vec!["product_sub_type"]);
        assert_eq!(
            product.soft_references,
            vec!["course_connected_id -> course", "quiz_id -> quiz"]
        );
    }
}
