//! Entity schema registry.
//!
//! Static catalog of entity types, their keys, tenant scope and foreign-key
//! edges. Built once at startup and shared read-only by every clone job.
//! Registration order is significant: the dependency orderer uses it as the
//! deterministic tie-break.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{EntityTypeDescriptor, ScopeFilter, TenantScope};

/// Builder collecting descriptors in registration order.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: Vec<EntityTypeDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Validation is deferred to [`build`](Self::build).
    pub fn register(mut self, descriptor: EntityTypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate every declaration and freeze the registry.
    ///
    /// Cycles in the hard-FK graph are not rejected here; the dependency
    /// orderer reports them when a job is planned.
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut index = HashMap::with_capacity(self.descriptors.len());
        for (pos, desc) in self.descriptors.iter().enumerate() {
            if desc.name.is_empty() {
                return Err(Error::InvalidRegistry(
                    "Entity type name cannot be empty".to_string(),
                ));
            }
            if desc.primary_key.is_empty() {
                return Err(Error::InvalidRegistry(format!(
                    "Entity type '{}' has no primary key field",
                    desc.name
                )));
            }
            if index.insert(desc.name.clone(), pos).is_some() {
                return Err(Error::InvalidRegistry(format!(
                    "Entity type '{}' registered twice",
                    desc.name
                )));
            }
        }

        for desc in &self.descriptors {
            for fk in &desc.hard_foreign_keys {
                let target = lookup(&self.descriptors, &index, &fk.target)?;
                if target.reference_only {
                    return Err(Error::InvalidRegistry(format!(
                        "{}.{} hard-depends on reference-only type '{}'",
                        desc.name, fk.field, fk.target
                    )));
                }
            }

            for fk in &desc.soft_foreign_keys {
                lookup(&self.descriptors, &index, &fk.target)?;
            }

            // Registered types are tenant-scoped, so passing their ids
            // through would point the clone at the source tenant's rows.
            for shared in &desc.shared_references {
                if let Some(&pos) = index.get(&shared.target) {
                    let kind = if self.descriptors[pos].reference_only {
                        "soft"
                    } else {
                        "hard or soft"
                    };
                    return Err(Error::InvalidRegistry(format!(
                        "{}.{} is declared shared but '{}' is tenant-scoped; declare it as a {} FK",
                        desc.name, shared.field, shared.target, kind
                    )));
                }
            }

            if let TenantScope::Parent { field, parent } = &desc.scope {
                let parent_desc = lookup(&self.descriptors, &index, parent)?;
                if parent_desc.tenant_column().is_none() {
                    return Err(Error::InvalidRegistry(format!(
                        "'{}' is scoped through '{}', which is not column-scoped",
                        desc.name, parent
                    )));
                }
                let declared = desc
                    .hard_foreign_keys
                    .iter()
                    .any(|fk| &fk.field == field && &fk.target == parent);
                if !declared {
                    return Err(Error::InvalidRegistry(format!(
                        "'{}' scope field '{}' must be a hard FK to '{}'",
                        desc.name, field, parent
                    )));
                }
            }
        }

        debug!(
            subsystem = "core",
            component = "registry",
            op = "build",
            entity_types = self.descriptors.len(),
            "Schema registry built"
        );

        Ok(SchemaRegistry {
            descriptors: self.descriptors.into_iter().map(Arc::new).collect(),
            index,
        })
    }
}

fn lookup<'a>(
    descriptors: &'a [EntityTypeDescriptor],
    index: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a EntityTypeDescriptor> {
    index
        .get(name)
        .map(|&pos| &descriptors[pos])
        .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
}

/// Read-only registry of entity type descriptors.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    descriptors: Vec<Arc<EntityTypeDescriptor>>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a descriptor by name.
    ///
    /// `UnknownEntityType` here means a caller asked for a type that was
    /// never declared, which is a programming error.
    pub fn get(&self, name: &str) -> Result<Arc<EntityTypeDescriptor>> {
        self.index
            .get(name)
            .map(|&pos| Arc::clone(&self.descriptors[pos]))
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> &[Arc<EntityTypeDescriptor>] {
        &self.descriptors
    }

    /// Descriptors that take part in cloning, in registration order.
    pub fn cloneable(&self) -> Vec<Arc<EntityTypeDescriptor>> {
        self.descriptors
            .iter()
            .filter(|d| !d.reference_only)
            .cloned()
            .collect()
    }

    /// Registration position, used as the ordering tie-break.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Resolve how rows of `name` are attributed to an organization.
    pub fn scope_filter(&self, name: &str) -> Result<ScopeFilter> {
        let desc = self.get(name)?;
        match &desc.scope {
            TenantScope::Column { field } => Ok(ScopeFilter::Column {
                table: desc.name.clone(),
                primary_key: desc.primary_key.clone(),
                tenant_field: field.clone(),
            }),
            TenantScope::Parent { field, parent } => {
                let parent_desc = self.get(parent)?;
                let parent_tenant_field = parent_desc
                    .tenant_column()
                    .ok_or_else(|| {
                        Error::InvalidRegistry(format!("'{}' is not column-scoped", parent))
                    })?
                    .to_string();
                Ok(ScopeFilter::Parent {
                    table: desc.name.clone(),
                    primary_key: desc.primary_key.clone(),
                    parent_field: field.clone(),
                    parent_table: parent_desc.name.clone(),
                    parent_primary_key: parent_desc.primary_key.clone(),
                    parent_tenant_field,
                })
            }
        }
    }
}
