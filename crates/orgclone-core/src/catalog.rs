//! Built-in schema catalogs.
//!
//! `commerce_registry` covers the commercial graph (sub-types, products,
//! pricing plans, features and their links). `site_registry` adds the
//! website content tables that are copied alongside it when a whole site
//! is duplicated.

use serde_json::{json, Value as JsonValue};

use crate::error::Result;
use crate::models::EntityTypeDescriptor;
use crate::registry::{RegistryBuilder, SchemaRegistry};

/// Quantity written into every cloned inventory row.
pub const CLONED_INVENTORY_QUANTITY: i64 = 100;

/// Names accepted by [`registry_by_name`].
pub const CATALOG_NAMES: &[&str] = &["commerce", "site"];

fn commerce_types(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(EntityTypeDescriptor::new("product_sub_type"))
        .register(EntityTypeDescriptor::new("course").reference_only())
        .register(EntityTypeDescriptor::new("quiz").reference_only())
        .register(
            EntityTypeDescriptor::new("product")
                .hard_fk("product_sub_type_id", "product_sub_type")
                .soft_fk("course_connected_id", "course", true)
                .soft_fk("quiz_id", "quiz", true)
                .exclude("stripe_product_id"),
        )
        .register(EntityTypeDescriptor::new("feature"))
        .register(
            EntityTypeDescriptor::new("pricingplan")
                .hard_fk("product_id", "product")
                .exclude("stripe_price_id"),
        )
        .register(
            EntityTypeDescriptor::new("pricingplan_features")
                .scoped_by_parent("pricingplan_id", "pricingplan")
                .hard_fk("feature_id", "feature"),
        )
        .register(
            EntityTypeDescriptor::new("inventory")
                .scoped_by_parent("pricing_plan_id", "pricingplan")
                .override_field("quantity", json!(CLONED_INVENTORY_QUANTITY)),
        )
}

fn site_types(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(
            EntityTypeDescriptor::new("settings")
                .name_from_target("site")
                .override_field("domain", JsonValue::Null)
                .default_to_target_name("seo_title"),
        )
        .register(
            EntityTypeDescriptor::new("website_hero")
                .name_from_target("name")
                .default_to_target_name("seo_title"),
        )
        .register(EntityTypeDescriptor::new("menu_items"))
        .register(EntityTypeDescriptor::new("banners"))
        .register(EntityTypeDescriptor::new("blog_post"))
        .register(EntityTypeDescriptor::new("faq"))
        .register(EntityTypeDescriptor::new("website_menuitem"))
        .register(
            EntityTypeDescriptor::new("website_submenuitem")
                .hard_fk("menu_item_id", "website_menuitem"),
        )
        .register(EntityTypeDescriptor::new("website_templatesection"))
        .register(EntityTypeDescriptor::new("website_templatesectionheading"))
        .register(EntityTypeDescriptor::new("pages"))
        .register(EntityTypeDescriptor::new("website_brand"))
        .register(EntityTypeDescriptor::new("pricingplan_comparison"))
        .register(EntityTypeDescriptor::new("website_metric"))
        .register(
            EntityTypeDescriptor::new("website_templatesection_metrics")
                .scoped_by_parent("templatesection_id", "website_templatesection")
                .hard_fk("metric_id", "website_metric"),
        )
}

/// Registry for the commercial data graph only.
pub fn commerce_registry() -> Result<SchemaRegistry> {
    commerce_types(SchemaRegistry::builder()).build()
}

/// Registry for a full site duplicate: commerce plus website content.
pub fn site_registry() -> Result<SchemaRegistry> {
    site_types(commerce_types(SchemaRegistry::builder())).build()
}

/// Resolve a catalog by its CLI name.
pub fn registry_by_name(name: &str) -> Option<Result<SchemaRegistry>> {
    match name {
        "commerce" => Some(commerce_registry()),
        "site" => Some(site_registry()),
        _ => None,
    }
}
