//! PostgreSQL clone tests.
//!
//! These need a running database (`DATABASE_URL` or the fixture default)
//! and are ignored by default. Run with `cargo test -p orgclone-db -- --ignored`.

use std::sync::Arc;

use orgclone_core::{
    commerce_registry, EntityCloneStatus, Error, RecordId, RepairKind, RowErrorKind, ScopeFilter,
    SourceSnapshotReader,
};
use orgclone_db::test_fixtures::TestDatabase;
use orgclone_engine::CloneOrchestrator;
use sqlx::PgPool;
use uuid::Uuid;

fn orchestrator(test_db: &TestDatabase) -> CloneOrchestrator {
    let store = Arc::new(test_db.store.clone());
    CloneOrchestrator::new(Arc::new(commerce_registry().unwrap()), store.clone(), store)
}

async fn exec(pool: &PgPool, sql: &str, org: Uuid) {
    sqlx::query(sql)
        .bind(org)
        .execute(pool)
        .await
        .unwrap_or_else(|e| panic!("seed failed: {e}\n{sql}"));
}

/// Two sub-types, two products, three features, two plans with links and
/// inventory. Product 101 links course 7 (same tenant), product 100 links
/// course 8 (another tenant).
async fn seed_commerce(pool: &PgPool, org: Uuid, other: Uuid) {
    exec(pool, "INSERT INTO course (id, organization_id, title) VALUES (8, $1, 'Elsewhere')", other).await;
    exec(pool, "INSERT INTO course (id, organization_id, title) VALUES (7, $1, 'Intro')", org).await;
    exec(
        pool,
        "INSERT INTO product_sub_type (id, organization_id, name) VALUES (10, $1, 'Digital'), (11, $1, 'Physical')",
        org,
    )
    .await;
    exec(
        pool,
        "INSERT INTO product (id, organization_id, product_sub_type_id, course_connected_id, name, slug, metadata, stripe_product_id) VALUES \
         (100, $1, 10, 8, 'Pro', 'pro', '{\"tier\": 2}', 'prod_pro'), \
         (101, $1, 11, 7, 'Basic', 'basic', NULL, 'prod_basic')",
        org,
    )
    .await;
    exec(
        pool,
        "INSERT INTO feature (id, organization_id, name) VALUES (20, $1, 'Support'), (21, $1, 'Downloads'), (22, $1, 'API')",
        org,
    )
    .await;
    exec(
        pool,
        "INSERT INTO pricingplan (id, organization_id, product_id, name, price, stripe_price_id) VALUES \
         (30, $1, 100, 'Monthly', 19.99, 'price_m'), (31, $1, 101, 'Yearly', 199.00, 'price_y')",
        org,
    )
    .await;
    sqlx::query(
        "INSERT INTO pricingplan_features (id, pricingplan_id, feature_id) VALUES (40, 30, 20), (41, 30, 21), (42, 31, 22)",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO inventory (id, pricing_plan_id, quantity) VALUES (50, 30, 3), (51, 31, 0)")
        .execute(pool)
        .await
        .unwrap();
}

async fn count(pool: &PgPool, sql: &str, org: Uuid) -> i64 {
    sqlx::query_scalar(sql).bind(org).fetch_one(pool).await.unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_clone_commerce_catalog() {
    let test_db = TestDatabase::new().await;
    let source = test_db.create_organization("Source").await;
    let other = test_db.create_organization("Other").await;
    let target = test_db.create_organization("Target").await;
    seed_commerce(&test_db.pool, source, other).await;

    let report = orchestrator(&test_db).clone(source, target).await.unwrap();
    assert!(report.success, "{:#?}", report.results);
    assert_eq!(report.total_inserted(), 2 + 2 + 3 + 2 + 3 + 2);

    let pool = &test_db.pool;
    assert_eq!(
        count(pool, "SELECT count(*) FROM product WHERE organization_id = $1", target).await,
        2
    );
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM product WHERE organization_id = $1 AND stripe_product_id IS NOT NULL",
            target
        )
        .await,
        0
    );
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM product WHERE organization_id = $1 AND metadata->>'tier' = '2'",
            target
        )
        .await,
        1
    );

    // Every cloned product points at a cloned sub-type.
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM product p JOIN product_sub_type s ON p.product_sub_type_id = s.id \
             WHERE p.organization_id = $1 AND s.organization_id = $1",
            target
        )
        .await,
        2
    );

    // Links and inventory hang off the cloned plans only.
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM pricingplan_features l \
             JOIN pricingplan pp ON l.pricingplan_id = pp.id \
             JOIN feature f ON l.feature_id = f.id \
             WHERE pp.organization_id = $1 AND f.organization_id = $1",
            target
        )
        .await,
        3
    );
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM inventory i JOIN pricingplan pp ON i.pricing_plan_id = pp.id \
             WHERE pp.organization_id = $1 AND i.quantity = 100",
            target
        )
        .await,
        2
    );

    // Courses are never cloned: both links are nulled, for different reasons.
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM product WHERE organization_id = $1 AND course_connected_id IS NULL",
            target
        )
        .await,
        2
    );
    let repairs = &report.result("product").unwrap().repaired_references;
    assert_eq!(repairs.len(), 2);
    let kind_of = |id: i64| {
        repairs
            .iter()
            .find(|r| r.source_id == Some(RecordId::Int(id)))
            .map(|r| r.kind)
    };
    assert_eq!(kind_of(100), Some(RepairKind::DanglingReference));
    assert_eq!(kind_of(101), Some(RepairKind::OutsideCloneScope));

    // Source rows are untouched.
    assert_eq!(
        count(
            pool,
            "SELECT count(*) FROM inventory i JOIN pricingplan pp ON i.pricing_plan_id = pp.id \
             WHERE pp.organization_id = $1 AND i.quantity <> 100",
            source
        )
        .await,
        2
    );

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_duplicate_slug_fails_row_and_dependants() {
    let test_db = TestDatabase::new().await;
    let source = test_db.create_organization("Source").await;
    let other = test_db.create_organization("Other").await;
    let target = test_db.create_organization("Target").await;
    seed_commerce(&test_db.pool, source, other).await;
    exec(
        &test_db.pool,
        "INSERT INTO product (organization_id, name, slug) VALUES ($1, 'Existing', 'pro')",
        target,
    )
    .await;

    let report = orchestrator(&test_db).clone(source, target).await.unwrap();
    assert!(!report.success);

    let products = report.result("product").unwrap();
    assert_eq!(products.status, EntityCloneStatus::PartiallyCompleted);
    assert_eq!(products.inserted_count, 1);
    assert_eq!(products.failed_rows[0].source_id, Some(RecordId::Int(100)));
    assert_eq!(products.failed_rows[0].kind, RowErrorKind::Duplicate);

    let plans = report.result("pricingplan").unwrap();
    assert_eq!(plans.inserted_count, 1);
    assert_eq!(plans.failed_rows[0].source_id, Some(RecordId::Int(30)));
    assert_eq!(plans.failed_rows[0].kind, RowErrorKind::UnresolvedReference);

    // Plan 30's children are outside the clone now.
    let links = report.result("pricingplan_features").unwrap();
    assert_eq!(links.inserted_count, 1);
    assert_eq!(links.failed_rows.len(), 2);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_missing_target_writes_nothing() {
    let test_db = TestDatabase::new().await;
    let source = test_db.create_organization("Source").await;
    let other = test_db.create_organization("Other").await;
    seed_commerce(&test_db.pool, source, other).await;
    let missing = Uuid::new_v4();

    let err = orchestrator(&test_db).clone(source, missing).await.unwrap_err();
    assert!(matches!(err, Error::OrganizationNotFound(id) if id == missing));

    let products: i64 = sqlx::query_scalar("SELECT count(*) FROM product")
        .fetch_one(&test_db.pool)
        .await
        .unwrap();
    assert_eq!(products, 2);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_fetch_rows_through_parent_in_key_order() {
    let test_db = TestDatabase::new().await;
    let source = test_db.create_organization("Source").await;
    let other = test_db.create_organization("Other").await;
    seed_commerce(&test_db.pool, source, other).await;

    let scope = ScopeFilter::Parent {
        table: "pricingplan_features".to_string(),
        primary_key: "id".to_string(),
        parent_field: "pricingplan_id".to_string(),
        parent_table: "pricingplan".to_string(),
        parent_primary_key: "id".to_string(),
        parent_tenant_field: "organization_id".to_string(),
    };
    let rows = test_db.store.fetch_rows(&scope, source).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![40, 41, 42]);

    assert!(test_db
        .store
        .row_in_tenant(&scope, &RecordId::Int(41), source)
        .await
        .unwrap());
    assert!(test_db.store.fetch_rows(&scope, other).await.unwrap().is_empty());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_numeric_precision_survives_clone() {
    let test_db = TestDatabase::new().await;
    let source = test_db.create_organization("Source").await;
    let target = test_db.create_organization("Target").await;
    exec(
        &test_db.pool,
        "INSERT INTO product (id, organization_id, name, slug) VALUES (100, $1, 'Pro', 'pro')",
        source,
    )
    .await;
    exec(
        &test_db.pool,
        "INSERT INTO pricingplan (id, organization_id, product_id, name, price) VALUES \
         (30, $1, 100, 'Wholesale', 12345678901234.123457)",
        source,
    )
    .await;

    let scope = ScopeFilter::Column {
        table: "pricingplan".to_string(),
        primary_key: "id".to_string(),
        tenant_field: "organization_id".to_string(),
    };
    let rows = test_db.store.fetch_rows(&scope, source).await.unwrap();
    assert_eq!(rows[0]["price"], "12345678901234.123457");

    let report = orchestrator(&test_db).clone(source, target).await.unwrap();
    assert!(report.success, "{:#?}", report.results);

    let price: String =
        sqlx::query_scalar("SELECT price::text FROM pricingplan WHERE organization_id = $1")
            .bind(target)
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
    assert_eq!(price, "12345678901234.123457");

    test_db.cleanup().await;
}
