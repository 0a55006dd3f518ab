//! End-to-end visibility scenarios through the engine over the in-memory
//! store.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use visibility_core::caller::{CallerContext, PERM_VIEW_ALL_SECTORS, ROLE_ADMIN};
use visibility_core::compiler::CompiledQuery;
use visibility_core::error::VisibilityError;
use visibility_core::memory::{MemoryStore, StaticReferenceLookup, StaticScopeLookup};
use visibility_core::policy::VisibilityLevel;
use visibility_core::schema::MergeMode;
use visibility_core::scope::VisibilityScope;
use visibility_core::types::{Pagination, Row};
use visibility_engine::{EngineConfig, EntityKind, VisibilityEngine};

fn row(v: serde_json::Value) -> Row {
    v.as_object().cloned().expect("fixture rows are objects")
}

fn ids(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn engine(
    store: Arc<MemoryStore>,
    scopes: StaticScopeLookup,
    refs: StaticReferenceLookup,
    config: EngineConfig,
) -> VisibilityEngine {
    VisibilityEngine::new(store, Arc::new(scopes), Arc::new(refs), config)
}

fn national_refs(members: &[Uuid]) -> StaticReferenceLookup {
    StaticReferenceLookup::new(Some(Uuid::new_v4()), members.iter().copied().collect())
}

#[tokio::test]
async fn national_sectoral_caller_sees_only_own_sector_newest_first() {
    let (s1, s2, m1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let caller = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    store
        .insert(
            "challenges",
            [
                row(json!({"id": "c1", "sector_id": s1, "municipality_id": m1, "is_published": false, "is_deleted": false, "created_at": "2025-01-01T00:00:00Z"})),
                row(json!({"id": "c2", "sector_id": s2, "municipality_id": m1, "is_published": true, "is_deleted": false, "created_at": "2025-01-02T00:00:00Z"})),
                row(json!({"id": "c3", "sector_id": s1, "municipality_id": m1, "is_published": true, "is_deleted": false, "created_at": "2025-01-03T00:00:00Z"})),
                row(json!({"id": "c4", "sector_id": s1, "municipality_id": m1, "is_published": true, "is_deleted": true, "created_at": "2025-01-04T00:00:00Z"})),
            ],
        )
        .await;
    let scopes = StaticScopeLookup::default().with(
        caller,
        VisibilityScope {
            is_national: true,
            sector_ids: BTreeSet::from([s1]),
            home_jurisdiction_id: None,
        },
    );
    let engine = engine(store, scopes, national_refs(&[]), EngineConfig::uncached());
    let ctx = CallerContext::new(caller, vec![]);

    assert_eq!(engine.policy_for(&ctx).await.level, VisibilityLevel::Sectoral);
    let result = engine
        .fetch_for(&ctx, &EntityKind::Challenges.query())
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec!["c3", "c1"]);
}

async fn pilots_store(disjunction: bool, m1: Uuid, m9: Uuid, m2: Uuid) -> Arc<MemoryStore> {
    let store = if disjunction {
        MemoryStore::new()
    } else {
        MemoryStore::without_disjunction()
    };
    store
        .insert(
            "pilots",
            [
                row(json!({"id": "p1", "municipality_id": m1, "stage": "draft", "is_deleted": null, "created_at": "2025-02-01T00:00:00Z"})),
                row(json!({"id": "p2", "municipality_id": m9, "stage": "active", "is_deleted": false, "created_at": "2025-02-02T00:00:00Z"})),
                row(json!({"id": "p3", "municipality_id": m2, "stage": "active", "is_deleted": false, "created_at": "2025-02-03T00:00:00Z"})),
            ],
        )
        .await;
    Arc::new(store)
}

#[tokio::test]
async fn geographic_caller_sees_home_and_national_rows() {
    let (m1, m9, m2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let caller = Uuid::new_v4();

    for disjunction in [true, false] {
        let store = pilots_store(disjunction, m1, m9, m2).await;
        let scopes = StaticScopeLookup::default().with(
            caller,
            VisibilityScope {
                is_national: false,
                sector_ids: BTreeSet::new(),
                home_jurisdiction_id: Some(m1),
            },
        );
        let engine = engine(store, scopes, national_refs(&[m9]), EngineConfig::uncached());
        let result = engine
            .fetch_for(
                &CallerContext::new(caller, vec![]),
                &EntityKind::Pilots.query().with_count(),
            )
            .await
            .unwrap();

        let got: BTreeSet<_> = ids(&result.rows).into_iter().collect();
        assert_eq!(got, BTreeSet::from(["p1".to_string(), "p2".to_string()]));
        assert_eq!(result.count, Some(2));
        assert_eq!(result.merged, !disjunction);
    }
}

#[tokio::test]
async fn split_merge_matches_single_query_on_deep_page() {
    let (m1, m9, m2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let caller = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    let mut expected = Vec::new();
    let mut fixtures = Vec::new();
    for i in 0..60 {
        let municipality = [m1, m9, m2][i % 3];
        let deleted = i % 7 == 0;
        // Triples share a timestamp so the id tie-breaker decides order.
        let created_at = format!("2025-03-{:02}T00:00:00Z", 1 + i / 3);
        let id = format!("p{i:02}");
        if municipality != m2 && !deleted {
            expected.push((created_at.clone(), id.clone()));
        }
        fixtures.push(row(json!({
            "id": id,
            "municipality_id": municipality,
            "stage": "active",
            "is_deleted": deleted,
            "created_at": created_at,
        })));
    }
    store.insert("pilots", fixtures).await;
    expected.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let expected_page: Vec<String> = expected
        .iter()
        .skip(14)
        .take(7)
        .map(|(_, id)| id.clone())
        .collect();

    let scopes = StaticScopeLookup::default().with(
        caller,
        VisibilityScope {
            is_national: false,
            sector_ids: BTreeSet::new(),
            home_jurisdiction_id: Some(m1),
        },
    );
    let engine = engine(store, scopes, national_refs(&[m9]), EngineConfig::uncached());
    let ctx = CallerContext::new(caller, vec![]);
    let spec = EntityKind::Pilots
        .query()
        .paginate(Pagination::page(3, 7))
        .with_count();

    let single = engine.fetch_for(&ctx, &spec).await.unwrap();
    let merged = engine
        .fetch_for(&ctx, &spec.clone().merge_mode(MergeMode::ForceSplit))
        .await
        .unwrap();

    assert!(!single.merged);
    assert!(merged.merged);
    assert_eq!(ids(&single.rows), expected_page);
    assert_eq!(ids(&merged.rows), expected_page);
    assert_eq!(single.count, Some(expected.len() as u64));
    assert_eq!(merged.count, single.count);
}

#[tokio::test]
async fn failed_scope_lookup_compiles_to_public_only() {
    let caller = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        store,
        StaticScopeLookup::failing(),
        national_refs(&[Uuid::new_v4()]),
        EngineConfig::uncached(),
    );
    let ctx = CallerContext::new(caller, vec![]);
    let policy = engine.policy_for(&ctx).await;
    assert_eq!(policy.level, VisibilityLevel::Public);

    for kind in EntityKind::ALL {
        let compiled = engine.compile(&kind.query(), &policy).unwrap();
        let columns = compiled.filtered_columns();
        let schema = kind.schema();
        for restricted in [&schema.sector_column, &schema.jurisdiction_column]
            .into_iter()
            .flatten()
        {
            assert!(
                !columns.contains(restricted),
                "{kind}: public plan filtered on {restricted}"
            );
        }
    }
}

#[tokio::test]
async fn global_second_page_of_twenty_five() {
    let store = Arc::new(MemoryStore::new());
    let rows = (0..25).map(|i| {
        row(json!({
            "id": format!("e{i:02}"),
            "is_deleted": false,
            "is_published": i % 2 == 0,
            "start_date": format!("2025-03-{:02}T09:00:00Z", i + 1),
        }))
    });
    store.insert("events", rows).await;
    let engine = engine(
        store,
        StaticScopeLookup::default(),
        national_refs(&[]),
        EngineConfig::uncached(),
    );
    let admin = CallerContext::new(Uuid::new_v4(), vec![ROLE_ADMIN.into()]);
    let spec = EntityKind::Events
        .query()
        .paginate(Pagination::page(2, 10))
        .with_count();

    let paged = engine.fetch_for(&admin, &spec).await.unwrap().into_paged(10);
    let expected: Vec<String> = (10..20).map(|i| format!("e{i:02}")).collect();
    assert_eq!(ids(&paged.data), expected);
    assert_eq!(paged.count, Some(25));
    assert_eq!(paged.total_pages, Some(3));
}

#[tokio::test]
async fn public_never_returns_unpublished_or_deleted_rows() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert(
            "challenges",
            [
                row(json!({"id": "ok", "is_published": true, "is_deleted": false, "created_at": "2025-01-01T00:00:00Z"})),
                row(json!({"id": "draft", "is_published": false, "is_deleted": false, "created_at": "2025-01-02T00:00:00Z"})),
                row(json!({"id": "gone", "is_published": true, "is_deleted": true, "created_at": "2025-01-03T00:00:00Z"})),
            ],
        )
        .await;
    store
        .insert(
            "pilots",
            [
                row(json!({"id": "live", "stage": "active", "is_deleted": null, "created_at": "2025-01-01T00:00:00Z"})),
                row(json!({"id": "planned", "stage": "draft", "is_deleted": null, "created_at": "2025-01-02T00:00:00Z"})),
                row(json!({"id": "removed", "stage": "completed", "is_deleted": true, "created_at": "2025-01-03T00:00:00Z"})),
            ],
        )
        .await;
    let engine = engine(
        store,
        StaticScopeLookup::default(),
        national_refs(&[]),
        EngineConfig::uncached(),
    );
    let anon = CallerContext::anonymous();

    let challenges = engine
        .fetch_for(&anon, &EntityKind::Challenges.query())
        .await
        .unwrap();
    assert_eq!(ids(&challenges.rows), vec!["ok"]);

    // include_deleted is ignored below global.
    let pilots = engine
        .fetch_for(&anon, &EntityKind::Pilots.query().include_deleted())
        .await
        .unwrap();
    assert_eq!(ids(&pilots.rows), vec!["live"]);
}

#[tokio::test]
async fn full_visibility_plans_carry_no_visibility_filter() {
    let engine = engine(
        Arc::new(MemoryStore::new()),
        StaticScopeLookup::default(),
        national_refs(&[]),
        EngineConfig::uncached(),
    );
    let caller = CallerContext::new(Uuid::new_v4(), vec![])
        .with_permissions(vec![PERM_VIEW_ALL_SECTORS.into()]);
    let policy = engine.policy_for(&caller).await;
    assert!(policy.has_full_visibility);

    for kind in EntityKind::ALL {
        let schema = kind.schema();
        let compiled = engine.compile(&kind.query(), &policy).unwrap();
        let CompiledQuery::Single { request, .. } = &compiled else {
            panic!("{kind}: global plan should be a single query");
        };
        let columns = compiled.filtered_columns();
        let soft_delete: BTreeSet<String> =
            schema.soft_delete.column().map(str::to_string).into_iter().collect();
        assert_eq!(columns, soft_delete, "{kind}: {:?}", request.clauses);
    }
}

#[tokio::test]
async fn strict_collections_refuse_paged_client_merge() {
    let (m1, m9) = (Uuid::new_v4(), Uuid::new_v4());
    let caller = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    store.insert("budgets", []).await;
    store.insert("events", []).await;
    let scopes = StaticScopeLookup::default().with(
        caller,
        VisibilityScope {
            home_jurisdiction_id: Some(m1),
            ..Default::default()
        },
    );
    let config = EngineConfig {
        force_client_merge: true,
        ..EngineConfig::uncached()
    };
    let engine = engine(store, scopes, national_refs(&[m9]), config);
    let ctx = CallerContext::new(caller, vec![]);

    let budgets = EntityKind::Budgets.query().paginate(Pagination::page(1, 10));
    let err = engine.fetch_for(&ctx, &budgets).await.unwrap_err();
    assert!(matches!(err, VisibilityError::InvalidRequest(_)));
    assert_eq!(err.http_status(), 400);

    let events = EntityKind::Events.query().paginate(Pagination::page(1, 10));
    let result = engine.fetch_for(&ctx, &events).await.unwrap();
    assert!(result.merged);
}

#[tokio::test]
async fn sectoral_caller_on_sectorless_collection_gets_public_rows() {
    let caller = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    store
        .insert(
            "partnerships",
            [
                row(json!({"id": "a", "status": "active", "created_at": "2025-01-01T00:00:00Z"})),
                row(json!({"id": "b", "status": "negotiating", "created_at": "2025-01-02T00:00:00Z"})),
            ],
        )
        .await;
    let scopes = StaticScopeLookup::default().with(
        caller,
        VisibilityScope {
            is_national: true,
            sector_ids: BTreeSet::from([Uuid::new_v4()]),
            home_jurisdiction_id: None,
        },
    );
    let engine = engine(store, scopes, national_refs(&[]), EngineConfig::uncached());
    let result = engine
        .fetch_for(
            &CallerContext::new(caller, vec![]),
            &EntityKind::Partnerships.query(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&result.rows), vec!["a"]);
}

#[tokio::test]
async fn store_failures_are_never_empty_successes() {
    let store = Arc::new(MemoryStore::new());
    store.fail_on("contracts").await;
    let engine = engine(
        store,
        StaticScopeLookup::default(),
        national_refs(&[]),
        EngineConfig::default(),
    );
    let admin = CallerContext::new(Uuid::new_v4(), vec![ROLE_ADMIN.into()]);
    let err = engine
        .fetch_for(&admin, &EntityKind::Contracts.query())
        .await
        .unwrap_err();
    assert!(matches!(err, VisibilityError::QueryFailed { ref collection, .. } if collection == "contracts"));
    assert_eq!(engine.cache_stats().await.map(|s| s.total_entries), Some(0));
}

#[tokio::test]
async fn compiling_twice_is_identical_for_every_level() {
    let engine = engine(
        Arc::new(MemoryStore::without_disjunction()),
        StaticScopeLookup::default(),
        national_refs(&[]),
        EngineConfig::uncached(),
    );
    let policies = [
        visibility_core::VisibilityPolicy {
            level: VisibilityLevel::Global,
            has_full_visibility: true,
            ..visibility_core::VisibilityPolicy::public()
        },
        visibility_core::VisibilityPolicy {
            level: VisibilityLevel::Sectoral,
            sector_ids: (0..4).map(|_| Uuid::new_v4()).collect(),
            ..visibility_core::VisibilityPolicy::public()
        },
        visibility_core::VisibilityPolicy {
            level: VisibilityLevel::Geographic,
            home_jurisdiction_id: Some(Uuid::new_v4()),
            national_jurisdiction_ids: (0..4).map(|_| Uuid::new_v4()).collect(),
            ..visibility_core::VisibilityPolicy::public()
        },
        visibility_core::VisibilityPolicy::public(),
    ];
    for kind in EntityKind::ALL {
        let spec = kind.query().with_count();
        for policy in &policies {
            let first = engine.compile(&spec, policy).unwrap();
            let second = engine.compile(&spec, policy).unwrap();
            assert_eq!(first, second, "{kind} at {}", policy.level);
        }
    }
}
