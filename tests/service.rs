//! End-to-end tests of `TableService` over the in-memory repository
//!
//! No database is required.

use runtara_table_store::tenant::resolve;
use runtara_table_store::{
    ColumnDefinition, ColumnType, FieldRules, ListOutcome, MemoryAuditSink, MemoryStore, Page,
    QueryParams, RequestContext, StoreConfig, TableService, TableSpec, TableStoreError,
};
use serde_json::{Map, Value, json};

type Service = TableService<MemoryStore, MemoryAuditSink>;

fn people_spec() -> TableSpec {
    TableSpec::records("uid")
        .with_column(ColumnDefinition::new("age", ColumnType::Integer))
        .with_column(ColumnDefinition::new("city", ColumnType::varchar(50)))
}

fn service_with(config: StoreConfig) -> Service {
    let store = MemoryStore::with_spec(people_spec()).unwrap();
    TableService::new(store, MemoryAuditSink::new(), config).unwrap()
}

fn service() -> Service {
    service_with(StoreConfig::builder("memory://").build())
}

fn ctx(method: &str) -> RequestContext {
    RequestContext::new(method, "/tables/people")
        .tenant("acme")
        .ip("127.0.0.1")
        .user_agent("tests")
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

async fn seed(service: &Service, rows: &[Value]) {
    for row in rows {
        service
            .create(&ctx("POST"), "people", inputs(row.clone()), &FieldRules::new())
            .await
            .unwrap();
    }
}

async fn page(service: &Service, query: &str) -> Page {
    match service
        .list(&ctx("GET"), "people", &QueryParams::parse(query))
        .await
        .unwrap()
    {
        ListOutcome::Page(page) => page,
        other => panic!("expected a page, got {:?}", other),
    }
}

fn uids(page: &Page) -> Vec<String> {
    page.data
        .iter()
        .map(|row| row["uid"].as_str().unwrap_or_default().to_string())
        .collect()
}

async fn row_count(service: &Service) -> usize {
    let table = service.table_name(&ctx("GET"), "people").unwrap();
    service.repository().row_count(&table).await
}

// ==================== Query Tests ====================

#[tokio::test]
async fn test_filter_groups_and_then_or() {
    let service = service();
    seed(
        &service,
        &[
            json!({ "uid": "p1", "age": 20, "city": "NY" }),
            json!({ "uid": "p2", "age": 17, "city": "NY" }),
            json!({ "uid": "p3", "age": 30, "city": "LA" }),
            json!({ "uid": "p4", "age": 40, "city": "SF" }),
        ],
    )
    .await;

    let page = page(
        &service,
        "filter[]=age:gte:18&filter[]=city:eq:NY,city:eq:LA&sort[]=uid:asc",
    )
    .await;
    assert_eq!(uids(&page), vec!["p1", "p3"]);
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn test_default_and_fallback_page_size() {
    let service = service();
    let rows: Vec<Value> = (0..20).map(|i| json!({ "uid": format!("u{:02}", i) })).collect();
    seed(&service, &rows).await;

    let first = page(&service, "").await;
    assert_eq!(first.per_page, 15);
    assert_eq!(first.current_page, 1);
    assert_eq!(first.data.len(), 15);
    assert_eq!(first.last_page, 2);

    let small = page(&service, "per_page=7&page=3").await;
    assert_eq!(small.per_page, 7);
    assert_eq!(small.data.len(), 6);
    assert_eq!(small.from, Some(15));

    let junk = page(&service, "limit=abc&page=xyz").await;
    assert_eq!(junk.per_page, 15);
    assert_eq!(junk.current_page, 1);
}

#[tokio::test]
async fn test_single_value_between_matches_nothing() {
    let service = service();
    seed(
        &service,
        &[
            json!({ "uid": "p1", "age": 10 }),
            json!({ "uid": "p2", "age": 50 }),
        ],
    )
    .await;

    for query in ["filter[]=age:bt:10", "filter[]=age:nbt:10"] {
        let first = page(&service, query).await;
        let second = page(&service, query).await;
        assert_eq!(first.total, 0, "query {}", query);
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn test_imported_numbers_filter_numerically() {
    let service = service();
    service
        .import(
            &ctx("POST"),
            "people",
            "uid,data.qty\nten,10\nthree,3\nnone,null\n".as_bytes(),
            &FieldRules::new(),
        )
        .await
        .unwrap();

    assert_eq!(uids(&page(&service, "filter[]=data.qty:gt:5").await), vec!["ten"]);
    assert_eq!(uids(&page(&service, "filter[]=data.qty:bt:2|5").await), vec!["three"]);
    assert_eq!(uids(&page(&service, "filter[]=data.qty:nbt:2|5").await), vec!["ten"]);
    assert_eq!(page(&service, "filter[]=data.qty:nbt:2").await.total, 0);
}

#[tokio::test]
async fn test_malformed_clauses_are_dropped() {
    let service = service();
    seed(&service, &[json!({ "uid": "p1" }), json!({ "uid": "p2" })]).await;

    let page = page(
        &service,
        "filter[]=age:zz:1&filter[]=nosuch:eq:1&sort[]=uid:sideways&select=uid,bogus",
    )
    .await;
    assert_eq!(page.total, 2);
    assert!(page.data.iter().all(|row| row.contains_key("uid")));
}

#[tokio::test]
async fn test_select_projects_columns() {
    let service = service();
    seed(&service, &[json!({ "uid": "p1", "age": 3, "city": "NY" })]).await;

    let page = page(&service, "select=uid,city").await;
    let row = &page.data[0];
    assert_eq!(row.get("city"), Some(&json!("NY")));
    assert!(!row.contains_key("age"));
}

#[tokio::test]
async fn test_delete_method_deletes_matching_rows() {
    let service = service();
    seed(
        &service,
        &[
            json!({ "uid": "p1", "city": "NY" }),
            json!({ "uid": "p2", "city": "LA" }),
            json!({ "uid": "p3", "city": "NY" }),
        ],
    )
    .await;

    let outcome = service
        .list(&ctx("DELETE"), "people", &QueryParams::parse("filter[]=city:eq:NY&limit=1"))
        .await
        .unwrap();
    assert_eq!(outcome, ListOutcome::Deleted(2));
    assert_eq!(row_count(&service).await, 1);
}

// ==================== Record Tests ====================

#[tokio::test]
async fn test_create_retrieve_upsert_delete() {
    let service = service();
    let created = service
        .create(
            &ctx("POST"),
            "people",
            inputs(json!({ "uid": "p1", "data.color": "red", "data.size": 2 })),
            &FieldRules::new(),
        )
        .await
        .unwrap();
    assert_eq!(created.get("data"), Some(&json!({ "color": "red", "size": 2 })));

    let updated = service
        .upsert(
            &ctx("PUT"),
            "people",
            Some("p1"),
            inputs(json!({ "data.color": "blue" })),
            &FieldRules::new(),
        )
        .await
        .unwrap();
    assert_eq!(updated.id(), created.id());
    assert_eq!(updated.get("data"), Some(&json!({ "color": "blue" })));

    let fetched = service.retrieve(&ctx("GET"), "people", "p1").await.unwrap();
    assert_eq!(fetched.get("data"), Some(&json!({ "color": "blue" })));

    service.delete(&ctx("DELETE"), "people", "p1").await.unwrap();
    let err = service.retrieve(&ctx("GET"), "people", "p1").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    let err = service.delete(&ctx("DELETE"), "people", "p1").await.unwrap_err();
    assert!(matches!(err, TableStoreError::NotFound(_)));
}

#[tokio::test]
async fn test_upsert_unknown_id_inserts_with_that_id() {
    let service = service();
    let record = service
        .upsert(&ctx("PUT"), "people", Some("fresh"), inputs(json!({ "age": 5 })), &FieldRules::new())
        .await
        .unwrap();
    assert_eq!(record.uid("uid"), Some("fresh".to_string()));
    assert!(record.get("started_at").is_some());
}

#[tokio::test]
async fn test_upsert_rules_reject_inputs() {
    let service = service();
    let rules = FieldRules::new().parse_field("data.email", "required|email").unwrap();
    let err = service
        .create(&ctx("POST"), "people", inputs(json!({ "data.email": "nope" })), &rules)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert!(err.error_body()["error"]["data.email"].is_array());
    assert_eq!(row_count(&service).await, 0);
}

#[tokio::test]
async fn test_duplicate_uid_on_create_is_conflict() {
    let service = service();
    seed(&service, &[json!({ "uid": "p1" })]).await;
    let err = service
        .create(&ctx("POST"), "people", inputs(json!({ "uid": "p1" })), &FieldRules::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

// ==================== Import Tests ====================

#[tokio::test]
async fn test_import_then_reimport_is_idempotent_upsert() {
    let service = service();
    let csv = "uid,age,data.color\np1,20,red\np2,30,blue\np3,40,green\n";

    let first = service
        .import(&ctx("POST"), "people", csv.as_bytes(), &FieldRules::new())
        .await
        .unwrap();
    assert_eq!(first.inserted, vec!["p1", "p2", "p3"]);
    assert!(first.updated.is_empty());
    assert!(first.skipped.is_empty());

    let second = service
        .import(&ctx("POST"), "people", csv.as_bytes(), &FieldRules::new())
        .await
        .unwrap();
    assert!(second.inserted.is_empty());
    assert_eq!(second.updated, vec!["p1", "p2", "p3"]);
    assert_ne!(first.import_id, second.import_id);
    assert_eq!(row_count(&service).await, 3);

    let p2 = service.retrieve(&ctx("GET"), "people", "p2").await.unwrap();
    assert_eq!(p2.get("import_id"), Some(&json!(second.import_id)));
    assert_eq!(p2.get("data"), Some(&json!({ "color": "blue" })));
}

#[tokio::test]
async fn test_failing_row_aborts_whole_import() {
    let service = service();
    let rules = FieldRules::new().parse_field("data.email", "required|email").unwrap();

    let mut csv = String::from("uid,data.email\n");
    for i in 1..=10 {
        let email = if i == 7 { "broken".to_string() } else { format!("u{}@example.com", i) };
        csv.push_str(&format!("u{},{}\n", i, email));
    }

    let err = service
        .import(&ctx("POST"), "people", csv.as_bytes(), &rules)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    let body = err.error_body();
    assert_eq!(body["rowno"], json!(7));
    assert_eq!(body["row"], json!({ "uid": "u7", "data.email": "broken" }));
    assert_eq!(row_count(&service).await, 0);
}

#[tokio::test]
async fn test_import_over_limit_persists_nothing() {
    let service = service_with(StoreConfig::builder("memory://").import_limit(3).build());
    let csv = "uid\na\nb\nc\nd\n";

    let err = service
        .import(&ctx("POST"), "people", csv.as_bytes(), &FieldRules::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(err.error_body()["limit"], json!(3));
    assert_eq!(row_count(&service).await, 0);
}

#[tokio::test]
async fn test_null_tokens_import_as_null() {
    let service = service();
    let csv = "uid,city,data.note\na,null,NIL\nb, Undefined ,undefined\n";
    service
        .import(&ctx("POST"), "people", csv.as_bytes(), &FieldRules::new())
        .await
        .unwrap();

    for uid in ["a", "b"] {
        let record = service.retrieve(&ctx("GET"), "people", uid).await.unwrap();
        assert_eq!(record.get("city"), Some(&Value::Null));
        assert_eq!(record.get("data"), Some(&json!({ "note": null })));
    }
}

#[tokio::test]
async fn test_skip_hook_vetoes_rows() {
    let service = service().with_skip_hook(|row, _| row.id("uid").as_deref() == Some("blocked"));
    let response = service
        .import(&ctx("POST"), "people", "uid\nok\nblocked\n".as_bytes(), &FieldRules::new())
        .await
        .unwrap();
    assert_eq!(response.inserted, vec!["ok"]);
    assert_eq!(response.skipped, vec![Some("blocked".to_string())]);
    assert_eq!(row_count(&service).await, 1);
}

#[tokio::test]
async fn test_missing_upload_is_rejected() {
    let err = service()
        .import_file(&ctx("POST"), "people", None::<&[u8]>, &FieldRules::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TableStoreError::MissingFile));
}

// ==================== Audit Tests ====================

#[tokio::test]
async fn test_record_writes_are_audited() {
    let service = service();
    seed(&service, &[json!({ "uid": "p1", "age": 1 })]).await;
    service
        .upsert(&ctx("PUT"), "people", Some("p1"), inputs(json!({ "age": 2 })), &FieldRules::new())
        .await
        .unwrap();
    service.delete(&ctx("DELETE"), "people", "p1").await.unwrap();

    let events = service.sink().events();
    let actions: Vec<&str> = events
        .iter()
        .map(|e| e.body["action"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(actions, vec!["create", "update", "delete"]);
    assert!(events.iter().all(|e| e.path == "acme$people/p1/index.json"));
    assert_eq!(events[1].body["log"], json!([{ "key": "age", "old": 1, "new": 2 }]));
    assert_eq!(events[1].body["user_agent"], json!("tests"));
}

#[tokio::test]
async fn test_import_is_audited_in_aggregate() {
    let service = service();
    let response = service
        .import(&ctx("POST"), "people", "uid\na\nb\n".as_bytes(), &FieldRules::new())
        .await
        .unwrap();

    let events = service.sink().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].body["action"], json!("import"));
    assert_eq!(events[0].body["custom"]["import_id"], json!(response.import_id));
    assert!(events[0].path.starts_with("acme$people/"));
    assert!(events[0].path.ends_with("_revts.json"));
}

#[tokio::test]
async fn test_excluded_tables_are_not_audited() {
    let service = service();
    service
        .create(&ctx("POST"), "logbook", inputs(json!({ "uid": "x" })), &FieldRules::new())
        .await
        .unwrap();
    assert!(service.sink().events().is_empty());
}

// ==================== Export / Table Tests ====================

#[tokio::test]
async fn test_export_filters_without_pagination() {
    let service = service();
    let rows: Vec<Value> = (0..20)
        .map(|i| json!({ "uid": format!("u{:02}", i), "age": i }))
        .collect();
    seed(&service, &rows).await;

    let export = service
        .export(
            &ctx("GET"),
            "people",
            &QueryParams::parse("filter[]=age:gte:2&sort[]=age:desc&select=uid,age&limit=5"),
            None,
        )
        .await
        .unwrap();
    assert!(export.file_name.starts_with("people-"));
    assert!(export.file_name.ends_with(".csv"));

    let text = String::from_utf8(export.content).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "uid,age");
    assert_eq!(lines[1], "u19,19");
    assert_eq!(lines.len(), 19);
}

#[tokio::test]
async fn test_truncate_and_drop() {
    let service = service();
    seed(&service, &[json!({ "uid": "a" }), json!({ "uid": "b" })]).await;

    service.truncate(&ctx("POST"), "people").await.unwrap();
    assert_eq!(row_count(&service).await, 0);

    service.drop_table(&ctx("DELETE"), "people").await.unwrap();
    assert!(service.repository().table_names().await.is_empty());
}

#[tokio::test]
async fn test_reserved_table_rejected_before_access() {
    let service = service();
    let err = service
        .list(&ctx("GET"), "profile", &QueryParams::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert!(service.repository().table_names().await.is_empty());
}

// ==================== Table Name Tests ====================

#[test]
fn test_table_name_resolution_is_pure() {
    let first = resolve("Acme Corp!", "My-Table");
    assert_eq!(first, "acmecorp$mytable");
    assert_eq!(resolve("Acme Corp!", "My-Table"), first);
}
