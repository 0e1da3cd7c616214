use invsheet_core::db::open_db_in_memory;
use invsheet_core::{
    ApiRequest, ApiResponse, ErrorKind, Method, Sheet, SheetApi, SheetSummary, WriteMode,
};
use serde_json::json;
use uuid::Uuid;

fn api() -> SheetApi {
    SheetApi::new(open_db_in_memory().unwrap())
}

fn create(api: &SheetApi, name: &str) -> Sheet {
    let response = api.handle(&ApiRequest::post(
        "/sheets",
        json!({ "name": name }).to_string(),
    ));
    assert_eq!(response.status, 201, "{}", response.body);
    serde_json::from_value(response.body).unwrap()
}

fn patch(api: &SheetApi, sheet_id: Uuid, body: serde_json::Value) -> ApiResponse {
    api.handle(&ApiRequest::patch(
        format!("/sheets/{sheet_id}"),
        body.to_string(),
    ))
}

fn error_kind(response: &ApiResponse) -> ErrorKind {
    response.error().unwrap().kind
}

#[test]
fn post_then_get_returns_document() {
    let api = api();
    let created = create(&api, "Party Loot");

    let response = api.handle(&ApiRequest::get(format!("/sheets/{}", created.id)));

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        json!({
            "id": created.id,
            "name": "Party Loot",
            "items": [],
            "members": [],
            "version": 0
        })
    );
}

#[test]
fn index_lists_summaries() {
    let api = api();
    let first = create(&api, "Loot");
    let second = create(&api, "Camp");

    let response = api.handle(&ApiRequest::get("/sheets"));

    assert_eq!(response.status, 200);
    let summaries: Vec<SheetSummary> = serde_json::from_value(response.body).unwrap();
    let mut ids: Vec<Uuid> = summaries.iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn patch_applies_action_and_returns_refreshed_sheet() {
    let api = api();
    let sheet = create(&api, "Loot");

    let response = patch(
        &api,
        sheet.id,
        json!({
            "type": "item_add",
            "data": {"name": "Rope", "weight": 2, "quantity": 1, "carriedBy": "unowned"},
            "sendToServer": false
        }),
    );

    assert_eq!(response.status, 200, "{}", response.body);
    assert_eq!(response.body["version"], json!(1));
    assert_eq!(response.body["items"][0]["name"], json!("Rope"));
    assert_eq!(response.body["items"][0]["carriedBy"], json!("unowned"));
    assert!(response.body.get("isAhead").is_none());
}

#[test]
fn patch_ignores_send_to_server_flag() {
    let api = api();
    let sheet = create(&api, "Loot");

    let response = patch(
        &api,
        sheet.id,
        json!({"type": "item_add", "data": {"name": "Rope"}, "sendToServer": true}),
    );

    assert_eq!(response.status, 200);
    assert_eq!(response.body["version"], json!(1));
}

#[test]
fn patch_accepts_legacy_unowned_sentinel() {
    let api = api();
    let sheet = create(&api, "Loot");

    let response = patch(
        &api,
        sheet.id,
        json!({"type": "item_add", "data": {"name": "Rope", "carriedBy": "Nobody"}}),
    );

    assert_eq!(response.status, 200);
    assert_eq!(response.body["items"][0]["carriedBy"], json!("unowned"));
}

#[test]
fn metadata_update_over_the_wire() {
    let api = api();
    let sheet = create(&api, "Loot");
    let ayla = Uuid::new_v4();
    let bram = Uuid::new_v4();
    let added = patch(
        &api,
        sheet.id,
        json!({
            "type": "sheet_metadataUpdate",
            "data": {
                "name": "Haul",
                "members": {"add": [
                    {"id": ayla, "name": "Ayla", "carryCapacity": 50},
                    {"id": bram, "name": "Bram", "carryCapacity": 80}
                ]}
            }
        }),
    );
    assert_eq!(added.status, 200, "{}", added.body);
    patch(
        &api,
        sheet.id,
        json!({"type": "item_add", "data": {"name": "Rope", "carriedBy": ayla}}),
    );

    let removed = patch(
        &api,
        sheet.id,
        json!({
            "type": "sheet_metadataUpdate",
            "data": {"members": {"remove": [
                {"id": ayla, "mode": {"kind": "moveTo", "target": bram}}
            ]}}
        }),
    );

    assert_eq!(removed.status, 200, "{}", removed.body);
    assert_eq!(removed.body["name"], json!("Haul"));
    assert_eq!(removed.body["members"].as_array().unwrap().len(), 1);
    assert_eq!(removed.body["items"][0]["carriedBy"], json!(bram));
    assert_eq!(removed.body["version"], json!(5));
}

#[test]
fn error_statuses() {
    let api = api();
    let sheet = create(&api, "Loot");

    let missing = api.handle(&ApiRequest::get(format!("/sheets/{}", Uuid::new_v4())));
    assert_eq!(missing.status, 404);
    assert_eq!(error_kind(&missing), ErrorKind::NotFound);

    let bad_id = api.handle(&ApiRequest::get("/sheets/loot"));
    assert_eq!(bad_id.status, 400);

    let no_route = api.handle(&ApiRequest::get("/members"));
    assert_eq!(no_route.status, 404);

    let wrong_method = api.handle(&ApiRequest {
        method: Method::Post,
        path: format!("/sheets/{}", sheet.id),
        body: Some("{}".to_string()),
    });
    assert_eq!(wrong_method.status, 405);

    let unknown = patch(&api, sheet.id, json!({"type": "item_explode", "data": {}}));
    assert_eq!(unknown.status, 400);
    assert_eq!(error_kind(&unknown), ErrorKind::UnknownAction);

    let client_only = patch(&api, sheet.id, json!({"type": "sheet_setIsAhead", "data": true}));
    assert_eq!(client_only.status, 400);
    assert_eq!(error_kind(&client_only), ErrorKind::Validation);

    let malformed = api.handle(&ApiRequest::patch(format!("/sheets/{}", sheet.id), "{"));
    assert_eq!(malformed.status, 400);

    let blank_name = api.handle(&ApiRequest::post("/sheets", r#"{"name": "   "}"#));
    assert_eq!(blank_name.status, 400);
}

#[test]
fn partial_application_maps_to_conflict() {
    let api = SheetApi::new(open_db_in_memory().unwrap()).with_write_mode(WriteMode::PerOperation);
    let sheet = create(&api, "Loot");

    let response = patch(
        &api,
        sheet.id,
        json!({
            "type": "sheet_metadataUpdate",
            "data": {
                "name": "Renamed",
                "members": {"update": [{"id": Uuid::new_v4(), "name": "Ghost", "carryCapacity": 1}]}
            }
        }),
    );

    assert_eq!(response.status, 409);
    assert_eq!(error_kind(&response), ErrorKind::PartialApplication);
    let current = api.handle(&ApiRequest::get(format!("/sheets/{}", sheet.id)));
    assert_eq!(current.body["name"], json!("Renamed"));
}
