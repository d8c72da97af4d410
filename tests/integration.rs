use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use parcel_service::api::rest::router;
use parcel_service::state::AppState;
use parcel_service::store::memory::InMemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (axum::Router, InMemoryStore) {
    let (state, store) = AppState::in_memory(Duration::from_secs(5));
    (router(Arc::new(state)), store)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn raw_request(method: &str, uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn parcel_payload() -> Value {
    json!({
        "user_id": 1,
        "source_address": "Dhaka Bangladesh",
        "destination_address": "Pabna Shadar",
        "source_time": "3021-10-10T10:10:12Z",
        "type": "Document"
    })
}

async fn create_parcel(app: &axum::Router) -> i64 {
    let res = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/parcel", parcel_payload()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await["data"]["id"].as_i64().unwrap()
}

async fn request_carrier(app: &axum::Router, parcel_id: i64, carrier_id: i64) -> StatusCode {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/parcel/{parcel_id}/carrier-request"),
            json!({ "carrier_id": carrier_id }),
        ))
        .await
        .unwrap()
        .status()
}

async fn accept(app: &axum::Router, parcel_id: i64, carrier_id: i64) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/parcel/{parcel_id}/accept"),
            json!({ "carrier_id": carrier_id }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn ping_returns_ok() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/ping")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], "ping");
}

#[tokio::test]
async fn health_reports_store_up() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "up");
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _store) = setup();
    create_parcel(&app).await;

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("parcels_created_total 1"));
}

#[tokio::test]
async fn create_parcel_returns_priced_parcel_in_envelope() {
    let (app, _store) = setup();
    let response = app
        .oneshot(json_request("POST", "/api/v1/parcel", parcel_payload()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["errors"].is_null());
    assert_eq!(body["data"]["status"], "created");
    assert_eq!(body["data"]["type"], "Document");
    assert_eq!(body["data"]["price"], "200.00");
    assert_eq!(body["data"]["carrier_fee"], "180.00");
    assert_eq!(body["data"]["company_fee"], "20.00");
    assert!(body["data"]["carrier_id"].is_null());
}

#[tokio::test]
async fn create_parcel_with_missing_fields_returns_400() {
    let (app, _store) = setup();
    let response = app
        .oneshot(json_request("POST", "/api/v1/parcel", json!({ "user_id": 1 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["code"], "INVALID");
    assert_eq!(body["errors"][0]["message"], "source address is required");
    assert_eq!(body["errors"][0]["message_title"], "Invalid Input");
    assert_eq!(body["errors"][0]["severity"], "error");
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn undecodable_body_returns_422() {
    let (app, _store) = setup();
    let response = app
        .oneshot(raw_request("POST", "/api/v1/parcel", "------------"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["message_title"], "Decode Error");
}

#[tokio::test]
async fn get_nonexistent_parcel_returns_404() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/api/v1/parcel/77")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_numeric_parcel_id_returns_400() {
    let (app, _store) = setup();
    let response = app.oneshot(get_request("/api/v1/parcel/abc")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_parcels_filters_by_status() {
    let (app, _store) = setup();
    let first = create_parcel(&app).await;
    create_parcel(&app).await;
    assert_eq!(request_carrier(&app, first, 2).await, StatusCode::CREATED);
    assert_eq!(accept(&app, first, 2).await.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(get_request("/api/v1/parcel?status=created"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created = body_json(res).await;
    assert_eq!(created["data"].as_array().unwrap().len(), 1);

    let res = app
        .oneshot(get_request("/api/v1/parcel?status=assigned&limit=5"))
        .await
        .unwrap();
    let assigned = body_json(res).await;
    assert_eq!(assigned["data"][0]["id"], first);
}

#[tokio::test]
async fn edit_parcel_before_assignment() {
    let (app, _store) = setup();
    let id = create_parcel(&app).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/parcel/{id}"),
            json!({ "destination_address": "Rajshahi" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["data"]["destination_address"], "Rajshahi");

    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::CREATED);
    assert_eq!(accept(&app, id, 2).await.status(), StatusCode::OK);

    let res = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/parcel/{id}"),
            json!({ "destination_address": "Khulna" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn carrier_request_without_carrier_id_returns_400() {
    let (app, _store) = setup();
    let id = create_parcel(&app).await;

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/parcel/{id}/carrier-request"),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_carrier_request_returns_400() {
    let (app, _store) = setup();
    let id = create_parcel(&app).await;

    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::CREATED);
    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn carrier_request_for_missing_parcel_returns_404() {
    let (app, _store) = setup();
    assert_eq!(request_carrier(&app, 12, 2).await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_assignment_flow() {
    let (app, _store) = setup();
    let id = create_parcel(&app).await;
    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::CREATED);
    assert_eq!(request_carrier(&app, id, 5).await, StatusCode::CREATED);

    let res = accept(&app, id, 2).await;
    assert_eq!(res.status(), StatusCode::OK);
    let assignment = body_json(res).await;
    assert_eq!(assignment["data"]["parcel_id"], id);
    assert_eq!(assignment["data"]["carrier_id"], 2);
    assert_eq!(assignment["data"]["rejected_requests"], 1);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/api/v1/parcel/{id}")))
        .await
        .unwrap();
    let parcel = body_json(res).await;
    assert_eq!(parcel["data"]["status"], "assigned");
    assert_eq!(parcel["data"]["carrier_id"], 2);
    assert!(parcel["data"]["assigned_at"].is_string());

    let res = app
        .clone()
        .oneshot(get_request(&format!("/api/v1/parcel/{id}/carrier-request")))
        .await
        .unwrap();
    let requests = body_json(res).await;
    let list = requests["data"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["carrier_id"], 2);
    assert_eq!(list[0]["status"], "accepted");
    assert_eq!(list[1]["carrier_id"], 5);
    assert_eq!(list[1]["status"], "rejected");

    let res = accept(&app, id, 2).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn accepting_unknown_carrier_returns_404() {
    let (app, _store) = setup();
    let id = create_parcel(&app).await;
    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::CREATED);

    let res = accept(&app, id, 99).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_json(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn store_failure_during_accept_returns_500_without_details() {
    use parcel_service::store::memory::FailurePoint;

    let (app, store) = setup();
    let id = create_parcel(&app).await;
    assert_eq!(request_carrier(&app, id, 2).await, StatusCode::CREATED);
    store.inject_failure(FailurePoint::Commit);

    let res = accept(&app, id, 2).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body["errors"][0]["message"], "internal server error");
}
