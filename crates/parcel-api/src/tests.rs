use std::net::SocketAddr;

use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version, password_hash::SaltString};
use axum::{
  body::Body,
  extract::ConnectInfo,
  http::{Request, StatusCode, header},
  response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use parcel_core::{
  access::{EDITORS, Policy, RequestContext},
  account::NewUser,
  attachment::{NewAttachment, Upload},
  blob::MemoryBlobStore,
  store::PropertyStore,
};
use parcel_store_sqlite::SqliteStore;
use rand_core::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use super::*;

type Store = SqliteStore<MemoryBlobStore>;

const ADMIN: &str = "admin";
const EDITOR: &str = "editor";
const PASSWORD: &str = "secret";

/// Low-cost parameters keep the per-request verification fast in tests.
fn cheap_hash(password: &str) -> String {
  let params = Params::new(1024, 1, 1, None).unwrap();
  let salt = SaltString::generate(&mut OsRng);
  Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    .hash_password(password.as_bytes(), &salt)
    .unwrap()
    .to_string()
}

async fn make_state_with(config: ApiConfig) -> AppState<Store> {
  let store = SqliteStore::open_in_memory(MemoryBlobStore::new()).await.unwrap();
  store.ensure_administrator(ADMIN, &cheap_hash(PASSWORD)).await.unwrap();
  store
    .create_user(&RequestContext::anonymous(), NewUser {
      username:      EDITOR.into(),
      password_hash: cheap_hash(PASSWORD),
      roles:         vec![EDITORS.into()],
    })
    .await
    .unwrap();
  AppState::new(store, config)
}

async fn make_state() -> AppState<Store> { make_state_with(ApiConfig::default()).await }

fn auth_header(user: &str, pass: &str) -> String {
  format!("Basic {}", B64.encode(format!("{user}:{pass}")))
}

fn request(method: &str, uri: &str, user: Option<&str>) -> axum::http::request::Builder {
  let mut builder = Request::builder().method(method).uri(uri);
  if let Some(user) = user {
    builder = builder.header(header::AUTHORIZATION, auth_header(user, PASSWORD));
  }
  builder
}

fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
  request(method, uri, user)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn empty_request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
  request(method, uri, user).body(Body::empty()).unwrap()
}

enum Part<'a> {
  Text(&'a str, &'a str),
  File(&'a str, &'a str, &'a str, &'a [u8]),
}

const BOUNDARY: &str = "parcel-test-boundary";

fn multipart_request(method: &str, uri: &str, user: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
  let mut body = Vec::new();
  for part in parts {
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    match part {
      Part::Text(name, value) => {
        body.extend_from_slice(
          format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
      }
      Part::File(name, file_name, content_type, bytes) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
          )
          .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
      }
    }
  }
  body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

  request(method, uri, user)
    .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
    .body(Body::from(body))
    .unwrap()
}

async fn send(state: &AppState<Store>, req: Request<Body>) -> Response {
  router(state.clone()).oneshot(req).await.unwrap()
}

async fn body_json(resp: Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

fn record_json(upin: &str) -> Value {
  json!({
    "PropertyOwnerName":   "Abebe Kebede",
    "ExistingArchiveCode": "AR-001",
    "UPIN":                upin,
    "ServiceOfEstate":     "Residential",
    "placeLevel":          "1",
    "possessionStatus":    "Owned",
    "spaceSize":           "200",
    "kebele":              "01",
    "proofOfPossession":   "Title deed",
    "DebtRestriction":     "None",
  })
}

async fn create_record(state: &AppState<Store>, upin: &str) -> Value {
  let resp = send(state, json_request("POST", "/records", Some(ADMIN), record_json(upin))).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  body_json(resp).await
}

async fn audit_actions(state: &AppState<Store>) -> Vec<String> {
  state
    .store
    .query_audit(500)
    .await
    .unwrap()
    .into_iter()
    .map(|e| e.action.to_string())
    .collect()
}

// ── Identity and policy ─────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_request_gets_challenge() {
  let state = make_state().await;
  let resp = send(&state, empty_request("GET", "/records", None)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
  let state = make_state().await;
  let req = Request::builder()
    .uri("/records")
    .header(header::AUTHORIZATION, auth_header(ADMIN, "wrong"))
    .body(Body::empty())
    .unwrap();
  assert_eq!(send(&state, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn editors_are_forbidden_from_admin_routes() {
  let state = make_state().await;
  let record = create_record(&state, "U-1").await;
  let id = record["id"].as_str().unwrap();

  let resp = send(&state, empty_request("DELETE", &format!("/records/{id}"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let resp = send(&state, empty_request("GET", "/accounts/users", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let resp = send(&state, empty_request("GET", "/dashboard-metrics", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  // Nothing changed and nothing was logged for the refused calls.
  let resp = send(&state, empty_request("GET", &format!("/records/{id}"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let entries = state.store.query_audit(500).await.unwrap();
  assert_eq!(entries[0].details, "Created record with UPIN U-1");

  // Editors may still write records.
  let resp = send(&state, json_request("POST", "/records", Some(EDITOR), record_json("U-2"))).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn source_address_reaches_the_audit_log() {
  let state = make_state().await;
  let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
  let req = request("POST", "/records", Some(ADMIN))
    .header(header::CONTENT_TYPE, "application/json")
    .extension(ConnectInfo(addr))
    .body(Body::from(record_json("U-1").to_string()))
    .unwrap();
  assert_eq!(send(&state, req).await.status(), StatusCode::CREATED);

  let latest = state.store.query_audit(1).await.unwrap().remove(0);
  assert_eq!(latest.action.to_string(), "CREATE");
  assert_eq!(latest.user, ADMIN);
  assert_eq!(latest.role, "Administrators");
  assert_eq!(latest.ip_address, Some(addr.ip()));
}

// ── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_fetch_record() {
  let state = make_state().await;
  let created = create_record(&state, "U-1").await;
  let id = created["id"].as_str().unwrap();

  let resp = send(&state, empty_request("GET", &format!("/records/{id}"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = body_json(resp).await;
  assert_eq!(body["UPIN"], "U-1");
  assert_eq!(body["files"], json!([]));
}

#[tokio::test]
async fn duplicate_upin_is_a_conflict() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let resp = send(&state, json_request("POST", "/records", Some(ADMIN), record_json("U-1"))).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
  assert!(body_json(resp).await["error"].as_str().unwrap().contains("U-1"));
}

#[tokio::test]
async fn invalid_record_is_rejected() {
  let state = make_state().await;
  let mut body = record_json("U-1");
  body["LastTaxPaymtDate"] = json!("1850");
  let resp = send(&state, json_request("POST", "/records", Some(ADMIN), body)).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_record_with_files_from_multipart() {
  let state = make_state().await;
  let record = record_json("U-7");
  let mut parts: Vec<Part<'_>> = record
    .as_object()
    .unwrap()
    .iter()
    .map(|(k, v)| Part::Text(k.as_str(), v.as_str().unwrap()))
    .collect();
  parts.push(Part::File("files", "deed.pdf", "application/pdf", b"deed bytes"));
  parts.push(Part::File("files", "map.png", "image/png", b"map bytes"));

  let resp = send(&state, multipart_request("POST", "/records", Some(ADMIN), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = body_json(resp).await;
  let files = body["files"].as_array().unwrap();
  assert_eq!(files.len(), 2);
  assert_eq!(files[0]["display_name"], "deed.pdf");
  assert_eq!(files[0]["category"], "Uncategorized");
  assert_eq!(files[1]["content_type"], "image/png");
}

#[tokio::test]
async fn list_filters_and_recent() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let mut other = record_json("U-2");
  other["kebele"] = json!("09");
  let resp = send(&state, json_request("POST", "/records", Some(ADMIN), other)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  let resp = send(&state, empty_request("GET", "/records?kebele=09", Some(EDITOR))).await;
  let body = body_json(resp).await;
  assert_eq!(body.as_array().unwrap().len(), 1);
  assert_eq!(body[0]["UPIN"], "U-2");

  let resp = send(&state, empty_request("GET", "/records", Some(EDITOR))).await;
  let body = body_json(resp).await;
  assert_eq!(body[0]["UPIN"], "U-2");
  assert_eq!(body[1]["UPIN"], "U-1");

  let resp =
    send(&state, empty_request("GET", "/records?kebele=09&UPIN=U-2", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = send(&state, empty_request("GET", "/records/recent", Some(EDITOR))).await;
  assert_eq!(body_json(resp).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn check_upin_reports_existence() {
  let state = make_state().await;
  create_record(&state, "U-1").await;

  let resp = send(&state, empty_request("GET", "/records/check-upin/U-1", Some(EDITOR))).await;
  assert_eq!(body_json(resp).await, json!({ "exists": true }));
  let resp = send(&state, empty_request("GET", "/records/check-upin/U-404", Some(EDITOR))).await;
  assert_eq!(body_json(resp).await, json!({ "exists": false }));
}

#[tokio::test]
async fn update_patch_and_delete() {
  let state = make_state().await;
  let created = create_record(&state, "U-1").await;
  let id = created["id"].as_str().unwrap();

  let mut full = record_json("U-1");
  full["PhoneNumber"] = json!("0911");
  let resp = send(&state, json_request("PUT", &format!("/records/{id}"), Some(EDITOR), full)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["PhoneNumber"], "0911");

  let patch = json!({ "FirstAmount": "150.5", "LastTaxPaymtDate": "2001" });
  let resp = send(&state, json_request("PATCH", "/records/upin/U-1", Some(EDITOR), patch)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = body_json(resp).await;
  assert_eq!(body["FirstAmount"], "150.50");
  assert_eq!(body["LastTaxPaymtDate"], "2001-01-01");
  assert_eq!(body["PhoneNumber"], "0911");

  let resp =
    send(&state, json_request("PATCH", "/records/upin/U-404", Some(EDITOR), json!({}))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let resp = send(&state, empty_request("DELETE", &format!("/records/{id}"), Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  let resp = send(&state, empty_request("GET", &format!("/records/{id}"), Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let actions = audit_actions(&state).await;
  assert_eq!(&actions[..3], ["DELETE", "UPDATE", "UPDATE"]);
}

// ── Files ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_add_skips_known_bytes() {
  let state = make_state().await;
  create_record(&state, "U-1").await;

  let parts = [
    Part::File("file", "deed.pdf", "application/pdf", b"same bytes"),
    Part::Text("display_name", "Title deed"),
    Part::Text("category", "required"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let first = body_json(resp).await;
  assert_eq!(first["created"], true);

  let parts = [
    Part::File("file", "copy.pdf", "application/pdf", b"same bytes"),
    Part::Text("display_name", "Another name"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let second = body_json(resp).await;
  assert_eq!(second["created"], false);
  assert_eq!(second["file"]["id"], first["file"]["id"]);

  let resp = send(&state, empty_request("GET", "/records/upin/U-1/files", Some(EDITOR))).await;
  assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn add_requires_display_name() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let parts = [Part::File("file", "deed.pdf", "application/pdf", b"x")];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_upload_checks_array_lengths() {
  let state = make_state().await;
  create_record(&state, "U-1").await;

  let parts = [
    Part::File("files", "a.pdf", "application/pdf", b"a"),
    Part::File("files", "b.pdf", "application/pdf", b"b"),
    Part::Text("names", "A"),
    Part::Text("categories", "x"),
    Part::Text("categories", "y"),
  ];
  let resp = send(&state, multipart_request("PUT", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  assert!(body_json(resp).await["error"].as_str().unwrap().contains("mismatch"));
}

#[tokio::test]
async fn bulk_upload_keeps_same_bytes_under_new_names() {
  let state = make_state().await;
  create_record(&state, "U-1").await;

  let parts = [
    Part::File("files", "a.pdf", "application/pdf", b"same"),
    Part::File("files", "a.pdf", "application/pdf", b"same"),
    Part::Text("names", "First"),
    Part::Text("names", "Second"),
    Part::Text("categories", "plans"),
    Part::Text("categories", "plans"),
  ];
  let resp = send(&state, multipart_request("PUT", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = body_json(resp).await;
  assert_eq!(body["created"].as_array().unwrap().len(), 2);
  assert_eq!(body["skipped"], 0);

  // Re-sending the exact batch stores nothing.
  let resp = send(&state, multipart_request("PUT", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["skipped"], 2);
}

#[tokio::test]
async fn download_replace_and_delete_file() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let parts = [
    Part::File("file", "deed.pdf", "application/pdf", b"original"),
    Part::Text("display_name", "Deed"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  let file = body_json(resp).await["file"].clone();
  let id = file["id"].as_str().unwrap();

  let resp = send(&state, empty_request("GET", &format!("/files/{id}/content"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
  assert_eq!(
    resp.headers()[header::CONTENT_DISPOSITION],
    "attachment; filename=\"deed.pdf\""
  );
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  assert_eq!(&bytes[..], b"original");
  assert_eq!(audit_actions(&state).await[0], "DOWNLOAD");

  let parts = [Part::File("file", "deed-v2.pdf", "application/pdf", b"replacement")];
  let resp = send(&state, multipart_request("PUT", &format!("/files/{id}"), Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let replaced = body_json(resp).await;
  assert_eq!(replaced["id"], file["id"]);
  assert_eq!(replaced["display_name"], "Deed");
  assert_ne!(replaced["content_digest"], file["content_digest"]);

  let resp = send(&state, empty_request("DELETE", &format!("/files/{id}"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  let resp = send(&state, empty_request("GET", &format!("/files/{id}/content"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_file_cannot_be_deleted() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let parts = [
    Part::File("file", "deed.pdf", "application/pdf", b"bytes"),
    Part::Text("display_name", "Deed"),
    Part::Text("category", "required"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(ADMIN), &parts)).await;
  let id = body_json(resp).await["file"]["id"].as_str().unwrap().to_owned();

  let resp = send(&state, empty_request("DELETE", &format!("/files/{id}"), Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_takes_bracketed_names_and_categories_by_index() {
  let state = make_state().await;
  let record = record_json("U-8");
  let mut parts: Vec<Part<'_>> = record
    .as_object()
    .unwrap()
    .iter()
    .map(|(k, v)| Part::Text(k.as_str(), v.as_str().unwrap()))
    .collect();
  parts.push(Part::File("files[]", "deed.pdf", "application/pdf", b"deed bytes"));
  parts.push(Part::File("files[]", "map.png", "image/png", b"map bytes"));
  parts.push(Part::Text("names[]", "Title Deed"));
  parts.push(Part::Text("categories[]", "required"));

  let resp = send(&state, multipart_request("POST", "/records", Some(ADMIN), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = body_json(resp).await;
  let files = body["files"].as_array().unwrap();
  assert_eq!(files[0]["display_name"], "Title Deed");
  assert_eq!(files[0]["category"], "required");
  assert_eq!(files[1]["display_name"], "map.png");
  assert_eq!(files[1]["category"], "Uncategorized");

  let id = files[0]["id"].as_str().unwrap();
  let resp = send(&state, empty_request("DELETE", &format!("/files/{id}"), Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bulk_upload_takes_bracketed_arrays() {
  let state = make_state().await;
  create_record(&state, "U-1").await;

  let parts = [
    Part::File("files[]", "a.pdf", "application/pdf", b"a"),
    Part::File("files[]", "b.pdf", "application/pdf", b"b"),
    Part::Text("names[]", "Site plan"),
    Part::Text("names[]", "Tax receipt"),
    Part::Text("categories[]", "plans"),
    Part::Text("categories[]", "receipts"),
  ];
  let resp = send(&state, multipart_request("PUT", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let created = body_json(resp).await["created"].clone();
  assert_eq!(created[0]["display_name"], "Site plan");
  assert_eq!(created[1]["category"], "receipts");
}

#[tokio::test]
async fn uploaded_file_field_adds_and_replaces() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let parts = [
    Part::File("uploaded_file", "deed.pdf", "application/pdf", b"original"),
    Part::Text("display_name", "Deed"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let id = body_json(resp).await["file"]["id"].as_str().unwrap().to_owned();

  let parts = [Part::File("uploaded_file", "deed-v2.pdf", "application/pdf", b"replacement")];
  let resp = send(&state, multipart_request("PUT", &format!("/files/{id}"), Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["file_name"], "deed-v2.pdf");

  let parts = [Part::Text("display_name", "Deed")];
  let resp = send(&state, multipart_request("PUT", &format!("/files/{id}"), Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  assert!(body_json(resp).await["error"].as_str().unwrap().contains("uploaded_file or file"));
}

#[tokio::test]
async fn large_uploads_round_trip() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let scan: Vec<u8> = (0..form::SPOOL_THRESHOLD * 2 + 17).map(|i| (i % 251) as u8).collect();
  let parts = [
    Part::File("uploaded_file", "scan.tif", "image/tiff", &scan),
    Part::Text("display_name", "Full scan"),
  ];
  let resp = send(&state, multipart_request("POST", "/records/upin/U-1/files", Some(EDITOR), &parts)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let file = body_json(resp).await["file"].clone();
  assert_eq!(file["size_bytes"], scan.len() as u64);
  let id = file["id"].as_str().unwrap();

  let resp = send(&state, empty_request("GET", &format!("/files/{id}/content"), Some(EDITOR))).await;
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  assert_eq!(&bytes[..], &scan[..]);
}

#[tokio::test]
async fn download_encodes_non_ascii_file_names() {
  let state = make_state().await;
  let record = create_record(&state, "U-1").await;
  let record_id = record["id"].as_str().unwrap().parse().unwrap();
  let upload = Upload::new("ካርታ.pdf", Some("application/pdf".into()), &b"map"[..]);
  let input = NewAttachment::single(upload, Some("Map"), None).unwrap();
  let ctx = RequestContext::anonymous();
  let added = state.store.add_file(&ctx, record_id, input).await.unwrap();
  let id = added.attachment().id;

  let resp = send(&state, empty_request("GET", &format!("/files/{id}/content"), Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(
    resp.headers()[header::CONTENT_DISPOSITION],
    "attachment; filename=\"___.pdf\"; filename*=UTF-8''%E1%8A%AB%E1%88%AD%E1%89%B3.pdf"
  );
}

// ── Audit log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn audit_log_is_capped_by_configuration() {
  let state = make_state_with(ApiConfig { audit_log_limit: 2, ..ApiConfig::default() }).await;
  for upin in ["U-1", "U-2", "U-3"] {
    create_record(&state, upin).await;
  }

  let resp = send(&state, empty_request("GET", "/audit-logs?limit=50", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = body_json(resp).await;
  assert_eq!(body.as_array().unwrap().len(), 2);
  assert!(body[0]["details"].as_str().unwrap().contains("U-3"));

  let resp = send(&state, empty_request("GET", "/audit-logs?limit=1", Some(ADMIN))).await;
  assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn audit_log_policy_is_configurable() {
  let state = make_state().await;
  let resp = send(&state, empty_request("GET", "/audit-logs", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let state = make_state_with(ApiConfig {
    audit_log_policy: Policy::AdministratorOrEditor,
    ..ApiConfig::default()
  })
  .await;
  let resp = send(&state, empty_request("GET", "/audit-logs", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
}

// ── Accounts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_is_audited_both_ways() {
  let state = make_state().await;

  let body = json!({ "username": EDITOR, "password": PASSWORD });
  let resp = send(&state, json_request("POST", "/accounts/login", None, body)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["username"], EDITOR);

  let body = json!({ "username": EDITOR, "password": "nope" });
  let resp = send(&state, json_request("POST", "/accounts/login", None, body)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let entries = state.store.query_audit(2).await.unwrap();
  assert_eq!(entries[0].action.to_string(), "LOGIN_FAILED");
  assert_eq!(entries[0].user, "Anonymous");
  assert_eq!(entries[1].action.to_string(), "LOGIN");
  assert_eq!(entries[1].user, EDITOR);
  assert_eq!(entries[1].role, "Editors");
}

#[tokio::test]
async fn logout_requires_identity() {
  let state = make_state().await;
  let resp = send(&state, empty_request("POST", "/accounts/logout", None)).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let resp = send(&state, empty_request("POST", "/accounts/logout", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  assert_eq!(audit_actions(&state).await[0], "LOGOUT");
}

#[tokio::test]
async fn administrators_manage_users_and_roles() {
  let state = make_state().await;

  let body = json!({ "username": "clerk", "password": "pw" });
  let resp = send(&state, json_request("POST", "/accounts/users", Some(ADMIN), body)).await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  let body = json!({ "username": "clerk", "password": "pw" });
  let resp = send(&state, json_request("POST", "/accounts/users", Some(ADMIN), body)).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);

  let resp =
    send(&state, empty_request("POST", "/accounts/users/clerk/roles/Editors", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["roles"], json!(["Editors"]));

  let resp =
    send(&state, empty_request("POST", "/accounts/users/clerk/roles/Wizards", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let resp =
    send(&state, empty_request("DELETE", "/accounts/users/clerk/roles/Editors", Some(ADMIN))).await;
  assert_eq!(body_json(resp).await["roles"], json!([]));

  let resp = send(&state, empty_request("GET", "/accounts/roles", Some(ADMIN))).await;
  assert_eq!(body_json(resp).await, json!(["Administrators", "Editors"]));

  let resp = send(&state, empty_request("GET", "/accounts/users", Some(ADMIN))).await;
  assert_eq!(body_json(resp).await.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn administrators_edit_and_remove_users() {
  let state = make_state().await;
  let body = json!({ "username": "clerk", "password": "pw" });
  send(&state, json_request("POST", "/accounts/users", Some(ADMIN), body)).await;

  let resp = send(&state, empty_request("GET", "/accounts/users/clerk", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(body_json(resp).await["username"], "clerk");
  let resp = send(&state, empty_request("GET", "/accounts/users/nobody", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let body = json!({ "roles": ["Editors"] });
  let resp = send(&state, json_request("PATCH", "/accounts/users/clerk", Some(EDITOR), body)).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let body = json!({ "username": "registrar", "password": "", "roles": ["Editors"] });
  let resp = send(&state, json_request("PATCH", "/accounts/users/clerk", Some(ADMIN), body)).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let user = body_json(resp).await;
  assert_eq!(user["username"], "registrar");
  assert_eq!(user["roles"], json!(["Editors"]));

  let body = json!({ "username": EDITOR });
  let resp = send(&state, json_request("PATCH", "/accounts/users/registrar", Some(ADMIN), body)).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);

  let resp = send(&state, empty_request("DELETE", "/accounts/users/registrar", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  let resp = send(&state, empty_request("DELETE", "/accounts/users/registrar", Some(ADMIN))).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let actions = audit_actions(&state).await;
  assert_eq!(actions[0], "DELETE");
  assert_eq!(actions[1], "UPDATE");
}

// ── Statistics ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn statistics_views_are_counted_as_reports() {
  let state = make_state().await;
  create_record(&state, "U-1").await;
  let mut leased = record_json("U-2");
  leased["possessionStatus"] = json!("Leased");
  leased["FirstAmount"] = json!(10);
  send(&state, json_request("POST", "/records", Some(ADMIN), leased)).await;

  let resp = send(&state, empty_request("GET", "/statistics/possession-status", Some(EDITOR))).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = body_json(resp).await;
  assert_eq!(body.as_array().unwrap().len(), 2);
  assert_eq!(body[0]["value"], "Leased");

  let resp = send(&state, empty_request("GET", "/statistics/amount-paid", Some(EDITOR))).await;
  let body = body_json(resp).await;
  assert_eq!(body[0], json!({ "name": "FirstAmount Paid", "count": 1 }));

  let resp = send(&state, empty_request("GET", "/dashboard-metrics", Some(ADMIN))).await;
  let metrics = body_json(resp).await;
  assert_eq!(metrics["totalRecords"], 2);
  assert_eq!(metrics["registeredUsers"], 2);
  assert_eq!(metrics["reportsGenerated"], 2);
}
