//! Echo server the HTTP action handlers are exercised against.
//!
//! Echo routes answer with `{method, query, headers, body}` and every
//! response carries an `x-request` header holding the query and headers the
//! server observed, so callers can inspect a request even when only the
//! response headers were captured.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Content served at `/static/file.txt`.
pub const STATIC_FILE_TXT: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\
Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\
Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris.\n";

/// Header carrying the JSON summary of the observed request.
pub const X_REQUEST: &str = "x-request";

/// Uploaded multipart files, retrievable through `/uploads/{id}`.
pub type Uploads = Arc<RwLock<HashMap<Uuid, Vec<u8>>>>;

/// Multipart file part as reported back by `/form/multipart`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: Uuid,
    pub filename: Option<String>,
    pub size: usize,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub fn app() -> Router {
    let uploads: Uploads = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/json", any(echo_json))
        .route("/json/500", any(echo_json_500))
        .route("/form/urlencoded", any(echo_urlencoded))
        .route("/form/multipart", any(echo_multipart))
        .route("/uploads/{id}", get(get_upload))
        .route("/static/{name}", get(get_static))
        .route("/status/{code}", any(echo_status))
        .route("/slow", any(slow))
        .layer(middleware::from_fn(record_request))
        .with_state(uploads)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn record_request(request: Request, next: Next) -> Response {
    let query = parse_query(request.uri().query());
    let recorded = json!({
        "query": query,
        "headers": headers_to_json(request.headers()),
    });
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&recorded.to_string()) {
        response.headers_mut().insert(X_REQUEST, value);
    }
    response
}

async fn echo_json(
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let body = parse_json_body(&body)?;
    Ok(Json(echo(&method, query, &headers, body)))
}

async fn echo_json_500(
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let body = parse_json_body(&body)?;
    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(echo(&method, query, &headers, body)),
    ))
}

async fn echo_urlencoded(
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let form: Map<String, Value> = pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    Ok(Json(echo(&method, query, &headers, Value::Object(form))))
}

async fn echo_multipart(
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(uploads): State<Uploads>,
    mut multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    let mut fields = Map::new();
    let mut files = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let is_file = filename.is_some() || field.content_type().is_some();
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

        if is_file {
            let uploaded = UploadedFile {
                id: Uuid::new_v4(),
                filename,
                size: data.len(),
            };
            uploads.write().await.insert(uploaded.id, data.to_vec());
            push_entry(&mut files, name, json!(uploaded));
        } else {
            let text = String::from_utf8_lossy(&data).into_owned();
            push_entry(&mut fields, name, Value::String(text));
        }
    }

    let body = json!({ "fields": fields, "files": files });
    Ok(Json(echo(&method, query, &headers, body)))
}

async fn get_upload(
    State(uploads): State<Uploads>,
    Path(id): Path<Uuid>,
) -> Result<Vec<u8>, StatusCode> {
    let uploads = uploads.read().await;
    uploads.get(&id).cloned().ok_or(StatusCode::NOT_FOUND)
}

async fn get_static(Path(name): Path<String>) -> Result<impl IntoResponse, StatusCode> {
    match name.as_str() {
        "file.txt" => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            STATIC_FILE_TXT,
        )),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn echo_status(
    method: Method,
    Path(code): Path<u16>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(echo(&method, query, &headers, Value::Null)))
}

async fn slow(Query(params): Query<SlowParams>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    Json(json!({ "slept": params.ms }))
}

fn echo(method: &Method, query: HashMap<String, String>, headers: &HeaderMap, body: Value) -> Value {
    json!({
        "method": method.as_str(),
        "query": query,
        "headers": headers_to_json(headers),
        "body": body,
    })
}

/// Empty bodies echo back as `{}`, matching what a JSON body parser reports.
fn parse_json_body(body: &[u8]) -> Result<Value, StatusCode> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|_| StatusCode::BAD_REQUEST)
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

fn headers_to_json(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect()
}

fn push_entry(map: &mut Map<String, Value>, key: String, value: Value) {
    if let Value::Array(items) = map.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
        items.push(value);
    }
}
