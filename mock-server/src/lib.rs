//! Mock platform API used by the core integration tests.
//!
//! Serves a small campaign CRUD subset plus echo endpoints that reflect
//! what actually arrived on the wire (body, query string, headers, cookies),
//! a multipart sink, a binary media endpoint, and a slow endpoint for
//! cancellation tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Multipart, Path, RawQuery, State},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderName, StatusCode,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub goal_cents: u64,
    pub pledged_cents: u64,
}

#[derive(Deserialize)]
pub struct CreateCampaign {
    pub title: String,
    pub goal_cents: u64,
}

pub type Db = Arc<RwLock<HashMap<Uuid, Campaign>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/campaigns/{id}", get(get_campaign).delete(delete_campaign))
        .route("/campaigns/{id}/media", post(upload_media))
        .route("/echo/body", post(echo_body))
        .route("/echo/query", get(echo_query))
        .route("/echo/headers", get(echo_headers))
        .route("/cookies/set", get(set_cookie))
        .route("/cookies/echo", get(echo_cookies))
        .route("/media/poster", get(poster))
        .route("/slow", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn ping() -> Json<&'static str> {
    Json("pong")
}

async fn list_campaigns(State(db): State<Db>) -> Json<Vec<Campaign>> {
    let campaigns = db.read().await;
    Json(campaigns.values().cloned().collect())
}

async fn create_campaign(
    State(db): State<Db>,
    Json(input): Json<CreateCampaign>,
) -> (StatusCode, Json<Campaign>) {
    let campaign = Campaign {
        id: Uuid::new_v4(),
        title: input.title,
        goal_cents: input.goal_cents,
        pledged_cents: 0,
    };
    db.write().await.insert(campaign.id, campaign.clone());
    (StatusCode::CREATED, Json(campaign))
}

async fn get_campaign(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, StatusCode> {
    let campaigns = db.read().await;
    campaigns
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_campaign(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let mut campaigns = db.write().await;
    campaigns
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Accepts any multipart upload and reports what arrived, part by part.
async fn upload_media(
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        parts.push(json!({
            "name": name,
            "file_name": file_name,
            "size": data.len(),
        }));
    }
    Ok(Json(json!({ "campaign": id, "parts": parts })))
}

async fn echo_body(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

/// Returns the raw query string exactly as received, so tests can assert
/// ordering and omission without any server-side re-parsing.
async fn echo_query(RawQuery(query): RawQuery) -> Json<String> {
    Json(query.unwrap_or_default())
}

/// Returns the authorization header and any `x-*` headers that arrived.
async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let mut echoed = serde_json::Map::new();
    for (name, value) in &headers {
        let name = name.as_str();
        if name == "authorization" || name.starts_with("x-") {
            echoed.insert(
                name.to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            );
        }
    }
    Json(Value::Object(echoed))
}

/// Issues a session cookie; `/cookies/echo` reports whether it came back.
async fn set_cookie() -> ([(HeaderName, &'static str); 1], Json<&'static str>) {
    ([(SET_COOKIE, "session=s3cr3t; Path=/")], Json("set"))
}

async fn echo_cookies(headers: HeaderMap) -> Json<String> {
    Json(
        headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    )
}

/// A binary body that is deliberately not valid UTF-8.
pub const POSTER_BYTES: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00];

async fn poster() -> ([(HeaderName, &'static str); 1], &'static [u8]) {
    ([(CONTENT_TYPE, "image/png")], POSTER_BYTES)
}

async fn slow() -> Json<&'static str> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json("done")
}
