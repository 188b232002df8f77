use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiFailure, Authed};
use crate::errors::ApiError;
use crate::models::{CreateRoundTableRequest, ResolveRequest, SpeakRequest};
use crate::roundtable::RoundTableService;
use crate::storage::RoundTableFilter;

#[post("/api/round-tables", format = "json", data = "<body>")]
pub async fn create_round_table(
    round_tables: &State<RoundTableService>,
    _auth: Authed,
    body: Json<CreateRoundTableRequest>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    let rt = round_tables.create(body.into_inner()).await?;
    Ok((Status::Created, Json(serde_json::to_value(rt).unwrap_or_default())))
}

#[get("/api/round-tables?<participant>&<status>")]
pub async fn list_round_tables(
    round_tables: &State<RoundTableService>,
    _auth: Authed,
    participant: Option<String>,
    status: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let list = round_tables
        .list(RoundTableFilter {
            status,
            participant,
        })
        .await?;
    Ok(Json(serde_json::json!({
        "round_tables": list,
        "count": list.len(),
    })))
}

#[get("/api/round-tables/<id>?<caller>")]
pub async fn get_round_table(
    round_tables: &State<RoundTableService>,
    _auth: Authed,
    id: &str,
    caller: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let caller = caller
        .ok_or_else(|| ApiError::MissingField("caller query param is required".to_string()))?;
    let rt = round_tables.get(id, &caller).await?;
    Ok(Json(serde_json::to_value(rt).unwrap_or_default()))
}

#[post("/api/round-tables/<id>/speak", format = "json", data = "<body>")]
pub async fn speak_round_table(
    round_tables: &State<RoundTableService>,
    _auth: Authed,
    id: &str,
    body: Json<SpeakRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let rt = round_tables.speak(id, body.into_inner()).await?;
    Ok(Json(serde_json::to_value(rt).unwrap_or_default()))
}

#[post("/api/round-tables/<id>/resolve", format = "json", data = "<body>")]
pub async fn resolve_round_table(
    round_tables: &State<RoundTableService>,
    _auth: Authed,
    id: &str,
    body: Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let rt = round_tables.resolve(id, body.into_inner()).await?;
    Ok(Json(serde_json::to_value(rt).unwrap_or_default()))
}
