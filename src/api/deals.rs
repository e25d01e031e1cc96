use crate::api::AppState;
use crate::domain::{Address, DealId, Decimal, NewDeal};
use crate::error::AppError;
use crate::query::{DealDetails, DealFilter, FeaturedDeals};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealRequest {
    pub name: String,
    pub description: Option<String>,
    pub contract_address: String,
    pub coin_owner_address: String,
    pub minimum_amount_to_hold: Decimal,
    pub minimum_days_to_hold: u32,
    pub reward: Decimal,
    pub max_rewards: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub code: Option<String>,
}

impl From<CreateDealRequest> for NewDeal {
    fn from(req: CreateDealRequest) -> Self {
        NewDeal {
            name: req.name,
            description: req.description,
            contract_address: req.contract_address,
            coin_owner_address: req.coin_owner_address,
            minimum_amount_to_hold: req.minimum_amount_to_hold,
            minimum_days_to_hold: req.minimum_days_to_hold,
            reward: req.reward,
            max_rewards: req.max_rewards,
            start_date: req.start_date,
            end_date: req.end_date,
            referral_code: req.code.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealResponse {
    pub deal_id: DealId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub deal_id: DealId,
    pub transaction_hash: String,
    /// Referral code; only read on activation.
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub deal_id: DealId,
    pub address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub has_balance: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn create_deal(
    State(state): State<AppState>,
    Json(body): Json<CreateDealRequest>,
) -> Result<(StatusCode, Json<CreateDealResponse>), AppError> {
    let deal_id = state.engine.create(body.into()).await?;
    Ok((StatusCode::CREATED, Json(CreateDealResponse { deal_id })))
}

pub async fn get_deal(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<DealDetails>, AppError> {
    state
        .queries
        .get(DealId::new(id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Deal does not exist".into()))
}

pub async fn deals_by_coin(
    Path(coin): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DealDetails>>, AppError> {
    let coin = Address::parse(&coin)
        .map_err(|_| AppError::BadRequest("Invalid contract address".into()))?;
    list(&state, DealFilter::ByCoin(coin)).await
}

pub async fn deals_by_player(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DealDetails>>, AppError> {
    list(&state, DealFilter::ByPlayer(parse_address(&address)?)).await
}

pub async fn deals_by_owner(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DealDetails>>, AppError> {
    list(&state, DealFilter::ByOwner(parse_address(&address)?)).await
}

pub async fn explore(State(state): State<AppState>) -> Result<Json<Vec<DealDetails>>, AppError> {
    Ok(Json(state.queries.explore().await?))
}

pub async fn featured(State(state): State<AppState>) -> Result<Json<FeaturedDeals>, AppError> {
    Ok(Json(state.queries.featured().await?))
}

pub async fn store_commission(
    State(state): State<AppState>,
    Json(body): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state
        .engine
        .store_commission(body.deal_id, &body.transaction_hash)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Deal commission paid",
        }),
    ))
}

pub async fn activate(
    State(state): State<AppState>,
    Json(body): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let code = body.code.as_deref().filter(|c| !c.trim().is_empty());
    state
        .engine
        .mark_as_activated(body.deal_id, &body.transaction_hash, code)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Deal marked as activated",
        }),
    ))
}

pub async fn join(
    State(state): State<AppState>,
    Json(body): Json<JoinRequest>,
) -> Result<(StatusCode, Json<JoinResponse>), AppError> {
    let has_balance = state.engine.join(&body.address, body.deal_id).await?;
    Ok((StatusCode::CREATED, Json(JoinResponse { has_balance })))
}

async fn list(state: &AppState, filter: DealFilter) -> Result<Json<Vec<DealDetails>>, AppError> {
    Ok(Json(state.queries.list(filter).await?))
}

fn parse_address(raw: &str) -> Result<Address, AppError> {
    Address::parse(raw).map_err(|_| AppError::BadRequest("Invalid address".into()))
}
