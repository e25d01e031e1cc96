use crate::api::AppState;
use crate::domain::{Address, TokenDetails};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;

/// Metadata and live price of a token on the configured chain.
pub async fn token_details(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TokenDetails>, AppError> {
    let token = Address::parse(&address)
        .map_err(|_| AppError::BadRequest("Invalid contract address".into()))?;
    let chain = &state.engine.config().chain;

    state
        .queries
        .tokens()
        .resolve(&token, chain)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Token not found".into()))
}
