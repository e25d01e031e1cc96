pub mod deals;
pub mod health;
pub mod tokens;

use crate::db::Repository;
use crate::lifecycle::DealEngine;
use crate::query::DealQueries;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub engine: Arc<DealEngine>,
    pub queries: Arc<DealQueries>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, engine: Arc<DealEngine>, queries: Arc<DealQueries>) -> Self {
        Self {
            repo,
            engine,
            queries,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/deals", post(deals::create_deal))
        .route("/deals/id/:id", get(deals::get_deal))
        .route("/deals/coin/:coin", get(deals::deals_by_coin))
        .route("/deals/player/:address", get(deals::deals_by_player))
        .route("/deals/owner/:address", get(deals::deals_by_owner))
        .route("/deals/all", get(deals::explore))
        .route("/deals/featured", get(deals::featured))
        .route("/deals/commission", post(deals::store_commission))
        .route("/deals/activate", post(deals::activate))
        .route("/deals/join", post(deals::join))
        .route("/tokens/details/:address", get(tokens::token_details))
        .layer(cors)
        .with_state(state)
}
