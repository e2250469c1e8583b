//! Simple REST API server demo for the settlement core.
//!
//! Run with: `cargo run --example server`
//!
//! The acting user is taken from the `x-user-id` header. On startup the
//! server seeds a group (alice, bob, carol) and one shared dinner receipt.
//!
//! ## Endpoints
//!
//! - `GET  /settlements/{id}` - Get a settlement
//! - `POST /settlements/{id}/paid` - Mark a settlement paid
//! - `POST /settlements/{id}/unpaid` - Revert a payment
//! - `GET  /balances` - Net balances of the acting user, per currency
//! - `GET  /balances/{user}` - Netted balance between the acting user and another
//! - `GET  /groups/{id}/balances` - Per-member balances of a group
//! - `GET  /history` - Pending and completed settlements of the acting user
//!
//! ## Example Usage
//!
//! ```bash
//! # Bob's balances
//! curl -H "x-user-id: bob" http://localhost:3000/balances
//!
//! # Bob pays Alice back
//! curl -X POST -H "x-user-id: bob" http://localhost:3000/settlements/1/paid
//!
//! # Group overview in euros
//! curl -H "x-user-id: alice" "http://localhost:3000/groups/1/balances?currency=EUR"
//! ```

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use billo_core::{
    AssignmentMap, BalanceSummary, BilloError, Config, Currency, ErrorKind, GroupId, ItemInput,
    Ledger, MemberBalance, Money, PairBalance, ReceiptInput, Role, Settlement, SettlementId,
    UserId, accept_manual,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct CurrencyQuery {
    pub currency: Option<String>,
}

/// Response body for a pair balance.
#[derive(Debug, Serialize)]
pub struct PairResponse {
    pub debtor: Option<UserId>,
    pub creditor: Option<UserId>,
    pub amount: Money,
    pub currency: Currency,
    pub settled: bool,
}

impl From<PairBalance> for PairResponse {
    fn from(pair: PairBalance) -> Self {
        let direction = pair
            .direction()
            .map(|(debtor, creditor, amount)| (debtor.clone(), creditor.clone(), amount));
        match direction {
            Some((debtor, creditor, amount)) => PairResponse {
                debtor: Some(debtor),
                creditor: Some(creditor),
                amount,
                currency: pair.currency,
                settled: false,
            },
            None => PairResponse {
                debtor: None,
                creditor: None,
                amount: Money::ZERO,
                currency: pair.currency,
                settled: true,
            },
        }
    }
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

// === Error Handling ===

/// Wrapper for converting `BilloError` into HTTP responses.
pub struct AppError(BilloError);

impl From<BilloError> for AppError {
    fn from(err: BilloError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            ErrorKind::Authorization => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorKind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// The verified user ID forwarded by the identity layer.
pub struct Actor(UserId);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| Actor(UserId::from(value)))
            .ok_or_else(|| AppError(BilloError::access_denied("missing x-user-id header")))
    }
}

fn currency_or_default(query: &CurrencyQuery, config: &Config) -> Result<Currency, AppError> {
    match &query.currency {
        Some(code) => Ok(Currency::from_code(code)?),
        None => Ok(config.default_currency),
    }
}

// === Handlers ===

/// GET /settlements/{id}
async fn get_settlement(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<u64>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(state.ledger.settlement(&actor, SettlementId(id))?))
}

/// POST /settlements/{id}/paid
async fn mark_paid(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<u64>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(state.ledger.mark_paid(&actor, SettlementId(id))?))
}

/// POST /settlements/{id}/unpaid
async fn mark_unpaid(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<u64>,
) -> Result<Json<Settlement>, AppError> {
    Ok(Json(state.ledger.mark_unpaid(&actor, SettlementId(id))?))
}

/// GET /balances
async fn balances(State(state): State<AppState>, Actor(actor): Actor) -> Json<Vec<BalanceSummary>> {
    Json(state.ledger.net_balances(&actor))
}

/// GET /balances/{user}
async fn pair_balance(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(other): Path<String>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Json<PairResponse>, AppError> {
    let currency = currency_or_default(&query, state.ledger.config())?;
    let pair = state
        .ledger
        .pair_balance(&actor, &UserId::new(other), currency);
    Ok(Json(pair.into()))
}

/// GET /groups/{id}/balances
async fn group_balances(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<u64>,
    Query(query): Query<CurrencyQuery>,
) -> Result<Json<Vec<MemberBalance>>, AppError> {
    let currency = currency_or_default(&query, state.ledger.config())?;
    Ok(Json(state.ledger.group_balances(&actor, GroupId(id), currency)?))
}

/// GET /history
async fn history(State(state): State<AppState>, Actor(actor): Actor) -> Json<Vec<Settlement>> {
    Json(state.ledger.history(&actor))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/settlements/{id}", get(get_settlement))
        .route("/settlements/{id}/paid", post(mark_paid))
        .route("/settlements/{id}/unpaid", post(mark_unpaid))
        .route("/balances", get(balances))
        .route("/balances/{user}", get(pair_balance))
        .route("/groups/{id}/balances", get(group_balances))
        .route("/history", get(history))
        .with_state(state)
}

// === Seed data ===

/// Alice paid for dinner; Bob and Carol shared the pizza with her.
fn seed(ledger: &Ledger) -> Result<(), BilloError> {
    let alice = UserId::from("alice");
    let group = ledger.create_group(&alice, "Flatmates", None, Some("🏠".into()))?;
    for member in ["bob", "carol"] {
        ledger.add_member(&alice, group.id, &UserId::from(member), Role::Member)?;
    }

    let receipt = ledger.create_receipt(&alice, Some(group.id), None)?;
    let draft = accept_manual(&ReceiptInput {
        merchant_name: Some("Luigi's".into()),
        purchase_date: Some("2025-03-01".into()),
        tax: Some("3.00".into()),
        items: vec![
            ItemInput::new("Pizza", "1", "30.00", "30.00"),
            ItemInput::new("Wine", "1", "18.00", "18.00"),
        ],
        ..Default::default()
    })?;
    let receipt = ledger.confirm_items(&alice, receipt.id, draft)?;

    let members = ledger.group(&alice, group.id)?.member_ids();
    let mut assignments = AssignmentMap::split_evenly(&receipt.items[..1], &members);
    assignments.toggle_assignment(receipt.items[1].id, alice.clone());
    assignments.toggle_assignment(receipt.items[1].id, UserId::from("bob"));
    ledger.save_assignments(&alice, receipt.id, &assignments)?;
    Ok(())
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).compact())
        .init();

    let ledger = Arc::new(Ledger::new(Config::default()));
    seed(&ledger)?;
    let state = AppState { ledger };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!("Billo API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  GET  /settlements/{{id}}         - Get a settlement");
    println!("  POST /settlements/{{id}}/paid    - Mark paid");
    println!("  POST /settlements/{{id}}/unpaid  - Revert a payment");
    println!("  GET  /balances                 - Your balances");
    println!("  GET  /balances/{{user}}          - Balance with another user");
    println!("  GET  /groups/{{id}}/balances     - Group balances");
    println!("  GET  /history                  - Your settlement history");

    axum::serve(listener, app).await?;
    Ok(())
}
