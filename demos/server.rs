// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! REST API for the point ledger.
//!
//! Run with: cargo run --example server
//!
//! ```bash
//! # Charge points
//! curl -X PATCH http://localhost:3000/point/1/charge \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 100}'
//!
//! # Use points
//! curl -X PATCH http://localhost:3000/point/1/use \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 30}'
//!
//! # Get balance
//! curl http://localhost:3000/point/1
//!
//! # Get history
//! curl http://localhost:3000/point/1/histories
//! ```

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use point_ledger::{Engine, LedgerError, PointHistory, TransactionType, UserId, UserPoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for charge and use.
#[derive(Debug, Deserialize)]
pub struct PointRequest {
    pub amount: i64,
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
    pub engine: Arc<Engine>,
}

// === Error Handling ===

pub enum AppError {
    Ledger(LedgerError),
    InvalidUserId(String),
    InvalidBody(String),
    Internal(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            AppError::Ledger(err) => {
                let (status, code) = match &err {
                    LedgerError::InvalidAmount { .. } => {
                        (StatusCode::BAD_REQUEST, "INVALID_AMOUNT")
                    }
                    LedgerError::InsufficientBalance { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
                    }
                    LedgerError::BalanceOverflow { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "BALANCE_OVERFLOW")
                    }
                    LedgerError::ReadFailed { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "READ_FAILED")
                    }
                    LedgerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_FAILURE"),
                };
                (status, code, err.to_string())
            }
            AppError::InvalidUserId(raw) => (
                StatusCode::BAD_REQUEST,
                "INVALID_USER_ID",
                format!("invalid user id '{raw}' (must be a positive integer)"),
            ),
            // Missing, fractional or non-numeric amounts
            AppError::InvalidBody(message) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", message),
            AppError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, AppError> {
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(UserId(id)),
        _ => Err(AppError::InvalidUserId(raw.to_string())),
    }
}

/// Runs a blocking engine call off the async workers.
async fn blocking<T, F>(state: AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state.engine))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

// === Handlers ===

/// GET /point/{id} - Get a user's balance.
async fn point(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserPoint>, AppError> {
    let user_id = parse_user_id(&id)?;
    blocking(state, move |engine| engine.get_point(user_id))
        .await
        .map(Json)
}

/// GET /point/{id}/histories - Get a user's charge/use history.
async fn histories(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PointHistory>>, AppError> {
    let user_id = parse_user_id(&id)?;
    blocking(state, move |engine| engine.history(user_id))
        .await
        .map(Json)
}

/// PATCH /point/{id}/charge - Charge points.
async fn charge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<PointRequest>, JsonRejection>,
) -> Result<Json<UserPoint>, AppError> {
    let Json(request) = request?;
    mutate(state, &id, TransactionType::Charge, request.amount).await
}

/// PATCH /point/{id}/use - Use points.
async fn use_points(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<PointRequest>, JsonRejection>,
) -> Result<Json<UserPoint>, AppError> {
    let Json(request) = request?;
    mutate(state, &id, TransactionType::Use, request.amount).await
}

async fn mutate(
    state: AppState,
    id: &str,
    kind: TransactionType,
    amount: i64,
) -> Result<Json<UserPoint>, AppError> {
    let user_id = parse_user_id(id)?;
    blocking(state, move |engine| engine.apply(kind, user_id, amount))
        .await
        .map(Json)
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/point/{id}", get(point))
        .route("/point/{id}/histories", get(histories))
        .route("/point/{id}/charge", patch(charge))
        .route("/point/{id}/use", patch(use_points))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Point ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  GET   /point/:id            - Get balance");
    println!("  GET   /point/:id/histories  - Get charge/use history");
    println!("  PATCH /point/:id/charge     - Charge points");
    println!("  PATCH /point/:id/use        - Use points");

    axum::serve(listener, app).await.unwrap();
}
