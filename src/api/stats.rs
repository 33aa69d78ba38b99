//! Statistics endpoints

use axum::{extract::State, Json};

use crate::{error::AppResult, models::loan::LoanStats, AppState};

/// Active and overdue loan counts
#[utoipa::path(
    get,
    path = "/stats/loans",
    tag = "stats",
    responses(
        (status = 200, description = "Loan counters", body = LoanStats)
    )
)]
pub async fn get_loan_stats(State(state): State<AppState>) -> AppResult<Json<LoanStats>> {
    let stats = state.services.loans.stats().await?;
    Ok(Json(stats))
}
