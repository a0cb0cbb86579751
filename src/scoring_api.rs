//! Score recomputation against the database, using scoring_core for the math

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use crate::database;
use crate::error::AppResult;
use crate::scoring_core::compute_scores;
use crate::with_serializable_tx;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    pub users_updated: u64,
    pub categories_scored: usize,
    pub votes_considered: usize,
    pub total_points: Decimal,
}

/// Rebuild every user's score from scratch.
///
/// Runs as one transaction under the scoring lock: either every user gets the
/// new score or none does. Uses the odds as they stand now, so each run
/// re-prices every past bet.
pub async fn recompute_all(pool: &PgPool) -> AppResult<RecomputeSummary> {
    let summary = with_serializable_tx!(pool, tx, {
        recompute_all_transaction(&mut tx).await
    })?;

    info!(
        "Scores recomputed: {} users, {} decided categories, {} votes, {} points awarded",
        summary.users_updated,
        summary.categories_scored,
        summary.votes_considered,
        summary.total_points
    );
    Ok(summary)
}

// Internal transaction logic for recompute_all
async fn recompute_all_transaction(conn: &mut PgConnection) -> AppResult<RecomputeSummary> {
    database::acquire_scoring_lock(conn).await?;

    let user_ids = database::list_user_ids(conn).await?;
    let categories = database::list_decided_categories(conn).await?;
    let category_ids: Vec<_> = categories.iter().map(|c| c.id).collect();
    let votes = database::votes_in_categories(conn, &category_ids).await?;

    let scores = compute_scores(&user_ids, &categories, &votes);
    for (user_id, score) in scores.iter().filter(|(_, s)| !s.is_zero()) {
        debug!("User {}: {} pts", user_id, score);
    }

    let users_updated = database::save_scores(conn, &scores).await?;

    Ok(RecomputeSummary {
        users_updated,
        categories_scored: categories.len(),
        votes_considered: votes.len(),
        total_points: scores.values().copied().sum(),
    })
}

/// Administrative escape hatch: zero every score without recomputing
pub async fn reset_all_scores(pool: &PgPool) -> AppResult<u64> {
    let rows = database::reset_scores(pool).await?;
    info!("Reset scores of {} users to zero", rows);
    Ok(rows)
}
