//! Official winner designation.
//!
//! Flag changes commit under the scoring lock; the score recompute follows in
//! its own transaction and notification fan-out runs detached.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;

use crate::database;
use crate::error::{AppError, AppResult};
use crate::models::{CategoryId, NomineeId};
use crate::notifications::{self, NotificationGateway};
use crate::scoring_api::{self, RecomputeSummary};
use crate::with_serializable_tx;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerOutcome {
    pub category_id: CategoryId,
    pub nominee_id: NomineeId,
    pub previous_winner: Option<NomineeId>,
    pub recompute: RecomputeSummary,
}

/// What the flag transaction learned, for logging and notification
struct Designation {
    category_id: CategoryId,
    category_name: String,
    nominee_title: String,
    previous_winner: Option<NomineeId>,
}

/// Designate `nominee_id` as its category's winner, recompute every score and
/// announce the result.
///
/// Re-designating the current winner changes no data but still recomputes
/// and re-notifies.
pub async fn set_winner(
    pool: &PgPool,
    gateway: Arc<dyn NotificationGateway>,
    nominee_id: NomineeId,
) -> AppResult<WinnerOutcome> {
    let designation = with_serializable_tx!(pool, tx, {
        set_winner_transaction(&mut tx, nominee_id).await
    })?;

    info!(
        "Nominee {} is now the winner of category {} (previous winner: {:?})",
        nominee_id, designation.category_id, designation.previous_winner
    );

    let recompute = scoring_api::recompute_all(pool).await?;

    let notify_pool = pool.clone();
    let Designation { category_id, category_name, nominee_title, previous_winner } = designation;
    tokio::spawn(async move {
        notifications::announce_winner(
            &notify_pool,
            gateway.as_ref(),
            &category_name,
            &nominee_title,
        )
        .await;
    });

    Ok(WinnerOutcome {
        category_id,
        nominee_id,
        previous_winner,
        recompute,
    })
}

// Internal transaction logic for set_winner
async fn set_winner_transaction(
    conn: &mut PgConnection,
    nominee_id: NomineeId,
) -> AppResult<Designation> {
    database::acquire_scoring_lock(conn).await?;

    let nominee = database::get_nominee(conn, nominee_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Nominee {} not found", nominee_id)))?;

    if database::lock_categories(conn, &[nominee.category_id]).await?.is_empty() {
        return Err(AppError::NotFound(format!("Category {} not found", nominee.category_id)));
    }
    let category = database::get_category(conn, nominee.category_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category {} not found", nominee.category_id)))?;

    let previous_winner = database::current_winner(conn, category.id).await?;
    database::designate_winner_flag(conn, category.id, nominee.id).await?;

    Ok(Designation {
        category_id: category.id,
        category_name: category.name,
        nominee_title: nominee.title,
        previous_winner,
    })
}

/// Clear every winner flag in every category. Scores are left as they are.
pub async fn reset_all_winners(pool: &PgPool) -> AppResult<u64> {
    let cleared = with_serializable_tx!(pool, tx, {
        reset_all_winners_transaction(&mut tx).await
    })?;
    info!("Cleared winner flag on {} nominees", cleared);
    Ok(cleared)
}

async fn reset_all_winners_transaction(conn: &mut PgConnection) -> AppResult<u64> {
    database::acquire_scoring_lock(conn).await?;
    database::clear_all_winner_flags(conn).await
}
