//! Vote acceptance and odds refresh.
//!
//! A batch is all-or-nothing: one SERIALIZABLE transaction inserts every vote,
//! then recomputes odds once per touched category before committing.

use sqlx::{PgConnection, PgPool};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::database;
use crate::error::{
    is_unique_violation, validate_odds_patch, validate_vote_items, AppError, AppResult,
};
use crate::models::{
    Category, CategoryId, Nominee, NomineeId, OddsPatch, RawVoteItem, UserId, Vote, VoteDetail,
    VoteId, VoteItem,
};
use crate::odds_core::{category_odds, OddsUpdate};
use crate::with_serializable_tx;

/// Validate and persist a batch of votes for `user_id`.
///
/// Fails with `Validation` before touching storage, `NotFound` for an unknown
/// user, category or nominee, and `Conflict` when the user already holds a
/// vote for a nominee (or for that slot in the category). Nothing from the
/// batch persists on failure.
pub async fn submit_batch(
    pool: &PgPool,
    user_id: UserId,
    raw_items: &[RawVoteItem],
) -> AppResult<Vec<Vote>> {
    let items = validate_vote_items(raw_items)?;

    let votes = with_serializable_tx!(pool, tx, {
        submit_batch_transaction(&mut tx, user_id, &items).await
    })?;

    info!("User {} submitted {} votes", user_id, votes.len());
    Ok(votes)
}

// Internal transaction logic for submit_batch
async fn submit_batch_transaction(
    conn: &mut PgConnection,
    user_id: UserId,
    items: &[VoteItem],
) -> AppResult<Vec<Vote>> {
    if !database::user_exists(conn, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    // Lock touched categories up front, in id order, so concurrent batches
    // on the same category serialize before reading vote counts.
    let touched: BTreeSet<CategoryId> = items.iter().map(|item| item.category_id).collect();
    let touched: Vec<CategoryId> = touched.into_iter().collect();
    let existing: BTreeSet<CategoryId> =
        database::lock_categories(conn, &touched).await?.into_iter().collect();

    let mut votes = Vec::with_capacity(items.len());
    for item in items {
        if !existing.contains(&item.category_id) {
            return Err(AppError::NotFound(format!("Category {} not found", item.category_id)));
        }

        match database::get_nominee(conn, item.nominee_id).await? {
            Some(nominee) if nominee.category_id == item.category_id => {}
            Some(_) => {
                return Err(AppError::NotFound(format!(
                    "Nominee {} not found in category {}",
                    item.nominee_id, item.category_id
                )))
            }
            None => {
                return Err(AppError::NotFound(format!("Nominee {} not found", item.nominee_id)))
            }
        }

        let vote = database::insert_vote(conn, user_id, item).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "User {} already voted for nominee {} or already has a {} vote in category {}",
                    user_id, item.nominee_id, item.vote_type, item.category_id
                ))
            } else {
                AppError::from(e)
            }
        })?;
        votes.push(vote);
    }

    for category_id in &touched {
        update_category_odds(conn, *category_id).await?;
    }

    Ok(votes)
}

/// Recompute and persist the odds of every nominee in a category.
///
/// Must run inside the transaction that holds the category row lock.
pub async fn update_category_odds(
    conn: &mut PgConnection,
    category_id: CategoryId,
) -> AppResult<Vec<OddsUpdate>> {
    let category = database::get_category(conn, category_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category {} not found", category_id)))?;
    let tally = database::winner_tally(conn, category_id).await?;

    let updates = category_odds(&category.nominees, &tally);
    for update in &updates {
        database::save_nominee_odds(conn, update).await?;
        debug!(
            "Odds for nominee {} in category {}: winner {} -> {}, loser {} -> {}",
            update.nominee_id,
            category_id,
            update.odds.prev_winner_odds,
            update.odds.curr_winner_odds,
            update.odds.prev_loser_odds,
            update.odds.curr_loser_odds
        );
    }

    info!(
        "Updated odds for {} nominees in category {} ({} winner votes)",
        updates.len(),
        category_id,
        tally.total
    );
    Ok(updates)
}

/// A category with its nominees and their current odds
pub async fn category_with_odds(pool: &PgPool, category_id: CategoryId) -> AppResult<Category> {
    let mut conn = pool.acquire().await?;
    database::get_category(&mut conn, category_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category {} not found", category_id)))
}

/// Manually override some of a nominee's odds. The next batch in the
/// category recomputes them from votes again.
///
/// Returns the nominee as stored after the update.
pub async fn override_odds(
    pool: &PgPool,
    nominee_id: NomineeId,
    patch: OddsPatch,
) -> AppResult<Nominee> {
    validate_odds_patch(&patch)?;

    with_serializable_tx!(pool, tx, {
        override_odds_transaction(&mut tx, nominee_id, &patch).await
    })
}

async fn override_odds_transaction(
    conn: &mut PgConnection,
    nominee_id: NomineeId,
    patch: &OddsPatch,
) -> AppResult<Nominee> {
    let nominee = database::get_nominee(conn, nominee_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Nominee {} not found", nominee_id)))?;
    let odds = patch.apply(nominee.odds);
    database::save_nominee_odds(conn, &OddsUpdate { nominee_id, odds }).await?;

    let stored = database::get_nominee(conn, nominee_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Nominee {} not found", nominee_id)))?;
    info!("Odds for nominee {} overridden", nominee_id);
    Ok(stored)
}

/// Hard delete one vote
pub async fn delete_vote(pool: &PgPool, vote_id: VoteId) -> AppResult<()> {
    if !database::delete_vote(pool, vote_id).await? {
        return Err(AppError::NotFound(format!("Vote {} not found", vote_id)));
    }
    info!("Deleted vote {}", vote_id);
    Ok(())
}

/// A user's votes with category and nominee context, to resume a prediction session
pub async fn find_by_user(pool: &PgPool, user_id: UserId) -> AppResult<Vec<VoteDetail>> {
    database::votes_for_user(pool, user_id).await
}

/// Every vote with context
pub async fn list_all(pool: &PgPool) -> AppResult<Vec<VoteDetail>> {
    database::all_votes(pool).await
}
