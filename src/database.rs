// Database connection, schema and query functions
use anyhow::Result;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::db_adapter::{DbAdapter, NOMINEE_COLUMNS, VOTE_COLUMNS};
use crate::error::AppError;
use crate::models::{
    Category, CategoryId, Nominee, NomineeId, UserId, UserScore, Vote, VoteDetail, VoteId, VoteItem,
};
use crate::odds_core::{OddsUpdate, WinnerTally};

// Configuration constants for concurrency control
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const BASE_RETRY_DELAY_MS: u64 = 10;

/// Advisory lock serializing score recomputation and winner changes
pub const SCORING_LOCK_KEY: i64 = 0x6261_6c6c_6f74; // "ballot"

/// SQLSTATEs worth retrying: serialization_failure, deadlock_detected
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

/// Execute a block inside a SERIALIZABLE transaction, retrying on
/// serialization failures and deadlocks with exponential backoff and jitter.
///
/// The block sees the transaction as `$tx_var` and must evaluate to
/// `AppResult<T>`. Returning `Err` drops the transaction, which rolls it back.
#[macro_export]
macro_rules! with_serializable_tx {
    ($pool:expr, $tx_var:ident, $body:block) => {{
        let mut attempt: u32 = 1;
        loop {
            let result = async {
                let mut $tx_var = $pool.begin().await?;
                sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                    .execute(&mut *$tx_var)
                    .await?;

                let value = $body?;
                $tx_var.commit().await?;
                Ok::<_, $crate::error::AppError>(value)
            }
            .await;

            match result {
                Ok(value) => break Ok(value),
                Err(e)
                    if $crate::database::is_retryable(&e)
                        && attempt < $crate::database::MAX_RETRY_ATTEMPTS =>
                {
                    tracing::debug!("Retrying transaction (attempt {}): {}", attempt, e);
                    tokio::time::sleep($crate::database::retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

/// True when the error wraps a Postgres serialization failure or deadlock
pub fn is_retryable(err: &AppError) -> bool {
    let AppError::Internal(inner) = err else {
        return false;
    };
    match inner.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err
            .code()
            .map(|code| RETRYABLE_SQLSTATES.iter().any(|s| code == *s))
            .unwrap_or(false),
        _ => false,
    }
}

/// Exponential backoff with jitter for the given (1-based) attempt
pub fn retry_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..10);
    let exponent = attempt.saturating_sub(1).min(10);
    Duration::from_millis(BASE_RETRY_DELAY_MS * (1 << exponent) + jitter)
}

// Create a connection pool to PostgreSQL
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    info!("Connected to database");
    Ok(pool)
}

const SCHEMA: [&str; 7] = [
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nominees (
        id SERIAL PRIMARY KEY,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        winner BOOLEAN NOT NULL DEFAULT FALSE,
        curr_winner_odds NUMERIC(6,1) NOT NULL DEFAULT 2.0,
        prev_winner_odds NUMERIC(6,1) NOT NULL DEFAULT 2.0,
        curr_loser_odds NUMERIC(6,1) NOT NULL DEFAULT 2.0,
        prev_loser_odds NUMERIC(6,1) NOT NULL DEFAULT 2.0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS nominees_category_idx ON nominees (category_id)",
    // At most one winner per category, whatever the caller does
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS nominees_one_winner_per_category
    ON nominees (category_id) WHERE winner
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        score NUMERIC(12,1) NOT NULL DEFAULT 0,
        push_token TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        nominee_id INTEGER NOT NULL REFERENCES nominees(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        vote_type TEXT NOT NULL CHECK (vote_type IN ('winner', 'loser')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT votes_user_nominee_unique UNIQUE (user_id, nominee_id),
        CONSTRAINT votes_user_category_type_unique UNIQUE (user_id, category_id, vote_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS votes_category_idx ON votes (category_id)",
];

/// Create tables, constraints and indexes if they do not exist
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Schema ready");
    Ok(())
}

/// Take the transaction-scoped scoring lock; released on commit or rollback
pub async fn acquire_scoring_lock(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCORING_LOCK_KEY)
        .execute(conn)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Categories and nominees
// ---------------------------------------------------------------------------

/// Load one category with its nominees
pub async fn get_category(
    conn: &mut PgConnection,
    category_id: CategoryId,
) -> Result<Option<Category>, AppError> {
    let header = sqlx::query("SELECT id, name FROM categories WHERE id = $1")
        .bind(category_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(header) = header else {
        return Ok(None);
    };

    let nominees = sqlx::query(&format!(
        "SELECT {} FROM nominees WHERE category_id = $1 ORDER BY id",
        NOMINEE_COLUMNS
    ))
    .bind(category_id)
    .fetch_all(&mut *conn)
    .await?;

    let headers = vec![(header.try_get("id")?, header.try_get("name")?)];
    let categories = DbAdapter::assemble_categories(headers, &nominees)?;
    Ok(categories.into_iter().next())
}

/// Every category that currently has a designated winner, with all its nominees
pub async fn list_decided_categories(conn: &mut PgConnection) -> Result<Vec<Category>, AppError> {
    let headers = sqlx::query(
        r#"
        SELECT c.id, c.name
        FROM categories c
        WHERE EXISTS (SELECT 1 FROM nominees n WHERE n.category_id = c.id AND n.winner)
        ORDER BY c.position, c.id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let headers: Vec<(CategoryId, String)> = headers
        .iter()
        .map(|row| Ok((row.try_get("id")?, row.try_get("name")?)))
        .collect::<Result<_, sqlx::Error>>()?;
    let ids: Vec<CategoryId> = headers.iter().map(|(id, _)| *id).collect();

    let nominees = sqlx::query(&format!(
        "SELECT {} FROM nominees WHERE category_id = ANY($1) ORDER BY category_id, id",
        NOMINEE_COLUMNS
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(DbAdapter::assemble_categories(headers, &nominees)?)
}

pub async fn get_nominee(
    conn: &mut PgConnection,
    nominee_id: NomineeId,
) -> Result<Option<Nominee>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM nominees WHERE id = $1", NOMINEE_COLUMNS))
        .bind(nominee_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.as_ref().map(DbAdapter::extract_nominee).transpose()?)
}

/// Lock the given category rows in ascending id order. Returns the ids that exist.
pub async fn lock_categories(
    conn: &mut PgConnection,
    category_ids: &[CategoryId],
) -> Result<Vec<CategoryId>, AppError> {
    let ids: Vec<CategoryId> =
        sqlx::query_scalar("SELECT id FROM categories WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(category_ids)
            .fetch_all(conn)
            .await?;
    Ok(ids)
}

/// Current winner of a category, if any
pub async fn current_winner(
    conn: &mut PgConnection,
    category_id: CategoryId,
) -> Result<Option<NomineeId>, AppError> {
    let id = sqlx::query_scalar("SELECT id FROM nominees WHERE category_id = $1 AND winner")
        .bind(category_id)
        .fetch_optional(conn)
        .await?;
    Ok(id)
}

/// Make `nominee_id` the only winner of `category_id`.
/// Clears the old flag first so the one-winner index never sees two rows.
pub async fn designate_winner_flag(
    conn: &mut PgConnection,
    category_id: CategoryId,
    nominee_id: NomineeId,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE nominees SET winner = FALSE, updated_at = NOW()
         WHERE category_id = $1 AND winner AND id <> $2",
    )
    .bind(category_id)
    .bind(nominee_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE nominees SET winner = TRUE, updated_at = NOW()
         WHERE id = $1 AND category_id = $2",
    )
    .bind(nominee_id)
    .bind(category_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Clear the winner flag on every nominee of every category
pub async fn clear_all_winner_flags(conn: &mut PgConnection) -> Result<u64, AppError> {
    let rows = sqlx::query("UPDATE nominees SET winner = FALSE, updated_at = NOW() WHERE winner")
        .execute(conn)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Winner-tagged vote counts per nominee in one category
pub async fn winner_tally(
    conn: &mut PgConnection,
    category_id: CategoryId,
) -> Result<WinnerTally, AppError> {
    let rows = sqlx::query(
        "SELECT nominee_id, COUNT(*) AS votes
         FROM votes
         WHERE category_id = $1 AND vote_type = 'winner'
         GROUP BY nominee_id",
    )
    .bind(category_id)
    .fetch_all(conn)
    .await?;

    let mut tally = WinnerTally::default();
    for row in rows {
        tally.record(row.try_get("nominee_id")?, row.try_get("votes")?);
    }
    Ok(tally)
}

/// Persist one nominee's recalculated odds
pub async fn save_nominee_odds(
    conn: &mut PgConnection,
    update: &OddsUpdate,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE nominees SET
            curr_winner_odds = $1,
            prev_winner_odds = $2,
            curr_loser_odds = $3,
            prev_loser_odds = $4,
            updated_at = NOW()
         WHERE id = $5",
    )
    .bind(update.odds.curr_winner_odds)
    .bind(update.odds.prev_winner_odds)
    .bind(update.odds.curr_loser_odds)
    .bind(update.odds.prev_loser_odds)
    .bind(update.nominee_id)
    .execute(conn)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// Insert one vote. Unique violations surface as `sqlx::Error` for the caller to classify.
pub async fn insert_vote(
    conn: &mut PgConnection,
    user_id: UserId,
    item: &VoteItem,
) -> Result<Vote, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO votes (user_id, nominee_id, category_id, vote_type)
         VALUES ($1, $2, $3, $4)
         RETURNING {}",
        VOTE_COLUMNS
    ))
    .bind(user_id)
    .bind(item.nominee_id)
    .bind(item.category_id)
    .bind(item.vote_type.as_str())
    .fetch_one(conn)
    .await?;

    DbAdapter::extract_vote(&row).map_err(|e| sqlx::Error::Decode(e.into()))
}

/// Hard delete. Returns false when no such vote exists.
pub async fn delete_vote(pool: &PgPool, vote_id: VoteId) -> Result<bool, AppError> {
    let rows = sqlx::query("DELETE FROM votes WHERE id = $1")
        .bind(vote_id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows > 0)
}

const VOTE_DETAIL_QUERY: &str = r#"
    SELECT
        v.id, v.user_id, v.vote_type, v.created_at,
        v.category_id, c.name AS category_name,
        v.nominee_id, n.title AS nominee_title,
        n.curr_winner_odds, n.prev_winner_odds, n.curr_loser_odds, n.prev_loser_odds
    FROM votes v
    JOIN categories c ON c.id = v.category_id
    JOIN nominees n ON n.id = v.nominee_id
"#;

pub async fn votes_for_user(pool: &PgPool, user_id: UserId) -> Result<Vec<VoteDetail>, AppError> {
    let rows = sqlx::query(&format!(
        "{} WHERE v.user_id = $1 ORDER BY c.position, v.category_id, v.vote_type DESC",
        VOTE_DETAIL_QUERY
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(DbAdapter::extract_vote_detail).collect::<Result<_>>()?)
}

pub async fn all_votes(pool: &PgPool) -> Result<Vec<VoteDetail>, AppError> {
    let rows = sqlx::query(&format!("{} ORDER BY v.id", VOTE_DETAIL_QUERY))
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(DbAdapter::extract_vote_detail).collect::<Result<_>>()?)
}

/// Every vote cast in the given categories
pub async fn votes_in_categories(
    conn: &mut PgConnection,
    category_ids: &[CategoryId],
) -> Result<Vec<Vote>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM votes WHERE category_id = ANY($1) ORDER BY id",
        VOTE_COLUMNS
    ))
    .bind(category_ids)
    .fetch_all(conn)
    .await?;

    Ok(rows.iter().map(DbAdapter::extract_vote).collect::<Result<_>>()?)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn user_exists(conn: &mut PgConnection, user_id: UserId) -> Result<bool, AppError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

/// Every user id, locked for the duration of the caller's transaction
pub async fn list_user_ids(conn: &mut PgConnection) -> Result<Vec<UserId>, AppError> {
    let ids = sqlx::query_scalar("SELECT id FROM users ORDER BY id FOR UPDATE")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

/// Write every score in one statement
pub async fn save_scores(
    conn: &mut PgConnection,
    scores: &BTreeMap<UserId, Decimal>,
) -> Result<u64, AppError> {
    let (ids, values): (Vec<UserId>, Vec<Decimal>) =
        scores.iter().map(|(id, score)| (*id, *score)).unzip();

    let rows = sqlx::query(
        "UPDATE users SET score = s.score
         FROM UNNEST($1::INT4[], $2::NUMERIC[]) AS s(id, score)
         WHERE users.id = s.id",
    )
    .bind(&ids)
    .bind(&values)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Administrative reset of every score to zero
pub async fn reset_scores(pool: &PgPool) -> Result<u64, AppError> {
    let rows = sqlx::query("UPDATE users SET score = 0")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Push tokens of every user who registered one
pub async fn list_push_tokens(pool: &PgPool) -> Result<Vec<String>, AppError> {
    let tokens = sqlx::query_scalar(
        "SELECT push_token FROM users WHERE push_token IS NOT NULL ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(tokens)
}

/// Returns false when the user does not exist
pub async fn set_push_token(pool: &PgPool, user_id: UserId, token: &str) -> Result<bool, AppError> {
    let rows = sqlx::query("UPDATE users SET push_token = $1 WHERE id = $2")
        .bind(token)
        .bind(user_id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows > 0)
}

// Get leaderboard - top users by score
pub async fn get_leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<UserScore>, AppError> {
    let rows = sqlx::query(
        "SELECT id, username, score FROM users ORDER BY score DESC, username ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(DbAdapter::extract_user_score).collect::<Result<_>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_with_attempts() {
        for attempt in 1..MAX_RETRY_ATTEMPTS {
            let delay = retry_delay(attempt).as_millis() as u64;
            let base = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
            assert!(delay >= base && delay < base + 10, "attempt {} delay {}", attempt, delay);
        }
    }

    #[test]
    fn only_database_serialization_errors_retry() {
        assert!(!is_retryable(&AppError::Conflict("dup".into())));
        assert!(!is_retryable(&AppError::Internal(anyhow::anyhow!("could not serialize"))));
        assert!(!is_retryable(&AppError::from(sqlx::Error::RowNotFound)));
    }
}
