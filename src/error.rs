use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::{OddsPatch, RawVoteItem, VoteItem, VoteType};
use crate::odds_core::{MAX_STORED_ODDS, ODDS_DECIMAL_PLACES};
use rust_decimal::Decimal;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Referenced category, nominee, vote or user does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Duplicate vote for the same user and nominee (or category slot)
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Malformed request data, rejected before any persistence attempt
    #[error("Validation error: {0}")]
    Validation(String),
    /// Storage failure or broken invariant
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.into())
    }
}

/// Malformed or wrongly typed request bodies are validation errors
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::NotFound(msg) | AppError::Conflict(msg) | AppError::Validation(msg) => {
                msg.clone()
            }
            AppError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
        };

        (
            self.status_code(),
            Json(json!({
                "error": self.error_code(),
                "message": message,
            })),
        )
            .into_response()
    }
}

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// True when the error is a Postgres unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Validate a batch of raw vote items. Every item is checked before any is persisted.
pub fn validate_vote_items(raw: &[RawVoteItem]) -> Result<Vec<VoteItem>, AppError> {
    if raw.is_empty() {
        return Err(AppError::Validation("Vote batch must contain at least one vote".to_string()));
    }

    raw.iter()
        .enumerate()
        .map(|(index, item)| {
            let nominee_id = item
                .nominee_id
                .ok_or_else(|| {
                    AppError::Validation(format!("Vote {}: nomineeId is required", index))
                })?;
            let category_id = item
                .category_id
                .ok_or_else(|| {
                    AppError::Validation(format!("Vote {}: categoryId is required", index))
                })?;
            let vote_type = item
                .vote_type
                .as_deref()
                .ok_or_else(|| AppError::Validation(format!("Vote {}: type is required", index)))
                .and_then(|s| {
                    VoteType::parse(s)
                        .map_err(|e| AppError::Validation(format!("Vote {}: {}", index, e)))
                })?;

            Ok(VoteItem { nominee_id, category_id, vote_type })
        })
        .collect()
}

/// Manual odds must be positive, fit the odds columns and carry at most one decimal place
pub fn validate_odds_patch(patch: &OddsPatch) -> Result<(), AppError> {
    if patch.values().next().is_none() {
        return Err(AppError::Validation("Odds override must set at least one field".to_string()));
    }
    for odds in patch.values() {
        if odds <= Decimal::ZERO || odds > MAX_STORED_ODDS {
            return Err(AppError::Validation(format!(
                "Odds must be greater than 0 and at most {}, got {}",
                MAX_STORED_ODDS, odds
            )));
        }
        if odds != odds.round_dp(ODDS_DECIMAL_PLACES) {
            return Err(AppError::Validation(format!(
                "Odds take at most {} decimal place, got {}",
                ODDS_DECIMAL_PLACES, odds
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(nominee: Option<i32>, category: Option<i32>, kind: Option<&str>) -> RawVoteItem {
        RawVoteItem {
            nominee_id: nominee,
            category_id: category,
            vote_type: kind.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_vote_items_valid() {
        let items = validate_vote_items(&[
            raw(Some(1), Some(10), Some("winner")),
            raw(Some(2), Some(10), Some("LOSER")),
        ])
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            VoteItem { nominee_id: 1, category_id: 10, vote_type: VoteType::Winner }
        );
        assert_eq!(items[1].vote_type, VoteType::Loser);
    }

    #[test]
    fn test_validate_vote_items_rejects_empty_batch() {
        assert!(matches!(validate_vote_items(&[]), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_vote_items_missing_fields() {
        for item in [
            raw(None, Some(10), Some("winner")),
            raw(Some(1), None, Some("winner")),
            raw(Some(1), Some(10), None),
        ] {
            assert!(matches!(validate_vote_items(&[item]), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn test_validate_vote_items_bad_type_anywhere_rejects_batch() {
        let result = validate_vote_items(&[
            raw(Some(1), Some(10), Some("winner")),
            raw(Some(2), Some(10), Some("runner-up")),
        ]);
        match result {
            Err(AppError::Validation(msg)) => assert!(msg.starts_with("Vote 1:"), "{}", msg),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_odds_patch() {
        let patch = |odds: Decimal| OddsPatch {
            curr_winner_odds: Some(odds),
            ..OddsPatch::default()
        };

        assert!(validate_odds_patch(&patch(Decimal::new(35, 1))).is_ok());
        assert!(validate_odds_patch(&patch(MAX_STORED_ODDS)).is_ok());
        // 3.50 is still one decimal place of precision
        assert!(validate_odds_patch(&patch(Decimal::new(350, 2))).is_ok());

        for bad in [
            Decimal::ZERO,
            Decimal::new(-15, 1),
            Decimal::new(355, 2),
            Decimal::new(1_000_000, 0),
        ] {
            assert!(
                matches!(validate_odds_patch(&patch(bad)), Err(AppError::Validation(_))),
                "accepted {}",
                bad
            );
        }
        assert!(matches!(validate_odds_patch(&OddsPatch::default()), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Conflict("already voted".to_string());
        assert!(err.to_string().contains("Conflict"));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::NotFound(String::new()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict(String::new()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::Validation(String::new()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
