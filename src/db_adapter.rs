//! Database adapter layer for row → domain conversions
//! Keeps column names and the `vote_type` text encoding in one place

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::models::{
    Category, CategoryId, Nominee, NomineeOdds, UserScore, Vote, VoteDetail, VoteType,
};

/// Column list matching `DbAdapter::extract_nominee`
pub const NOMINEE_COLUMNS: &str =
    "id, category_id, title, winner, \
     curr_winner_odds, prev_winner_odds, curr_loser_odds, prev_loser_odds";

/// Column list matching `DbAdapter::extract_vote`
pub const VOTE_COLUMNS: &str = "id, user_id, nominee_id, category_id, vote_type, created_at";

/// Clean conversion functions between database rows and domain records
pub struct DbAdapter;

impl DbAdapter {
    /// Parse the stored `vote_type` text
    #[inline]
    pub fn parse_vote_type(raw: &str) -> Result<VoteType> {
        VoteType::parse(raw).map_err(|e| anyhow!("Corrupt vote_type column: {}", e))
    }

    /// Extract the four odds columns
    pub fn extract_odds(row: &PgRow) -> Result<NomineeOdds> {
        Ok(NomineeOdds {
            curr_winner_odds: row.try_get("curr_winner_odds")?,
            prev_winner_odds: row.try_get("prev_winner_odds")?,
            curr_loser_odds: row.try_get("curr_loser_odds")?,
            prev_loser_odds: row.try_get("prev_loser_odds")?,
        })
    }

    pub fn extract_nominee(row: &PgRow) -> Result<Nominee> {
        Ok(Nominee {
            id: row.try_get("id")?,
            category_id: row.try_get("category_id")?,
            title: row.try_get("title")?,
            winner: row.try_get("winner")?,
            odds: Self::extract_odds(row)?,
        })
    }

    pub fn extract_vote(row: &PgRow) -> Result<Vote> {
        let vote_type: String = row.try_get("vote_type")?;
        Ok(Vote {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            nominee_id: row.try_get("nominee_id")?,
            category_id: row.try_get("category_id")?,
            vote_type: Self::parse_vote_type(&vote_type)?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Extract a vote joined with `category_name`, `nominee_title` and the nominee's odds
    pub fn extract_vote_detail(row: &PgRow) -> Result<VoteDetail> {
        let vote_type: String = row.try_get("vote_type")?;
        Ok(VoteDetail {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            vote_type: Self::parse_vote_type(&vote_type)?,
            category_id: row.try_get("category_id")?,
            category_name: row.try_get("category_name")?,
            nominee_id: row.try_get("nominee_id")?,
            nominee_title: row.try_get("nominee_title")?,
            odds: Self::extract_odds(row)?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn extract_user_score(row: &PgRow) -> Result<UserScore> {
        Ok(UserScore {
            user_id: row.try_get("id")?,
            username: row.try_get("username")?,
            score: row.try_get("score")?,
        })
    }

    /// Attach nominee rows (ordered by category) to their category headers
    pub fn assemble_categories(
        headers: Vec<(CategoryId, String)>,
        nominee_rows: &[PgRow],
    ) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = headers
            .into_iter()
            .map(|(id, name)| Category { id, name, nominees: Vec::new() })
            .collect();

        for row in nominee_rows {
            let nominee = Self::extract_nominee(row)?;
            let category = categories
                .iter_mut()
                .find(|c| c.id == nominee.category_id)
                .with_context(|| {
                    format!(
                        "Nominee {} belongs to unloaded category {}",
                        nominee.id, nominee.category_id
                    )
                })?;
            category.nominees.push(nominee);
        }

        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_vote_types() {
        assert_eq!(DbAdapter::parse_vote_type("winner").unwrap(), VoteType::Winner);
        assert_eq!(DbAdapter::parse_vote_type("loser").unwrap(), VoteType::Loser);
        let err = DbAdapter::parse_vote_type("maybe").unwrap_err();
        assert!(err.to_string().contains("Corrupt vote_type"));
    }

    #[test]
    fn assembling_without_nominees_keeps_headers() {
        let headers = vec![(1, "Best Picture".into()), (2, "Best Score".into())];
        let categories = DbAdapter::assemble_categories(headers, &[]).unwrap();
        assert_eq!(categories.len(), 2);
        assert!(categories.iter().all(|c| c.nominees.is_empty()));
    }
}
