//! Domain records shared by the engines and the persistence layer.
//! Field names serialize as camelCase to match the client wire format.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i32;
pub type CategoryId = i32;
pub type NomineeId = i32;
pub type VoteId = i32;

/// Outcome a vote predicts for its nominee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Winner,
    Loser,
}

impl VoteType {
    /// Parse from string (API boundary conversion)
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "winner" => Ok(VoteType::Winner),
            "loser" => Ok(VoteType::Loser),
            _ => Err(format!("Invalid vote type: '{}', expected 'winner' or 'loser'", s)),
        }
    }

    /// Database / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Winner => "winner",
            VoteType::Loser => "loser",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four odds columns carried by every nominee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NomineeOdds {
    pub curr_winner_odds: Decimal,
    pub prev_winner_odds: Decimal,
    pub curr_loser_odds: Decimal,
    pub prev_loser_odds: Decimal,
}

impl Default for NomineeOdds {
    fn default() -> Self {
        let d = crate::odds_core::DEFAULT_ODDS;
        Self {
            curr_winner_odds: d,
            prev_winner_odds: d,
            curr_loser_odds: d,
            prev_loser_odds: d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nominee {
    pub id: NomineeId,
    pub category_id: CategoryId,
    pub title: String,
    pub winner: bool,
    #[serde(flatten)]
    pub odds: NomineeOdds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub nominees: Vec<Nominee>,
}

impl Category {
    /// The designated winner, if the category has been decided
    pub fn winner(&self) -> Option<&Nominee> {
        self.nominees.iter().find(|n| n.winner)
    }
}

/// A persisted prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub user_id: UserId,
    pub nominee_id: NomineeId,
    pub category_id: CategoryId,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

/// A vote joined with the category and nominee it refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteDetail {
    pub id: VoteId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    pub category_id: CategoryId,
    pub category_name: String,
    pub nominee_id: NomineeId,
    pub nominee_title: String,
    #[serde(flatten)]
    pub odds: NomineeOdds,
    pub created_at: DateTime<Utc>,
}

/// Vote item as received on the wire, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVoteItem {
    pub nominee_id: Option<NomineeId>,
    pub category_id: Option<CategoryId>,
    #[serde(rename = "type")]
    pub vote_type: Option<String>,
}

/// A validated vote item ready for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteItem {
    pub nominee_id: NomineeId,
    pub category_id: CategoryId,
    pub vote_type: VoteType,
}

/// Partial manual override of a nominee's odds; absent fields are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OddsPatch {
    pub curr_winner_odds: Option<Decimal>,
    pub prev_winner_odds: Option<Decimal>,
    pub curr_loser_odds: Option<Decimal>,
    pub prev_loser_odds: Option<Decimal>,
}

impl OddsPatch {
    /// Apply the present fields on top of `odds`
    pub fn apply(&self, odds: NomineeOdds) -> NomineeOdds {
        NomineeOdds {
            curr_winner_odds: self.curr_winner_odds.unwrap_or(odds.curr_winner_odds),
            prev_winner_odds: self.prev_winner_odds.unwrap_or(odds.prev_winner_odds),
            curr_loser_odds: self.curr_loser_odds.unwrap_or(odds.curr_loser_odds),
            prev_loser_odds: self.prev_loser_odds.unwrap_or(odds.prev_loser_odds),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        [self.curr_winner_odds, self.prev_winner_odds, self.curr_loser_odds, self.prev_loser_odds]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScore {
    pub user_id: UserId,
    pub username: String,
    pub score: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_type_parses_case_insensitively() {
        assert_eq!(VoteType::parse("winner"), Ok(VoteType::Winner));
        assert_eq!(VoteType::parse(" Loser "), Ok(VoteType::Loser));
        assert!(VoteType::parse("favourite").is_err());
        assert!(VoteType::parse("").is_err());
    }

    #[test]
    fn raw_vote_item_reads_camel_case_fields() {
        let raw: RawVoteItem =
            serde_json::from_str(r#"{"nomineeId": 4, "categoryId": 2, "type": "loser"}"#).unwrap();
        assert_eq!(raw.nominee_id, Some(4));
        assert_eq!(raw.category_id, Some(2));
        assert_eq!(raw.vote_type.as_deref(), Some("loser"));

        let partial: RawVoteItem = serde_json::from_str(r#"{"nomineeId": 4}"#).unwrap();
        assert!(partial.category_id.is_none());
        assert!(partial.vote_type.is_none());
    }

    #[test]
    fn odds_patch_keeps_absent_fields() {
        let patch: OddsPatch = serde_json::from_str(r#"{"currWinnerOdds": 3.5}"#).unwrap();
        let patched = patch.apply(NomineeOdds::default());
        assert_eq!(patched.curr_winner_odds, Decimal::new(35, 1));
        assert_eq!(patched.curr_loser_odds, Decimal::new(20, 1));
        assert_eq!(patch.values().count(), 1);
    }

    #[test]
    fn category_winner_lookup() {
        let nominee = |id, winner| Nominee {
            id,
            category_id: 1,
            title: format!("N{id}"),
            winner,
            odds: NomineeOdds::default(),
        };
        let undecided = Category {
            id: 1,
            name: "Best Picture".into(),
            nominees: vec![nominee(1, false)],
        };
        assert!(undecided.winner().is_none());

        let decided = Category {
            id: 1,
            name: "Best Picture".into(),
            nominees: vec![nominee(1, false), nominee(2, true)],
        };
        assert_eq!(decided.winner().map(|n| n.id), Some(2));
    }
}
