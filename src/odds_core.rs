//! src/odds_core.rs
//! Community odds: inverse vote share, clamped to [1.2, 10.0] and rounded to one decimal.
//!
//! Pure functions only; persistence lives in `votes_api`.

use crate::models::{Nominee, NomineeId, NomineeOdds};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Odds shown before any winner-tagged vote exists in a category.
pub const DEFAULT_ODDS: Decimal = Decimal::from_parts(20, 0, 0, false, 1); // 2.0
/// Favorite cap.
pub const MIN_ODDS: Decimal = Decimal::from_parts(12, 0, 0, false, 1); // 1.2
/// Longshot cap.
pub const MAX_ODDS: Decimal = Decimal::from_parts(100, 0, 0, false, 1); // 10.0

/// Largest value the NUMERIC(6,1) odds columns hold.
pub const MAX_STORED_ODDS: Decimal = Decimal::from_parts(999_999, 0, 0, false, 1); // 99999.9

pub const ODDS_DECIMAL_PLACES: u32 = 1;

/// Decimal odds for an outcome drawing `outcome_votes` of `total_votes`.
///
/// Returns `DEFAULT_ODDS` when nobody has voted yet. Otherwise `1 / share`,
/// clamped to `[MIN_ODDS, MAX_ODDS]` and rounded half away from zero.
/// A zero share is an infinite raw line and lands on the longshot cap.
#[inline]
pub fn calculate_odds(outcome_votes: i64, total_votes: i64) -> Decimal {
    if total_votes <= 0 {
        return DEFAULT_ODDS;
    }
    if outcome_votes <= 0 {
        return MAX_ODDS;
    }

    let raw = Decimal::from(total_votes) / Decimal::from(outcome_votes);
    raw.clamp(MIN_ODDS, MAX_ODDS)
        .round_dp_with_strategy(ODDS_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Winner-tagged vote counts for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WinnerTally {
    pub total: i64,
    pub per_nominee: HashMap<NomineeId, i64>,
}

impl WinnerTally {
    /// Build a tally from `(nominee, vote type)` pairs; loser-tagged votes are ignored.
    #[cfg(test)]
    pub fn from_votes<I>(votes: I) -> Self
    where
        I: IntoIterator<Item = (NomineeId, crate::models::VoteType)>,
    {
        let mut tally = Self::default();
        for (nominee_id, vote_type) in votes {
            if vote_type == crate::models::VoteType::Winner {
                tally.record(nominee_id, 1);
            }
        }
        tally
    }

    pub fn record(&mut self, nominee_id: NomineeId, count: i64) {
        *self.per_nominee.entry(nominee_id).or_insert(0) += count;
        self.total += count;
    }

    pub fn votes_for(&self, nominee_id: NomineeId) -> i64 {
        self.per_nominee.get(&nominee_id).copied().unwrap_or(0)
    }
}

/// New odds for one nominee after a recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OddsUpdate {
    pub nominee_id: NomineeId,
    pub odds: NomineeOdds,
}

/// Recompute every nominee's odds in a category from its winner-vote tally.
///
/// The current odds roll into the `prev_*` fields. Loser odds are the
/// complement of the winner tally for that nominee, not a tally of
/// loser-tagged votes.
pub fn category_odds(nominees: &[Nominee], tally: &WinnerTally) -> Vec<OddsUpdate> {
    nominees
        .iter()
        .map(|nominee| {
            let votes_for = tally.votes_for(nominee.id);
            OddsUpdate {
                nominee_id: nominee.id,
                odds: NomineeOdds {
                    prev_winner_odds: nominee.odds.curr_winner_odds,
                    prev_loser_odds: nominee.odds.curr_loser_odds,
                    curr_winner_odds: calculate_odds(votes_for, tally.total),
                    curr_loser_odds: calculate_odds(tally.total - votes_for, tally.total),
                },
            }
        })
        .collect()
}

// -----------------------
// Tests
// -----------------------
