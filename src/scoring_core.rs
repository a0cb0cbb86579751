//! src/scoring_core.rs
//! Whole-dataset score derivation. Every call rebuilds all scores from zero;
//! the stored `users.score` is only a cache of the last run.

use crate::models::{Category, CategoryId, Nominee, UserId, Vote, VoteType};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Points per unit of odds for a correct call.
pub const POINTS_PER_ODDS: Decimal = Decimal::TEN;

/// Odds multiplier used when the user placed no loser bet in a category.
pub const NO_LOSER_BET_ODDS: Decimal = Decimal::ONE;

/// Points one user earned in one decided category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryAward {
    pub user_id: UserId,
    pub found_winner: bool,
    pub found_loser: bool,
    pub points: Decimal,
}

/// Score every vote of one user in a decided category.
///
/// `user_votes` must all belong to `category`.
pub fn award_for_user(
    user_id: UserId,
    winner: &Nominee,
    category: &Category,
    user_votes: &[&Vote],
) -> CategoryAward {
    let is_loser = |nominee_id| {
        nominee_id != winner.id && category.nominees.iter().any(|n| n.id == nominee_id)
    };

    let found_winner = user_votes
        .iter()
        .any(|v| v.vote_type == VoteType::Winner && v.nominee_id == winner.id);
    let found_loser = user_votes
        .iter()
        .any(|v| v.vote_type == VoteType::Loser && is_loser(v.nominee_id));

    // Only the user's own loser pick is priced; betting the eventual winner as
    // loser earns the neutral multiplier.
    let user_loser_odds = user_votes
        .iter()
        .find(|v| v.vote_type == VoteType::Loser)
        .and_then(|v| {
            category
                .nominees
                .iter()
                .find(|n| n.id == v.nominee_id && n.id != winner.id)
        })
        .map(|n| n.odds.curr_loser_odds)
        .unwrap_or(NO_LOSER_BET_ODDS);

    let points = if found_winner {
        POINTS_PER_ODDS * winner.odds.curr_winner_odds + POINTS_PER_ODDS * user_loser_odds
    } else if found_loser {
        POINTS_PER_ODDS * user_loser_odds
    } else {
        Decimal::ZERO
    };

    CategoryAward { user_id, found_winner, found_loser, points }
}

/// Awards for every user who voted in `category`. Empty when undecided.
pub fn score_category(
    category: &Category,
    votes_by_user: &HashMap<UserId, Vec<&Vote>>,
) -> Vec<CategoryAward> {
    let Some(winner) = category.winner() else {
        debug!("No winner set for category {} ({}), skipping", category.id, category.name);
        return Vec::new();
    };

    let mut awards: Vec<CategoryAward> = votes_by_user
        .iter()
        .map(|(user_id, user_votes)| award_for_user(*user_id, winner, category, user_votes))
        .collect();
    awards.sort_by_key(|a| a.user_id);

    debug!(
        "Category {} ({}): winner = {}, {} voters scored",
        category.id,
        category.name,
        winner.id,
        awards.len()
    );
    awards
}

/// Rebuild every user's cumulative score.
///
/// Every id in `user_ids` is present in the result, starting from zero.
/// Undecided categories contribute nothing. Votes that reference an unknown
/// user are skipped with a warning.
pub fn compute_scores(
    user_ids: &[UserId],
    categories: &[Category],
    votes: &[Vote],
) -> BTreeMap<UserId, Decimal> {
    let mut scores: BTreeMap<UserId, Decimal> =
        user_ids.iter().map(|id| (*id, Decimal::ZERO)).collect();

    let mut by_category: HashMap<CategoryId, HashMap<UserId, Vec<&Vote>>> = HashMap::new();
    for vote in votes {
        if !scores.contains_key(&vote.user_id) {
            warn!("Vote {} references unknown user {}, ignoring", vote.id, vote.user_id);
            continue;
        }
        by_category
            .entry(vote.category_id)
            .or_default()
            .entry(vote.user_id)
            .or_default()
            .push(vote);
    }

    let empty = HashMap::new();
    for category in categories {
        let votes_by_user = by_category.get(&category.id).unwrap_or(&empty);
        for award in score_category(category, votes_by_user) {
            if let Some(score) = scores.get_mut(&award.user_id) {
                *score += award.points;
            }
        }
    }

    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NomineeId, NomineeOdds, VoteId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn nominee(
        id: NomineeId,
        category_id: CategoryId,
        winner: bool,
        win: Decimal,
        lose: Decimal,
    ) -> Nominee {
        Nominee {
            id,
            category_id,
            title: format!("Nominee {id}"),
            winner,
            odds: NomineeOdds {
                curr_winner_odds: win,
                prev_winner_odds: dec!(2.0),
                curr_loser_odds: lose,
                prev_loser_odds: dec!(2.0),
            },
        }
    }

    fn vote(
        id: VoteId,
        user_id: UserId,
        nominee_id: NomineeId,
        category_id: CategoryId,
        vote_type: VoteType,
    ) -> Vote {
        Vote { id, user_id, nominee_id, category_id, vote_type, created_at: Utc::now() }
    }

    /// A=1 (3 of 4 winner votes), B=2 (1 of 4), C=3 (0 of 4)
    fn best_picture(winner: Option<NomineeId>) -> Category {
        let is = |id| winner == Some(id);
        Category {
            id: 10,
            name: "Best Picture".into(),
            nominees: vec![
                nominee(1, 10, is(1), dec!(1.3), dec!(4.0)),
                nominee(2, 10, is(2), dec!(4.0), dec!(1.3)),
                nominee(3, 10, is(3), dec!(10.0), dec!(1.2)),
            ],
        }
    }

    #[test]
    fn no_votes_and_no_decided_categories_gives_zero() {
        let scores = compute_scores(&[1, 2, 3], &[best_picture(None)], &[]);
        assert_eq!(scores.len(), 3);
        assert!(scores.values().all(|s| s.is_zero()));

        let scores = compute_scores(&[1, 2], &[], &[]);
        assert!(scores.values().all(|s| s.is_zero()));
    }

    #[test]
    fn winner_and_loser_both_right() {
        let votes = [vote(1, 7, 1, 10, VoteType::Winner), vote(2, 7, 2, 10, VoteType::Loser)];
        let scores = compute_scores(&[7], &[best_picture(Some(1))], &votes);
        // 10*1.3 for A plus 10*1.3 for the loser pick on B
        assert_eq!(scores[&7], dec!(26.0));
    }

    #[test]
    fn long_loser_line_pays_its_odds() {
        let mut category = best_picture(Some(1));
        category.nominees[1].odds.curr_loser_odds = dec!(4.0);
        let votes = [vote(1, 7, 1, 10, VoteType::Winner), vote(2, 7, 2, 10, VoteType::Loser)];
        let scores = compute_scores(&[7], &[category], &votes);
        assert_eq!(scores[&7], dec!(53.0));
    }

    #[test]
    fn loser_only() {
        let votes = [vote(1, 7, 2, 10, VoteType::Winner), vote(2, 7, 3, 10, VoteType::Loser)];
        let scores = compute_scores(&[7], &[best_picture(Some(1))], &votes);
        assert_eq!(scores[&7], dec!(12.0));
    }

    #[test]
    fn winner_without_loser_bet_uses_neutral_multiplier() {
        let votes = [vote(1, 7, 1, 10, VoteType::Winner)];
        let scores = compute_scores(&[7], &[best_picture(Some(1))], &votes);
        assert_eq!(scores[&7], dec!(23.0));
    }

    #[test]
    fn betting_the_winner_as_loser_earns_nothing() {
        let votes = [vote(1, 7, 2, 10, VoteType::Winner), vote(2, 7, 1, 10, VoteType::Loser)];
        let scores = compute_scores(&[7], &[best_picture(Some(1))], &votes);
        assert_eq!(scores[&7], Decimal::ZERO);
    }

    #[test]
    fn right_winner_wrong_loser_keeps_winner_points() {
        let votes = [vote(1, 7, 1, 10, VoteType::Winner), vote(2, 7, 1, 10, VoteType::Loser)];
        let award = score_category(
            &best_picture(Some(1)),
            &HashMap::from([(7, votes.iter().collect::<Vec<_>>())]),
        )[0];
        assert!(award.found_winner);
        assert!(!award.found_loser);
        assert_eq!(award.points, dec!(23.0));
    }

    #[test]
    fn scores_accumulate_across_decided_categories_only() {
        let mut editing = best_picture(Some(3));
        editing.id = 11;
        editing.name = "Film Editing".into();
        for n in &mut editing.nominees {
            n.id += 10;
            n.category_id = 11;
            n.winner = n.id == 13;
        }
        let undecided = Category {
            id: 12,
            name: "Sound".into(),
            nominees: vec![nominee(21, 12, false, dec!(1.2), dec!(10.0))],
        };

        let votes = [
            vote(1, 1, 1, 10, VoteType::Winner),
            vote(2, 1, 13, 11, VoteType::Winner),
            vote(3, 1, 21, 12, VoteType::Winner),
            vote(4, 2, 3, 10, VoteType::Loser),
        ];
        let categories = [best_picture(Some(1)), editing, undecided];
        let scores = compute_scores(&[1, 2, 3], &categories, &votes);

        // 10*1.3 + 10*1.0 in Best Picture, 10*10.0 + 10*1.0 in Film Editing
        assert_eq!(scores[&1], dec!(133.0));
        assert_eq!(scores[&2], dec!(12.0));
        assert_eq!(scores[&3], Decimal::ZERO);
    }

    #[test]
    fn clearing_every_winner_zeroes_all_scores() {
        let votes = [vote(1, 7, 1, 10, VoteType::Winner), vote(2, 8, 2, 10, VoteType::Loser)];
        let before = compute_scores(&[7, 8], &[best_picture(Some(1))], &votes);
        assert!(before.values().any(|s| !s.is_zero()));

        let after = compute_scores(&[7, 8], &[best_picture(None)], &votes);
        assert!(after.values().all(|s| s.is_zero()));
    }

    #[test]
    fn votes_from_unknown_users_are_ignored() {
        let votes = [vote(1, 99, 1, 10, VoteType::Winner), vote(2, 7, 1, 10, VoteType::Winner)];
        let scores = compute_scores(&[7], &[best_picture(Some(1))], &votes);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[&7], dec!(23.0));
    }

    #[test]
    fn current_odds_reprice_past_bets() {
        let votes = [vote(1, 7, 1, 10, VoteType::Winner)];
        let mut category = best_picture(Some(1));
        let first = compute_scores(&[7], std::slice::from_ref(&category), &votes);

        category.nominees[0].odds.curr_winner_odds = dec!(5.0);
        let second = compute_scores(&[7], &[category], &votes);

        assert_eq!(first[&7], dec!(23.0));
        assert_eq!(second[&7], dec!(60.0));
    }
}
