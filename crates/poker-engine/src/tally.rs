//! Vote tally: pure aggregation of a round's votes.

use std::collections::BTreeMap;

use poker_core::ids::UserId;
use poker_core::{VoteDeck, VoteStats};

/// Tolerance when comparing an average against deck values.
const EPSILON: f64 = 1e-9;

/// Aggregate `votes` against the deck they were cast from.
///
/// Numeric tokens feed minimum, maximum and average; the pass token only
/// shows up in `counts_by_value`. Values outside the deck are ignored.
pub fn tally(votes: &BTreeMap<UserId, String>, deck: &VoteDeck) -> VoteStats {
    let mut counts: BTreeMap<String, u32> =
        deck.values().iter().map(|v| (v.clone(), 0)).collect();
    let mut total = 0u32;
    let mut numeric = Vec::with_capacity(votes.len());

    for value in votes.values() {
        let Some(count) = counts.get_mut(value) else {
            continue;
        };
        *count += 1;
        total += 1;
        if let Some(n) = deck.numeric(value) {
            numeric.push(n);
        }
    }

    let minimum = numeric.iter().copied().reduce(f64::min);
    let maximum = numeric.iter().copied().reduce(f64::max);
    let average = if numeric.is_empty() {
        None
    } else {
        Some(numeric.iter().sum::<f64>() / numeric.len() as f64)
    };

    VoteStats {
        counts_by_value: counts,
        total_votes: total,
        minimum,
        maximum,
        average,
        suggested_story_points: average.and_then(|avg| suggest(avg, deck)),
    }
}

/// Smallest positive numeric deck value at or above `average`.
///
/// Rounds up so the team never under-commits; the top of the deck is the
/// cap since the average can't exceed the largest vote. Zero is never
/// suggested because story points must be positive.
pub fn suggest(average: f64, deck: &VoteDeck) -> Option<f64> {
    let values: Vec<f64> = deck
        .numeric_values()
        .into_iter()
        .filter(|v| *v > 0.0)
        .collect();
    values
        .iter()
        .copied()
        .find(|v| *v + EPSILON >= average)
        .or_else(|| values.last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(pairs: &[(&str, &str)]) -> BTreeMap<UserId, String> {
        pairs
            .iter()
            .map(|(u, v)| (UserId::from_raw(*u), (*v).to_string()))
            .collect()
    }

    fn fib() -> VoteDeck {
        VoteDeck::new(["0", "1", "2", "3", "5", "8", "13", "?"]).unwrap()
    }

    #[test]
    fn two_numeric_votes() {
        let stats = tally(&votes(&[("a", "5"), ("b", "8")]), &fib());
        assert_eq!(stats.minimum, Some(5.0));
        assert_eq!(stats.maximum, Some(8.0));
        assert_eq!(stats.average, Some(6.5));
        assert_eq!(stats.counts_by_value["5"], 1);
        assert_eq!(stats.counts_by_value["8"], 1);
        assert_eq!(stats.counts_by_value["13"], 0);
        assert_eq!(stats.total_votes, 2);
        assert_eq!(stats.suggested_story_points, Some(8.0));
    }

    #[test]
    fn empty_votes_have_zero_counts_for_every_value() {
        let deck = fib();
        let stats = tally(&BTreeMap::new(), &deck);
        assert_eq!(stats.counts_by_value.len(), deck.values().len());
        assert!(stats.counts_by_value.values().all(|c| *c == 0));
        assert_eq!(stats.total_votes, 0);
        assert!(stats.minimum.is_none());
        assert!(stats.average.is_none());
        assert!(stats.suggested_story_points.is_none());
    }

    #[test]
    fn pass_token_only_counts() {
        let stats = tally(&votes(&[("a", "?"), ("b", "3")]), &fib());
        assert_eq!(stats.counts_by_value["?"], 1);
        assert_eq!(stats.total_votes, 2);
        assert_eq!(stats.average, Some(3.0));
        assert_eq!(stats.minimum, Some(3.0));
    }

    #[test]
    fn only_pass_votes_have_no_average() {
        let stats = tally(&votes(&[("a", "?"), ("b", "?")]), &fib());
        assert_eq!(stats.counts_by_value["?"], 2);
        assert!(stats.average.is_none());
        assert!(stats.suggested_story_points.is_none());
    }

    #[test]
    fn exact_average_is_its_own_suggestion() {
        let stats = tally(&votes(&[("a", "3"), ("b", "3"), ("c", "3")]), &fib());
        assert_eq!(stats.suggested_story_points, Some(3.0));
    }

    #[test]
    fn suggestion_rounds_up_to_next_deck_value() {
        // (1 + 2 + 8) / 3 = 3.67 -> 5
        let stats = tally(&votes(&[("a", "1"), ("b", "2"), ("c", "8")]), &fib());
        assert_eq!(stats.suggested_story_points, Some(5.0));
    }

    #[test]
    fn values_outside_deck_are_ignored() {
        let stats = tally(&votes(&[("a", "7"), ("b", "2")]), &fib());
        assert_eq!(stats.total_votes, 1);
        assert_eq!(stats.average, Some(2.0));
    }

    #[test]
    fn suggest_handles_fractional_deck() {
        let deck = VoteDeck::new(["0.5", "1", "2"]).unwrap();
        assert_eq!(suggest(0.2, &deck), Some(0.5));
        assert_eq!(suggest(1.5, &deck), Some(2.0));
        assert_eq!(suggest(2.0, &deck), Some(2.0));
    }

    #[test]
    fn all_zero_votes_suggest_smallest_positive_value() {
        let stats = tally(&votes(&[("a", "0"), ("b", "0")]), &fib());
        assert_eq!(stats.average, Some(0.0));
        assert_eq!(stats.suggested_story_points, Some(1.0));

        let zero_only = VoteDeck::new(["0", "?"]).unwrap();
        assert_eq!(suggest(0.0, &zero_only), None);
    }
}
