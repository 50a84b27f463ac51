//! Epsilon-greedy exploration ranker.
//!
//! Reorders scored candidates and emits, for every item in the
//! exploration pool, the exact probability that the item would occupy
//! position 0 under this policy. Propensities make the ranking's effect
//! measurable offline without online retraining; they are logged, never
//! used for control flow.

use rand::Rng;
use serde::Serialize;

/// A candidate that can be ranked.
pub trait Scored {
    /// Stable identifier, carried into the propensity log.
    fn item_id(&self) -> &str;
    /// Higher scores rank earlier in the greedy baseline.
    fn score(&self) -> f64;
}

/// Selection probability for one pooled candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Propensity {
    pub item_id: String,
    pub probability: f64,
    pub was_forced: bool,
}

/// A full reordering plus per-pool-position propensities.
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub items: Vec<T>,
    /// One entry per item in the pool, in ranked order. Items beyond the
    /// pool have propensity 0 and are never moved.
    pub propensities: Vec<Propensity>,
}

/// Rank `items` with epsilon-greedy exploration over the top `pool_size`.
///
/// With probability `1 - epsilon` the greedy (score-sorted) order is kept;
/// with probability `epsilon` a uniformly drawn pool position is promoted
/// to the top. The propensity of each pooled item is its total probability
/// of occupying position 0 under the policy: `(1 - epsilon) +
/// epsilon / pool` for the greedy top and `epsilon / pool` for every other
/// pooled item, which sums to 1 in every branch.
pub fn epsilon_choose<T, R>(items: Vec<T>, epsilon: f64, pool_size: usize, rng: &mut R) -> Ranked<T>
where
    T: Scored,
    R: Rng + ?Sized,
{
    let n = items.len();
    let pool = pool_size.min(n);
    if pool <= 1 || epsilon <= 0.0 {
        return choose_with_draws(items, 0.0, pool, 1.0, 0);
    }
    let r: f64 = rng.random_range(0.0..1.0);
    let j: usize = if r < epsilon {
        rng.random_range(0..pool)
    } else {
        0
    };
    choose_with_draws(items, epsilon, pool, r, j)
}

/// Deterministic core: rank with the uniform draws already taken.
/// `r >= epsilon` keeps the greedy order; `r < epsilon` promotes pool
/// position `j` (a promotion of position 0 is observationally identical to
/// exploiting).
pub(crate) fn choose_with_draws<T: Scored>(
    mut items: Vec<T>,
    epsilon: f64,
    pool: usize,
    r: f64,
    j: usize,
) -> Ranked<T> {
    items.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if pool <= 1 || epsilon <= 0.0 {
        let propensities = items
            .iter()
            .take(pool)
            .enumerate()
            .map(|(i, item)| Propensity {
                item_id: item.item_id().to_string(),
                probability: if i == 0 { 1.0 } else { 0.0 },
                was_forced: false,
            })
            .collect();
        return Ranked {
            items,
            propensities,
        };
    }

    let explore_share = epsilon / pool as f64;
    let greedy_top = (1.0 - epsilon) + explore_share;
    let forced = if r < epsilon && j != 0 { Some(j) } else { None };

    if let Some(j) = forced {
        items.swap(0, j);
    }

    let propensities = items
        .iter()
        .take(pool)
        .enumerate()
        .map(|(i, item)| {
            let (probability, was_forced) = match forced {
                Some(_) if i == 0 => (explore_share, true),
                Some(j) if i == j => (greedy_top, false),
                Some(_) => (explore_share, false),
                None if i == 0 => (greedy_top, false),
                None => (explore_share, false),
            };
            Propensity {
                item_id: item.item_id().to_string(),
                probability,
                was_forced,
            }
        })
        .collect();

    Ranked {
        items,
        propensities,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Debug, Clone, PartialEq)]
    struct Candidate {
        id: String,
        score: f64,
    }

    impl Candidate {
        fn new(id: &str, score: f64) -> Self {
            Self {
                id: id.to_string(),
                score,
            }
        }
    }

    impl Scored for Candidate {
        fn item_id(&self) -> &str {
            &self.id
        }
        fn score(&self) -> f64 {
            self.score
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("c", 0.3),
            Candidate::new("a", 0.9),
            Candidate::new("d", 0.1),
            Candidate::new("b", 0.7),
            Candidate::new("e", 0.05),
        ]
    }

    fn ids(items: &[Candidate]) -> Vec<&str> {
        items.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_deterministic_floor_at_zero_epsilon() {
        let mut rng = StdRng::seed_from_u64(7);
        let ranked = epsilon_choose(candidates(), 0.0, 3, &mut rng);

        assert_eq!(ids(&ranked.items), ["a", "b", "c", "d", "e"]);
        assert_eq!(ranked.propensities[0].probability, 1.0);
        assert!(ranked.propensities[1..]
            .iter()
            .all(|p| p.probability == 0.0 && !p.was_forced));
    }

    #[test]
    fn test_pool_of_one_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let ranked = epsilon_choose(candidates(), 0.5, 1, &mut rng);

        assert_eq!(ids(&ranked.items), ["a", "b", "c", "d", "e"]);
        assert_eq!(ranked.propensities.len(), 1);
        assert_eq!(ranked.propensities[0].probability, 1.0);
    }

    #[test]
    fn test_exploit_branch_probabilities() {
        // r >= epsilon keeps greedy order.
        let ranked = choose_with_draws(candidates(), 0.2, 4, 0.9, 0);

        assert_eq!(ids(&ranked.items), ["a", "b", "c", "d", "e"]);
        let p = &ranked.propensities;
        assert_eq!(p.len(), 4);
        assert!((p[0].probability - (0.8 + 0.05)).abs() < 1e-12);
        for pooled in &p[1..] {
            assert!((pooled.probability - 0.05).abs() < 1e-12);
            assert!(!pooled.was_forced);
        }
    }

    #[test]
    fn test_explore_branch_with_j_zero_matches_exploit() {
        let exploit = choose_with_draws(candidates(), 0.2, 4, 0.9, 0);
        let explore_zero = choose_with_draws(candidates(), 0.2, 4, 0.1, 0);

        assert_eq!(ids(&exploit.items), ids(&explore_zero.items));
        assert_eq!(exploit.propensities, explore_zero.propensities);
    }

    #[test]
    fn test_explore_branch_swaps_and_flags() {
        // r < epsilon with j = 2 promotes the third-ranked item.
        let ranked = choose_with_draws(candidates(), 0.2, 4, 0.1, 2);

        assert_eq!(ids(&ranked.items), ["c", "b", "a", "d", "e"]);
        let p = &ranked.propensities;
        assert!(p[0].was_forced);
        assert!((p[0].probability - 0.05).abs() < 1e-12);
        // The displaced greedy top keeps its full selection probability.
        assert_eq!(p[2].item_id, "a");
        assert!((p[2].probability - 0.85).abs() < 1e-12);
        assert!(!p[2].was_forced);
        assert!((p[1].probability - 0.05).abs() < 1e-12);
        assert!((p[3].probability - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_items_outside_pool_never_move() {
        for j in 0..3 {
            let ranked = choose_with_draws(candidates(), 0.5, 3, 0.0, j);
            assert_eq!(ids(&ranked.items)[3..], ["d", "e"]);
            assert_eq!(ranked.propensities.len(), 3);
        }
    }

    #[test]
    fn test_pool_larger_than_items_is_clamped() {
        let mut rng = StdRng::seed_from_u64(3);
        let ranked = epsilon_choose(candidates(), 0.3, 50, &mut rng);
        assert_eq!(ranked.propensities.len(), 5);
        let total: f64 = ranked.propensities.iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let mut rng = StdRng::seed_from_u64(3);
        let ranked = epsilon_choose(Vec::<Candidate>::new(), 0.3, 4, &mut rng);
        assert!(ranked.items.is_empty());
        assert!(ranked.propensities.is_empty());
    }

    proptest! {
        #[test]
        fn prop_propensities_sum_to_one(
            scores in prop::collection::vec(0.0f64..100.0, 2..20),
            epsilon in 0.01f64..0.99,
            pool_size in 2usize..10,
            seed in any::<u64>(),
        ) {
            let items: Vec<Candidate> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| Candidate::new(&format!("item-{}", i), *s))
                .collect();
            let n = items.len();
            let mut rng = StdRng::seed_from_u64(seed);
            let ranked = epsilon_choose(items, epsilon, pool_size, &mut rng);

            let pool = pool_size.min(n);
            prop_assert_eq!(ranked.propensities.len(), pool);
            let total: f64 = ranked.propensities.iter().map(|p| p.probability).sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert_eq!(ranked.items.len(), n);

            // At most one forced item, and only ever at position 0.
            let forced: Vec<usize> = ranked
                .propensities
                .iter()
                .enumerate()
                .filter(|(_, p)| p.was_forced)
                .map(|(i, _)| i)
                .collect();
            prop_assert!(forced.is_empty() || forced == vec![0]);
        }

        #[test]
        fn prop_reordering_is_a_permutation(
            scores in prop::collection::vec(0.0f64..100.0, 1..15),
            seed in any::<u64>(),
        ) {
            let items: Vec<Candidate> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| Candidate::new(&format!("item-{}", i), *s))
                .collect();
            let mut expected: Vec<String> = items.iter().map(|c| c.id.clone()).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            let ranked = epsilon_choose(items, 0.5, 5, &mut rng);

            let mut got: Vec<String> = ranked.items.iter().map(|c| c.id.clone()).collect();
            expected.sort();
            got.sort();
            prop_assert_eq!(got, expected);
        }
    }
}
