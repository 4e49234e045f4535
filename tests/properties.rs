//! Property-based tests for convergence
//!
//! These tests validate the budget, consensus and combinator invariants
//! using proptest.

use convergence::core::budget::{BudgetParams, ComputeBudget};
use convergence::core::prm::{self, PrmError};
use convergence::core::{
    default_matcher, difficulty_bounds, Candidate, ComputeBudgeter, ConsensusChecker,
    DifficultyLevel, MajorityVoteAggregator,
};
use convergence::AggregationStrategy;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn level() -> impl Strategy<Value = DifficultyLevel> {
    prop_oneof![
        Just(DifficultyLevel::Easy),
        Just(DifficultyLevel::Medium),
        Just(DifficultyLevel::Hard),
    ]
}

fn budget_params() -> impl Strategy<Value = BudgetParams> {
    (
        1_usize..50,
        any::<bool>(),
        any::<bool>(),
        proptest::option::of(1_usize..200),
        0_usize..5,
    )
        .prop_map(|(n, use_prm, use_search, iterations, refinements)| {
            let mut params = BudgetParams::new(n)
                .with_prm(use_prm)
                .with_search(use_search)
                .with_max_refinements(refinements);
            params.search_iterations = iterations;
            params
        })
}

fn expected_cost(params: &BudgetParams) -> f64 {
    let n = params.num_candidates as f64;
    let mut cost = n + params.max_refinements as f64;
    if params.use_prm {
        cost += n * 0.5;
    }
    if params.use_search {
        cost += params.search_iterations.unwrap_or(50) as f64 * 0.01;
    }
    cost
}

fn exact_checker() -> ConsensusChecker {
    ConsensusChecker::with_aggregator(Arc::new(
        MajorityVoteAggregator::new().with_matcher(default_matcher()),
    ))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: initial_n <= max_n, both inside [min_candidates, max_candidates]
    #[test]
    fn prop_difficulty_bounds_are_clamped(
        level in level(),
        min in 1_usize..15,
        extra in 1_usize..30,
    ) {
        let max = min + extra;
        let (initial_n, max_n) = difficulty_bounds(level, min, max);

        prop_assert!(initial_n <= max_n, "initial {} > max {}", initial_n, max_n);
        prop_assert!((min..=max).contains(&initial_n), "initial {} outside [{}, {}]", initial_n, min, max);
        prop_assert!((min..=max).contains(&max_n), "max {} outside [{}, {}]", max_n, min, max);
    }

    /// Property: agreement is in [0, 1] and is 1.0 exactly when all answers match
    #[test]
    fn prop_agreement_bounds(
        answers in proptest::collection::vec("[abc]", 1..12),
    ) {
        let candidates: Vec<Candidate> = answers
            .iter()
            .enumerate()
            .map(|(i, a)| Candidate::new(format!("c{}", i), a.as_str()))
            .collect();
        let check = exact_checker().check(&candidates, Some(0.5)).unwrap();

        prop_assert!((0.0..=1.0).contains(&check.agreement));
        let distinct: HashSet<&String> = answers.iter().collect();
        prop_assert_eq!(check.agreement == 1.0, distinct.len() == 1);
        prop_assert_eq!(check.reached, check.agreement >= 0.5);
    }

    /// Property: cost follows the cost model and survives a map round trip
    #[test]
    fn prop_cost_is_derived(params in budget_params()) {
        let expected = expected_cost(&params);
        let budget = ComputeBudget::new(params).unwrap();
        prop_assert!((budget.cost() - expected).abs() < 1e-9);

        let mut map = budget.to_map();
        map.insert("cost".into(), serde_json::Value::from(-1.0));
        let rebuilt = ComputeBudget::from_map(&map).unwrap();
        prop_assert_eq!(rebuilt.cost(), budget.cost());
        prop_assert_eq!(rebuilt, budget);
    }

    /// Property: allocation never pushes used budget past the global limit
    #[test]
    fn prop_allocate_respects_global_limit(
        limit in 0.0_f64..100.0,
        levels in proptest::collection::vec(level(), 1..30),
    ) {
        let mut budgeter = ComputeBudgeter::new().with_global_limit(limit).unwrap();
        for level in levels {
            let before = budgeter.used_budget();
            match budgeter.allocate(level) {
                Ok((budget, next)) => {
                    prop_assert!(next.used_budget() <= limit);
                    prop_assert!((next.used_budget() - before - budget.cost()).abs() < 1e-9);
                    budgeter = next;
                }
                Err(e) => {
                    prop_assert!(e.is_resource());
                    prop_assert!(before + ComputeBudget::for_level(level).cost() > limit);
                }
            }
        }
    }

    /// Property: weights must sum to 1.0 within 0.001
    #[test]
    fn prop_weighted_average_rejects_unnormalized(
        scores in proptest::collection::vec(0.0_f64..1.0, 1..8),
        raw in proptest::collection::vec(0.01_f64..1.0, 1..8),
        offset in 0.002_f64..0.5,
    ) {
        let n = scores.len().min(raw.len());
        let (scores, raw) = (&scores[..n], &raw[..n]);

        let normalized = prm::normalize_weights(raw);
        let mean = prm::weighted_average(scores, &normalized).unwrap();
        prop_assert!(mean >= -1e-9 && mean <= 1.0 + 1e-9);

        let mut skewed = normalized.clone();
        skewed[0] += offset;
        let is_not_normalized = matches!(
            prm::weighted_average(scores, &skewed),
            Err(PrmError::WeightsNotNormalized { .. })
        );
        prop_assert!(is_not_normalized);

        let mut longer = normalized;
        longer.push(0.0);
        let is_mismatch = matches!(
            prm::weighted_average(scores, &longer),
            Err(PrmError::WeightLengthMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }

    /// Property: softmax is a probability distribution
    #[test]
    fn prop_softmax_sums_to_one(scores in proptest::collection::vec(-50.0_f64..50.0, 1..20)) {
        let probs = prm::softmax(&scores);
        prop_assert_eq!(probs.len(), scores.len());
        prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    /// Property: weighted_avg lies between min and max
    #[test]
    fn prop_weighted_avg_between_min_and_max(
        scored in proptest::collection::vec((0.0_f64..1.0, 0.1_f64..5.0), 1..10),
    ) {
        let avg = AggregationStrategy::WeightedAvg.apply(&scored);
        let lo = AggregationStrategy::Min.apply(&scored);
        let hi = AggregationStrategy::Max.apply(&scored);
        prop_assert!(lo - 1e-9 <= avg && avg <= hi + 1e-9, "{} not in [{}, {}]", avg, lo, hi);
    }
}
