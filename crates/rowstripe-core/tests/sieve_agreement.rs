//! Distributed prime counts against the sequential reference sieve.

use proptest::prelude::*;
use rowstripe_core::sieve::{
    run_sieve_job, sequential_prime_count, SieveConfig, SieveError, SmallPrimeStrategy,
};

fn count(max_num: u64, workers: usize, threads: usize, strategy: SmallPrimeStrategy) -> u64 {
    let config = SieveConfig {
        max_num,
        threads,
        strategy,
    };
    run_sieve_job(&config, workers).unwrap().total_primes
}

#[test]
fn test_sieve_100_any_worker_count() {
    for workers in [1, 2, 4] {
        assert_eq!(count(100, workers, 1, SmallPrimeStrategy::Recompute), 25);
    }
}

#[test]
fn test_worker_counts_agree() {
    for max_num in [2, 3, 10, 97, 1_000, 9_973, 65_536, 100_003] {
        let expected = sequential_prime_count(max_num);
        for workers in [1, 2, 7, 16] {
            assert_eq!(
                count(max_num, workers, 1, SmallPrimeStrategy::Recompute),
                expected,
                "N = {}, P = {}",
                max_num,
                workers
            );
        }
    }
}

#[test]
fn test_one_million_with_threads() {
    assert_eq!(count(1_000_000, 3, 4, SmallPrimeStrategy::Recompute), 78_498);
}

#[test]
fn test_broadcast_strategy_agrees() {
    for max_num in [2, 50, 10_000, 123_457] {
        let expected = sequential_prime_count(max_num);
        for workers in [1, 2, 7] {
            assert_eq!(
                count(max_num, workers, 2, SmallPrimeStrategy::Broadcast),
                expected,
                "N = {}, P = {}",
                max_num,
                workers
            );
        }
    }
}

#[test]
fn test_broadcast_capacity_aborts_job() {
    let config = SieveConfig {
        max_num: 100,
        threads: 1,
        strategy: SmallPrimeStrategy::Broadcast,
    };
    let err = run_sieve_job(&config, 16).unwrap_err();
    assert_eq!(err.rank(), Some(0));
    assert!(matches!(
        err.worker_error(),
        Some(SieveError::CapacityExceeded { workers: 16, .. })
    ));
    assert!(err.to_string().contains("Too many processes"));
}

#[test]
fn test_recompute_ignores_capacity() {
    // The same shape the broadcast strategy rejects.
    assert_eq!(count(100, 16, 1, SmallPrimeStrategy::Recompute), 25);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_count_matches_reference(max_num in 0u64..30_000, workers in 1usize..12) {
        prop_assert_eq!(
            count(max_num, workers, 1, SmallPrimeStrategy::Recompute),
            sequential_prime_count(max_num)
        );
    }
}
