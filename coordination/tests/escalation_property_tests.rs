//! Escalation property tests: exhaustive validation of the Warn/Error ladder
//! across every category and a range of retry budgets.
//!
//! Tests verify:
//! - Warn and Error each fire at most once per episode
//! - A reset episode can escalate again
//! - Resetting twice equals resetting once
//! - A category budget of m allows exactly m retries
//! - Fatal failures never consume retries
//! - Categories never affect each other

use std::time::Duration;

use round_coordination::{
    ApiError, BackoffSchedule, EscalationLevel, EscalationManager, FailureCategory, RetryPolicy,
    Severity,
};

const BUDGETS: [u32; 6] = [0, 1, 2, 3, 5, 8];

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, BackoffSchedule::fixed(Duration::from_millis(10)))
}

fn transient() -> ApiError {
    ApiError::Transient("timeout".into())
}

/// Drive `failures` consecutive transient failures and collect the signals.
fn run_streak(
    manager: &mut EscalationManager,
    category: FailureCategory,
    max_retries: u32,
    failures: u32,
) -> Vec<Severity> {
    let policy = policy(max_retries);
    (0..failures)
        .filter_map(|_| manager.record_failure(category, &policy, &transient()).signal)
        .collect()
}

// ── Property: each severity fires at most once per episode ─────────

#[test]
fn prop_each_severity_at_most_once_per_episode() {
    for category in FailureCategory::ALL {
        for max in BUDGETS {
            for failures in 1..=(max + 5) {
                let mut manager = EscalationManager::new();
                let signals = run_streak(&mut manager, category, max, failures);

                let warns = signals.iter().filter(|s| **s == Severity::Warn).count();
                let errors = signals.iter().filter(|s| **s == Severity::Error).count();
                assert!(warns <= 1, "{category} m={max} n={failures}: {warns} warns");
                assert!(errors <= 1, "{category} m={max} n={failures}: {errors} errors");
            }
        }
    }
}

#[test]
fn prop_should_escalate_never_repeats() {
    for category in FailureCategory::ALL {
        for max in BUDGETS {
            let mut manager = EscalationManager::new();
            let mut warns = 0;
            let mut errors = 0;
            // Include retry counts past the budget, as a stuck caller would.
            for retry_count in 0..(max + 10) {
                match manager.should_escalate(category, retry_count, max) {
                    Some(Severity::Warn) => warns += 1,
                    Some(Severity::Error) => errors += 1,
                    None => {}
                }
            }
            assert!(warns <= 1);
            assert_eq!(errors, 1, "{category} m={max}");
            assert_eq!(manager.level(category), EscalationLevel::Errored);
        }
    }
}

// ── Property: the signal sequence matches the budget ───────────────

#[test]
fn prop_exhausted_streak_warns_then_errors() {
    for category in FailureCategory::ALL {
        for max in BUDGETS {
            let mut manager = EscalationManager::new();
            let signals = run_streak(&mut manager, category, max, max + 1);

            let expected = if max == 0 {
                vec![Severity::Error]
            } else {
                vec![Severity::Warn, Severity::Error]
            };
            assert_eq!(signals, expected, "{category} m={max}");
        }
    }
}

#[test]
fn prop_budget_allows_exactly_max_retries() {
    for max in BUDGETS {
        let mut manager = EscalationManager::new();
        let policy = policy(max);
        let retries = (0..max + 3)
            .map(|_| manager.record_failure(FailureCategory::NoDeal, &policy, &transient()))
            .filter(|d| !d.exhausted())
            .count();
        assert_eq!(retries as u32, max);
        assert_eq!(manager.retry_count(FailureCategory::NoDeal), max);
    }
}

// ── Property: reset re-arms both severities ────────────────────────

#[test]
fn prop_reset_allows_escalation_again() {
    for category in FailureCategory::ALL {
        for max in BUDGETS {
            let mut manager = EscalationManager::new();
            let first = run_streak(&mut manager, category, max, max + 1);
            manager.reset_episode(category);
            assert_eq!(manager.level(category), EscalationLevel::None);
            assert_eq!(manager.retry_count(category), 0);

            let second = run_streak(&mut manager, category, max, max + 1);
            assert_eq!(first, second, "{category} m={max}");
        }
    }
}

#[test]
fn prop_double_reset_is_idempotent() {
    for category in FailureCategory::ALL {
        let mut once = EscalationManager::new();
        let mut twice = EscalationManager::new();
        run_streak(&mut once, category, 3, 2);
        run_streak(&mut twice, category, 3, 2);

        once.reset_episode(category);
        twice.reset_episode(category);
        twice.reset_episode(category);

        assert_eq!(once.level(category), twice.level(category));
        assert_eq!(once.retry_count(category), twice.retry_count(category));
        assert_eq!(once.has_open_episodes(), twice.has_open_episodes());

        let a = run_streak(&mut once, category, 3, 4);
        let b = run_streak(&mut twice, category, 3, 4);
        assert_eq!(a, b);
    }
}

// ── Property: fatal failures skip the budget ───────────────────────

#[test]
fn prop_fatal_goes_straight_to_error() {
    for category in FailureCategory::ALL {
        for max in BUDGETS {
            let mut manager = EscalationManager::new();
            let decision =
                manager.record_failure(category, &policy(max), &ApiError::Fatal("bad".into()));
            assert_eq!(decision.signal, Some(Severity::Error), "{category} m={max}");
            assert!(decision.exhausted());
            assert_eq!(manager.retry_count(category), 0);
        }
    }
}

// ── Property: categories are independent ───────────────────────────

#[test]
fn prop_categories_do_not_interfere() {
    for failing in FailureCategory::ALL {
        let mut manager = EscalationManager::new();
        run_streak(&mut manager, failing, 2, 3);

        for other in FailureCategory::ALL.into_iter().filter(|c| *c != failing) {
            assert_eq!(manager.level(other), EscalationLevel::None);
            assert_eq!(manager.retry_count(other), 0);
            let signals = run_streak(&mut manager, other, 2, 1);
            assert_eq!(signals, vec![Severity::Warn]);
            manager.reset_episode(other);
        }
        assert_eq!(manager.level(failing), EscalationLevel::Errored);
    }
}
