//! Small statistics helpers for the out-of-scope report comparator to call
//! (spec §9 open question).

use crate::outcome::RunOutcome;

/// Mean runtime over the successful (`Run`) outcomes in `outcomes`.
///
/// The original implementation computes a mean over an empty list when no
/// run succeeded, which raises. Resolved per spec §9/§10: return `0.0` on
/// an empty input and let the caller decide whether to warn.
pub fn mean_runtime(outcomes: &[RunOutcome]) -> f64 {
    let runtimes: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| match o {
            RunOutcome::Run { runtime_sec, .. } => Some(*runtime_sec),
            _ => None,
        })
        .collect();
    if runtimes.is_empty() {
        tracing::warn!("mean_runtime called with no successful Run outcomes, returning 0.0");
        return 0.0;
    }
    runtimes.iter().sum::<f64>() / runtimes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Timestamp;

    #[test]
    fn empty_input_returns_zero() {
        assert_eq!(mean_runtime(&[]), 0.0);
    }

    #[test]
    fn averages_only_run_outcomes() {
        let outcomes = vec![
            RunOutcome::Run {
                core: 0,
                errors: 0,
                faults: 0,
                runtime_sec: 0.2,
                timestamp: Timestamp::now(),
            },
            RunOutcome::Run {
                core: 0,
                errors: 0,
                faults: 0,
                runtime_sec: 0.4,
                timestamp: Timestamp::now(),
            },
            RunOutcome::Invalid {
                raw: "x".into(),
                timestamp: Timestamp::now(),
            },
        ];
        assert!((mean_runtime(&outcomes) - 0.3).abs() < 1e-9);
    }
}
