use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::{backoff, failure_policy, CircuitBreaker, Config, StateMachine};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::models::Source;

pub type SourceCircuitBreaker = StateMachine<ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker guarding one upstream registry.
///
/// # Configuration
///
/// - **Failure threshold**: `threshold` consecutive failures trigger the OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before a trial call.
///
/// # States
///
/// - **CLOSED**: Normal operation, calls pass through.
/// - **OPEN**: The registry keeps failing, calls are rejected without a request.
/// - **HALF_OPEN**: One trial call decides whether to close again.
pub fn create_source_circuit_breaker(threshold: u32) -> SourceCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(threshold.max(1), backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// One breaker per source. A tripped source never affects the others.
pub struct SourceBreakers {
    breakers: HashMap<Source, SourceCircuitBreaker>,
}

impl SourceBreakers {
    pub fn new(threshold: u32) -> Self {
        let breakers = Source::ALL
            .iter()
            .map(|source| (*source, create_source_circuit_breaker(threshold)))
            .collect();
        Self { breakers }
    }

    pub fn is_call_permitted(&self, source: Source) -> bool {
        self.breakers
            .get(&source)
            .map(|b| b.is_call_permitted())
            .unwrap_or(true)
    }

    /// Feeds the outcome of a finished call into the source's breaker.
    pub fn record(&self, source: Source, success: bool) {
        let Some(breaker) = self.breakers.get(&source) else {
            return;
        };
        let outcome = breaker.call(|| if success { Ok(()) } else { Err(()) });
        if !success && !breaker.is_call_permitted() && outcome.is_err() {
            warn!("⚠ Circuit open for {}, pausing calls", source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::Error;

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_source_circuit_breaker(5);

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("simulated error"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_breakers_are_isolated_per_source() {
        let breakers = SourceBreakers::new(2);
        breakers.record(Source::Fedresurs, false);
        breakers.record(Source::Fedresurs, false);

        assert!(!breakers.is_call_permitted(Source::Fedresurs));
        for source in [Source::Fssp, Source::Rosreestr, Source::Courts, Source::Tax] {
            assert!(breakers.is_call_permitted(source));
        }
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breakers = SourceBreakers::new(2);
        breakers.record(Source::Tax, false);
        breakers.record(Source::Tax, true);
        breakers.record(Source::Tax, false);
        assert!(breakers.is_call_permitted(Source::Tax));
    }
}
