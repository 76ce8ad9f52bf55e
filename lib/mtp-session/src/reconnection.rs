// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A pluggable reconnection policy, the way `grammers-mtsender` lets
//! callers decide whether and how long to wait between connection
//! attempts without baking the decision into the router itself.
use std::ops::ControlFlow;
use std::time::Duration;

/// Decides whether a dropped connection should be retried.
///
/// `should_retry` is told how many attempts have already been made and
/// answers with `ControlFlow::Continue(delay)` to retry after `delay`,
/// or `ControlFlow::Break(())` to give up.
pub trait ReconnectionPolicy: Send + Sync {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration>;
}

/// Never reconnects; the first failure is final.
pub struct NoReconnect;

impl ReconnectionPolicy for NoReconnect {
    fn should_retry(&self, _attempts: usize) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Retries a fixed number of times with a constant delay between
/// attempts.
pub struct FixedReconnect {
    pub attempts: usize,
    pub delay: Duration,
}

impl ReconnectionPolicy for FixedReconnect {
    fn should_retry(&self, attempts: usize) -> ControlFlow<(), Duration> {
        if attempts <= self.attempts {
            ControlFlow::Continue(self.delay)
        } else {
            ControlFlow::Break(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reconnect_always_breaks() {
        assert_eq!(NoReconnect.should_retry(0), ControlFlow::Break(()));
        assert_eq!(NoReconnect.should_retry(50), ControlFlow::Break(()));
    }

    #[test]
    fn fixed_reconnect_stops_after_its_budget() {
        let policy = FixedReconnect {
            attempts: 2,
            delay: Duration::from_millis(10),
        };
        assert_eq!(
            policy.should_retry(0),
            ControlFlow::Continue(Duration::from_millis(10))
        );
        assert_eq!(
            policy.should_retry(2),
            ControlFlow::Continue(Duration::from_millis(10))
        );
        assert_eq!(policy.should_retry(3), ControlFlow::Break(()));
    }
}
