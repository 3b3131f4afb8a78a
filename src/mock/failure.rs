//! Failure Injection for the Fakes
//!
//! Makes chosen operations of a fake fail, either on every call or for the
//! first `fail_count` calls only.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// How an injected failure shows up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// The connection drops (transport-level error)
    Disconnect(String),
    /// The remote side answers with an error
    Fault { code: i64, message: String },
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Failure to return; `None` only delays
    pub mode: Option<FailureMode>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
    /// Calls let through before the first failure
    pub pass_first: u32,
}

impl FailureConfig {
    /// Drop the connection
    pub fn disconnect(message: impl Into<String>) -> Self {
        Self {
            mode: Some(FailureMode::Disconnect(message.into())),
            delay: None,
            fail_count: None,
            pass_first: 0,
        }
    }

    /// Answer with a fault
    pub fn fault(code: i64, message: impl Into<String>) -> Self {
        Self {
            mode: Some(FailureMode::Fault {
                code,
                message: message.into(),
            }),
            delay: None,
            fail_count: None,
            pass_first: 0,
        }
    }

    /// Only add delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            mode: None,
            delay: Some(duration),
            fail_count: None,
            pass_first: 0,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    /// Let the first `count` calls succeed
    pub fn after(mut self, count: u32) -> Self {
        self.pass_first = count;
        self
    }
}

/// Per-operation failure injector
#[derive(Debug)]
pub struct FailureInjector<K> {
    configs: HashMap<K, FailureConfig>,
    call_counts: HashMap<K, u32>,
}

impl<K> Default for FailureInjector<K> {
    fn default() -> Self {
        Self {
            configs: HashMap::new(),
            call_counts: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> FailureInjector<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: K, config: FailureConfig) {
        self.configs.insert(op.clone(), config);
        self.call_counts.insert(op, 0);
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Clear failure injection for a specific operation
    pub fn clear_op(&mut self, op: &K) {
        self.configs.remove(op);
        self.call_counts.remove(op);
    }

    /// Failure to apply to this call of `op`, if any.
    ///
    /// Sleeps for the configured delay first.
    pub fn check(&mut self, op: &K) -> Option<FailureMode> {
        let config = self.configs.get(op)?;
        let count = self.call_counts.entry(op.clone()).or_insert(0);
        *count += 1;

        if let Some(delay) = config.delay {
            std::thread::sleep(delay);
        }
        if *count <= config.pass_first {
            return None;
        }
        let failures = *count - config.pass_first;
        if let Some(limit) = config.fail_count {
            if failures > limit {
                return None;
            }
        }
        config.mode.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injector_basic() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(&"submit").is_none());

        injector.inject("submit", FailureConfig::fault(-32000, "no devices"));
        assert_eq!(
            injector.check(&"submit"),
            Some(FailureMode::Fault {
                code: -32000,
                message: "no devices".to_string()
            })
        );
        assert!(injector.check(&"status").is_none());
    }

    #[test]
    fn test_injector_fail_count() {
        let mut injector = FailureInjector::new();
        injector.inject("put".to_string(), FailureConfig::disconnect("reset").with_fail_count(2));

        assert!(injector.check(&"put".to_string()).is_some());
        assert!(injector.check(&"put".to_string()).is_some());
        assert!(injector.check(&"put".to_string()).is_none());
    }

    #[test]
    fn test_injector_after() {
        let mut injector = FailureInjector::new();
        injector.inject("put", FailureConfig::disconnect("reset").after(1).with_fail_count(1));

        assert!(injector.check(&"put").is_none());
        assert!(injector.check(&"put").is_some());
        assert!(injector.check(&"put").is_none());
    }

    #[test]
    fn test_delay_only() {
        let mut injector = FailureInjector::new();
        injector.inject(1u8, FailureConfig::delay(Duration::from_millis(1)));
        assert!(injector.check(&1).is_none());
    }

    #[test]
    fn test_clear() {
        let mut injector = FailureInjector::new();
        injector.inject("read", FailureConfig::disconnect("gone"));
        injector.clear_op(&"read");
        assert!(injector.check(&"read").is_none());

        injector.inject("read", FailureConfig::disconnect("gone"));
        injector.clear();
        assert!(injector.check(&"read").is_none());
    }
}
