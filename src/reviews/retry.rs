use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::reviews::config::RetryPolicy;
use crate::reviews::diagnostics::Diagnostics;
use crate::reviews::error::{
    ERROR_EMPTY_RESPONSE_HEADER, ERROR_EMPTY_REVIEWS_RESPONSE, ERROR_EMPTY_SUMMARY_RESPONSE,
    ERROR_RESPONSE_HEADER_NOT_OK, ERROR_UNABLE_DECODE_REVIEWS_RESPONSE,
    ERROR_UNABLE_DECODE_SUMMARY_RESPONSE,
};

/// Generic transport/decode errors every provider treats as fatal.
pub const BASE_FATAL_ERRORS: [&str; 6] = [
    ERROR_EMPTY_RESPONSE_HEADER,
    ERROR_RESPONSE_HEADER_NOT_OK,
    ERROR_UNABLE_DECODE_SUMMARY_RESPONSE,
    ERROR_EMPTY_SUMMARY_RESPONSE,
    ERROR_UNABLE_DECODE_REVIEWS_RESPONSE,
    ERROR_EMPTY_REVIEWS_RESPONSE,
];

/// Error values that never resolve by retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalErrorSet {
    entries: Vec<String>,
}

impl FatalErrorSet {
    /// Provider-specific entries extended with the base set.
    pub fn with_provider(provider_entries: &[&str]) -> Self {
        let mut entries: Vec<String> = provider_entries.iter().map(|e| e.to_string()).collect();
        for base in BASE_FATAL_ERRORS {
            if !entries.iter().any(|e| e == base) {
                entries.push(base.to_string());
            }
        }
        Self { entries }
    }

    /// Exact match, or any entry contained in the observed error.
    pub fn matches(&self, error: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry == error || error.contains(entry.as_str()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryDelay {
    /// Use the policy delay.
    #[default]
    Default,
    Fixed(Duration),
    None,
}

/// Per-call knobs for [`RetryGovernor::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCall {
    pub log: bool,
    pub delay: RetryDelay,
    pub context: Vec<String>,
}

impl Default for RetryCall {
    fn default() -> Self {
        Self {
            log: true,
            delay: RetryDelay::Default,
            context: Vec::new(),
        }
    }
}

impl RetryCall {
    pub fn quiet(mut self) -> Self {
        self.log = false;
        self
    }

    pub fn delay(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32 },
    Exhausted { attempts: u32 },
    Fatal,
}

impl RetryDecision {
    pub fn granted(self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Per-signature attempt bookkeeping for one provider instance.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    policy: RetryPolicy,
    fatal: FatalErrorSet,
    attempts: HashMap<String, u32>,
    last_error: Option<String>,
}

impl RetryGovernor {
    pub fn new(policy: RetryPolicy, fatal: FatalErrorSet) -> Self {
        Self {
            policy,
            fatal,
            attempts: HashMap::new(),
            last_error: None,
        }
    }

    pub fn fatal_errors(&self) -> &FatalErrorSet {
        &self.fatal
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_last_error_fatal(&self) -> bool {
        self.last_error
            .as_deref()
            .is_some_and(|err| self.fatal.matches(err))
    }

    pub fn attempts(&self, signature: &str) -> u32 {
        self.attempts.get(signature).copied().unwrap_or(0)
    }

    /// Decide without waiting. The counter for `signature` is bumped on every
    /// call, including the one that gives up.
    ///
    /// A signature is fatal only when it is the current error value and that
    /// value is in the fatal set; callers that decorate a signature with request
    /// context opt out of the bypass.
    pub fn decide(
        &mut self,
        signature: &str,
        call: &RetryCall,
        diagnostics: &mut Diagnostics,
    ) -> RetryDecision {
        let is_fatal = self.last_error.as_deref() == Some(signature) && self.fatal.matches(signature);
        let counter = self.attempts.entry(signature.to_string()).or_insert(0);
        let can_retry = !is_fatal && *counter < self.policy.max_retries;
        *counter += 1;
        let attempts = *counter;

        let decision = if is_fatal {
            RetryDecision::Fatal
        } else if can_retry {
            RetryDecision::Retry { attempt: attempts }
        } else {
            RetryDecision::Exhausted { attempts }
        };

        if call.log {
            let message = match decision {
                RetryDecision::Fatal => signature.to_string(),
                RetryDecision::Retry { attempt } => format!("{signature}, retry #{attempt}"),
                RetryDecision::Exhausted { .. } => format!("{signature}, too many retries, break"),
            };
            diagnostics.log(&message, &call.context);
        }
        decision
    }

    /// Decide and, when a retry is granted, wait out the configured delay
    /// before returning.
    pub async fn should_retry(
        &mut self,
        signature: &str,
        call: RetryCall,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        let decision = self.decide(signature, &call, diagnostics);
        if let RetryDecision::Retry { attempt } = decision {
            let wait = match call.delay {
                RetryDelay::Default => self.policy.delay,
                RetryDelay::Fixed(d) => d,
                RetryDelay::None => Duration::ZERO,
            };
            if !wait.is_zero() {
                debug!(target: "reviews", signature, attempt, wait_ms = wait.as_millis() as u64, "waiting before retry");
                tokio::time::sleep(wait).await;
            }
        }
        decision.granted()
    }

    /// Clear one signature's counter, or every counter when `None`.
    pub fn reset(&mut self, signature: Option<&str>) {
        match signature {
            Some(sig) => {
                self.attempts.insert(sig.to_string(), 0);
            }
            None => self.attempts.clear(),
        }
    }
}
