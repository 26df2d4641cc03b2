use std::time::Duration;

use crate::decode::DecodeLevel;

/// Retry and timeout behavior of a master
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MasterSettings {
    /// number of times a request is re-sent after a timeout or a malformed response
    ///
    /// every call makes at most `retries + 1` attempts
    pub retries: usize,
    /// time allowed for each attempt to receive a matching response
    pub response_timeout: Duration,
    /// pause before re-sending after a failed attempt
    pub wait_to_retry: Duration,
    /// decode level used for logging
    pub decode: DecodeLevel,
}

impl MasterSettings {
    /// default number of retries
    pub const DEFAULT_RETRIES: usize = 3;
    /// default response timeout
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
    /// default pause before a retry
    pub const DEFAULT_WAIT_TO_RETRY: Duration = Duration::from_millis(250);

    /// change the number of retries
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// change the response timeout of each attempt
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// change the pause before a retry
    pub fn wait_to_retry(mut self, delay: Duration) -> Self {
        self.wait_to_retry = delay;
        self
    }

    /// change the decode level
    pub fn decode(mut self, decode: DecodeLevel) -> Self {
        self.decode = decode;
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            retries: Self::DEFAULT_RETRIES,
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
            wait_to_retry: Self::DEFAULT_WAIT_TO_RETRY,
            decode: DecodeLevel::default(),
        }
    }
}
