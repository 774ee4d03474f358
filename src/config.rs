//! Runtime configuration.

use std::time::Duration;

/// Default deadline applied to every call which doesn't set its own.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of times a request may be forwarded between localities.
pub const DEFAULT_MAX_FORWARD_HOPS: u8 = 4;

/// Configuration for a locality's runtime.
///
/// The locality itself is taken from the transport the runtime is built with.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Deadline for calls and internal requests, `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How many times a request may be forwarded toward an instance's current host.
    pub max_forward_hops: u8,
}

impl RuntimeConfig {
    /// Sets the default call deadline.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the maximum forwarding hops.
    pub fn with_max_forward_hops(mut self, hops: u8) -> Self {
        self.max_forward_hops = hops;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            max_forward_hops: DEFAULT_MAX_FORWARD_HOPS,
        }
    }
}
