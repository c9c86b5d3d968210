//! Tunables for the dispatcher queues and the boot poll.

use std::time::Duration;

/// Capacities and intervals for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of the inbound request queue fed by the transport.
    pub request_queue_capacity: usize,

    /// Capacity of the raw work channel between the reader and the engine.
    pub work_raw_capacity: usize,

    /// How many state-dependent requests the reader will buffer before the
    /// build is up. Excess requests are rejected with a queue-full reply.
    pub deferred_startup_capacity: usize,

    /// How often the reader re-checks for the build while waiting for it
    /// to load.
    pub boot_poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            request_queue_capacity: 1024,
            work_raw_capacity: 10,
            deferred_startup_capacity: 32,
            boot_poll_interval: Duration::from_secs(1),
        }
    }
}
