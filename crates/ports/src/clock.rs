//! Wall clock boundary contract.

/// Milliseconds since the Unix epoch.
pub trait ClockPort: Send + Sync {
    /// Current time.
    fn now_ms(&self) -> u64;
}
