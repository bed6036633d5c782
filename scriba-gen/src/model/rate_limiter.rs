//! Session-wide request gate
//!
//! One gate is created per session and shared (via `Arc`) by the orchestrator,
//! editor and tutor, so every outbound model request in the session counts
//! against the same requests-per-minute quota. Acquiring waits; it never
//! rejects.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Instant;

/// Requests-per-minute gate in front of the generative model
pub struct RequestGate {
    limiter: DefaultDirectRateLimiter,
    rpm: u32,
}

impl RequestGate {
    /// Gate allowing `rpm` requests per minute, evenly spaced (no bursts)
    pub fn per_minute(rpm: u32) -> Self {
        let rpm = NonZeroU32::new(rpm).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(rpm).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            rpm: rpm.get(),
        }
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Wait until the next request may be issued
    pub async fn acquire(&self) {
        let started = Instant::now();
        self.limiter.until_ready().await;

        let waited_ms = started.elapsed().as_millis();
        if waited_ms > 0 {
            tracing::debug!(waited_ms, rpm = self.rpm, "Request gate released");
        }
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate").field("rpm", &self.rpm).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let gate = RequestGate::per_minute(1);
        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_requests_are_spaced() {
        // 1200/min = one request every 50ms
        let gate = RequestGate::per_minute(1200);
        let start = Instant::now();
        for _ in 0..3 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_zero_rpm_falls_back_to_one() {
        assert_eq!(RequestGate::per_minute(0).rpm(), 1);
    }
}
