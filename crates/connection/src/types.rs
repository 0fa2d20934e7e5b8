//! Public types for the connection layer.

use std::time::Duration;

use rand::Rng;

use mintdrip_protocol::constants::{
    EXPECTED_PONG_BACK, KEEP_ALIVE_CHECK_INTERVAL, MAX_RECONNECTION_ATTEMPTS, READY_TIMEOUT,
    RECONNECTION_DELAY, RPC_REQUEST_TIMEOUT,
};

/// A node endpoint: WebSocket URL plus the chain it must serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub chain_id: u64,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            url: url.into(),
            chain_id,
        }
    }
}

/// Lifecycle state of a [`ConnectionSupervisor`](crate::ConnectionSupervisor).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Created, no socket requested yet.
    Idle,
    /// Socket requested; waiting for open and readiness.
    Connecting { attempt: u32 },
    /// Socket open, handshake done, liveness running, subscriptions replayed.
    Ready,
    /// Socket lost; teardown and backoff in progress.
    Degraded,
    /// Explicit shutdown in progress.
    Closing,
    /// No further transitions.
    Terminated,
}

/// Why a transport socket stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Peer sent a close frame.
    Remote { code: Option<u16> },
    /// Stream ended without a close frame.
    StreamEnded,
    /// Fatal transport error.
    Error(String),
    /// Terminated locally (liveness timeout, write failure, shutdown).
    Terminated,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { code: Some(code) } => write!(f, "closed by peer (code {code})"),
            Self::Remote { code: None } => f.write_str("closed by peer"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::Error(e) => write!(f, "transport error: {e}"),
            Self::Terminated => f.write_str("terminated locally"),
        }
    }
}

/// Events emitted by a supervisor.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged {
        url: String,
        state: ConnectionState,
    },
    /// A retry has been scheduled.
    Reconnecting {
        url: String,
        attempt: u32,
        next_retry_secs: f64,
    },
    /// Registry replay finished on a new socket.
    Resubscribed {
        url: String,
        restored: usize,
        failed: usize,
    },
}

/// Delay policy between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Growing delay with ±25% jitter.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

/// Configuration for bounded reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the supervisor terminates.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound for the readiness handshake after a socket opens.
    pub ready_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECTION_ATTEMPTS,
            backoff: Backoff::Fixed(RECONNECTION_DELAY),
            ready_timeout: READY_TIMEOUT,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                let secs = initial.as_secs_f64() * factor.powi(exp);
                let capped = secs.min(max.as_secs_f64());
                // Add ±25% jitter.
                let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
                let with_jitter = (capped + capped * 0.25 * offset).max(0.05);
                Duration::from_secs_f64(with_jitter)
            }
        }
    }
}

/// Ping/pong liveness probing.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub interval: Duration,
    pub expected_pong_back: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval: KEEP_ALIVE_CHECK_INTERVAL,
            expected_pong_back: EXPECTED_PONG_BACK,
        }
    }
}

/// Everything a supervisor needs besides its endpoint and connector.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub reconnect: ReconnectConfig,
    pub liveness: LivenessConfig,
    pub request_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            liveness: LivenessConfig::default(),
            request_timeout: RPC_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_equality() {
        assert_eq!(ConnectionState::Idle, ConnectionState::Idle);
        assert_ne!(ConnectionState::Ready, ConnectionState::Degraded);
        assert_eq!(
            ConnectionState::Connecting { attempt: 1 },
            ConnectionState::Connecting { attempt: 1 },
        );
        assert_ne!(
            ConnectionState::Connecting { attempt: 1 },
            ConnectionState::Connecting { attempt: 2 },
        );
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff, Backoff::Fixed(Duration::from_millis(5000)));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let config = ReconnectConfig::default();
        for attempt in 1..10 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn exponential_backoff_within_jitter() {
        let config = ReconnectConfig {
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(250),
                max: Duration::from_secs(15),
                factor: 2.0,
            },
            ..Default::default()
        };
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 8s, 15s (capped), 15s...
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = config.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn exponential_jitter_spans_both_sides() {
        let config = ReconnectConfig {
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(15),
                factor: 2.0,
            },
            ..Default::default()
        };
        let samples: Vec<f64> = (0..2000)
            .map(|_| config.delay_for_attempt(1).as_secs_f64())
            .collect();
        assert!(samples.iter().any(|&s| s > 1.1), "never above base");
        assert!(samples.iter().any(|&s| s < 0.9), "never below base");
        assert!(samples.iter().all(|&s| (0.75..=1.25).contains(&s)));
    }

    #[test]
    fn liveness_defaults() {
        let config = LivenessConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.expected_pong_back, Duration::from_secs(15));
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(
            CloseReason::Remote { code: Some(1001) }.to_string(),
            "closed by peer (code 1001)"
        );
        assert_eq!(CloseReason::Terminated.to_string(), "terminated locally");
    }
}
