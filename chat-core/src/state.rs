//! Connection state machine for the live channel.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the push-channel lifecycle. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, sleeping between attempts, closing sockets) is
//! performed by chat-client, not by this module. This enables instant unit
//! testing without network mocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Observable connection status.
///
/// Owned by the live channel; everything else only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Never asked to connect.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and delivering messages.
    Connected,
    /// Connection dropped; automatic reconnection in progress.
    Reconnecting,
    /// Closed for good (requested, or reconnect attempts exhausted).
    Disconnected,
    /// The first connection attempt failed.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet connected.
    Idle,
    /// Connection attempt in progress.
    Connecting,
    /// Fully connected.
    Connected,
    /// Transport dropped, waiting for or performing a reconnect attempt.
    Reconnecting {
        /// Number of failed reconnection attempts in this cycle.
        attempt: u32,
    },
    /// Terminal for the channel.
    Disconnected,
    /// Initial connect failed. `ConnectRequested` starts over.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (chat-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle / Failed
            (Self::Idle | Self::Failed { .. }, Event::ConnectRequested) => (
                Self::Connecting,
                vec![
                    Action::EmitStatus(ConnectionStatus::Connecting),
                    Action::Connect,
                ],
            ),

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![Action::EmitStatus(ConnectionStatus::Connected)],
            ),
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Failed { error },
                vec![
                    Action::CloseTransport,
                    Action::EmitStatus(ConnectionStatus::Failed),
                ],
            ),

            // From Connected
            (Self::Connected, Event::TransportDropped { .. }) => {
                if policy.max_attempts == 0 {
                    (
                        Self::Disconnected,
                        vec![
                            Action::CloseTransport,
                            Action::EmitStatus(ConnectionStatus::Disconnected),
                        ],
                    )
                } else {
                    (
                        Self::Reconnecting { attempt: 0 },
                        vec![
                            Action::EmitStatus(ConnectionStatus::Reconnecting),
                            Action::StartReconnectTimer {
                                delay: policy.delay_for(1),
                            },
                        ],
                    )
                }
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ReconnectTimer) => {
                (Self::Reconnecting { attempt }, vec![Action::Connect])
            }
            (Self::Reconnecting { .. }, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![Action::EmitStatus(ConnectionStatus::Connected)],
            ),
            (Self::Reconnecting { attempt }, Event::ConnectFailed { .. }) => {
                let failed = attempt.saturating_add(1);
                if failed >= policy.max_attempts {
                    (
                        Self::Disconnected,
                        vec![
                            Action::CloseTransport,
                            Action::EmitStatus(ConnectionStatus::Disconnected),
                        ],
                    )
                } else {
                    (
                        Self::Reconnecting { attempt: failed },
                        vec![Action::StartReconnectTimer {
                            delay: policy.delay_for(failed + 1),
                        }],
                    )
                }
            }

            // Disconnect is accepted everywhere
            (Self::Disconnected, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CloseTransport])
            }
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelReconnect,
                    Action::CloseTransport,
                    Action::EmitStatus(ConnectionStatus::Disconnected),
                ],
            ),
            (_, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CloseTransport,
                    Action::EmitStatus(ConnectionStatus::Disconnected),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// The observable status for this state.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Idle,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected => ConnectionStatus::Connected,
            Self::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Failed { .. } => ConnectionStatus::Failed,
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller requested connection.
    ConnectRequested,
    /// Transport connection (including handshake) succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An established connection was lost.
    TransportDropped {
        /// Reason for the drop.
        reason: String,
    },
    /// Caller requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by chat-client.
///
/// These are instructions, not side effects. chat-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Initiate transport connection.
    Connect,
    /// Release the transport.
    CloseTransport,
    /// Start a timer for the next reconnection attempt.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Publish a status change to observers.
    EmitStatus(ConnectionStatus),
}

/// How long to wait between reconnection attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `base * 2^(attempt-1)`, capped at `max`, plus random jitter.
    Exponential {
        /// First delay in milliseconds.
        base_ms: u64,
        /// Cap in milliseconds (before jitter).
        max_ms: u64,
        /// Upper bound of the random jitter in milliseconds.
        jitter_ms: u64,
    },
    /// Explicit per-attempt delays; the last entry repeats.
    Schedule {
        /// Delays in milliseconds.
        delays_ms: Vec<u64>,
    },
}

/// Reconnect policy: attempt budget plus backoff strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnection attempts before giving up (0 disables reconnection).
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self::new(0, Backoff::Fixed { delay_ms: 0 })
    }

    /// Delay before the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match &self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                base_ms,
                max_ms,
                jitter_ms,
            } => {
                let factor = 2u64.saturating_pow((attempt - 1).min(32));
                let base = base_ms.saturating_mul(factor).min(*max_ms);
                Duration::from_millis(base.saturating_add(random_jitter_ms(*jitter_ms)))
            }
            Backoff::Schedule { delays_ms } => {
                let idx = (attempt as usize - 1).min(delays_ms.len().saturating_sub(1));
                Duration::from_millis(delays_ms.get(idx).copied().unwrap_or(0))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    /// 0s, 2s, 10s, 30s, then give up.
    fn default() -> Self {
        Self::new(
            4,
            Backoff::Schedule {
                delays_ms: vec![0, 2_000, 10_000, 30_000],
            },
        )
    }
}

/// Generate random jitter between 0 and `max` milliseconds inclusive.
fn random_jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % max.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
    }

    fn step(state: ConnectionState, event: Event) -> (ConnectionState, Vec<Action>) {
        state.on_event(event, &policy())
    }

    fn emitted(actions: &[Action]) -> Vec<ConnectionStatus> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::EmitStatus(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    // ===========================================
    // Initial Connect Tests
    // ===========================================

    #[test]
    fn starts_idle() {
        let state = ConnectionState::new();
        assert_eq!(state.status(), ConnectionStatus::Idle);
    }

    #[test]
    fn connect_request_transitions_to_connecting() {
        let (new_state, actions) = step(ConnectionState::Idle, Event::ConnectRequested);

        assert!(matches!(new_state, ConnectionState::Connecting));
        assert!(actions.iter().any(|a| matches!(a, Action::Connect)));
        assert_eq!(emitted(&actions), vec![ConnectionStatus::Connecting]);
    }

    #[test]
    fn connect_success_transitions_to_connected() {
        let (new_state, actions) = step(ConnectionState::Connecting, Event::ConnectSucceeded);

        assert!(new_state.is_connected());
        assert_eq!(emitted(&actions), vec![ConnectionStatus::Connected]);
    }

    #[test]
    fn connect_failure_is_failed_not_reconnecting() {
        let (new_state, actions) = step(
            ConnectionState::Connecting,
            Event::ConnectFailed {
                error: "refused".into(),
            },
        );

        assert_eq!(new_state.status(), ConnectionStatus::Failed);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
        assert!(actions.iter().any(|a| matches!(a, Action::CloseTransport)));
    }

    #[test]
    fn failed_accepts_new_connect() {
        let failed = ConnectionState::Failed {
            error: "refused".into(),
        };
        let (new_state, actions) = step(failed, Event::ConnectRequested);

        assert!(matches!(new_state, ConnectionState::Connecting));
        assert!(actions.iter().any(|a| matches!(a, Action::Connect)));
    }

    #[test]
    fn connect_is_idempotent_while_active() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Disconnected,
        ] {
            let (new_state, actions) = step(state.clone(), Event::ConnectRequested);
            assert_eq!(new_state, state);
            assert!(actions.is_empty());
        }
    }

    // ===========================================
    // Reconnect Tests
    // ===========================================

    #[test]
    fn transport_drop_triggers_reconnect() {
        let (new_state, actions) = step(
            ConnectionState::Connected,
            Event::TransportDropped {
                reason: "socket closed".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 0 });
        assert_eq!(emitted(&actions), vec![ConnectionStatus::Reconnecting]);
        assert!(actions.iter().any(
            |a| matches!(a, Action::StartReconnectTimer { delay } if *delay == Duration::ZERO)
        ));
    }

    #[test]
    fn reconnect_timer_issues_attempt_without_status_change() {
        let (new_state, actions) =
            step(ConnectionState::Reconnecting { attempt: 1 }, Event::ReconnectTimer);

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(actions, vec![Action::Connect]);
    }

    #[test]
    fn reconnect_failure_schedules_next_attempt() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 0 },
            Event::ConnectFailed {
                error: "timeout".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 1 });
        assert!(emitted(&actions).is_empty());
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::StartReconnectTimer { delay } if *delay == Duration::from_secs(2)
        )));
    }

    #[test]
    fn exhausted_retries_disconnect() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 3 },
            Event::ConnectFailed {
                error: "timeout".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert_eq!(emitted(&actions), vec![ConnectionStatus::Disconnected]);
    }

    #[test]
    fn disabled_policy_disconnects_on_drop() {
        let (new_state, _) = ConnectionState::Connected.on_event(
            Event::TransportDropped {
                reason: "gone".into(),
            },
            &ReconnectPolicy::disabled(),
        );
        assert_eq!(new_state, ConnectionState::Disconnected);
    }

    #[test]
    fn full_drop_and_recover_flow() {
        let mut statuses = Vec::new();
        let mut state = ConnectionState::Idle;

        for event in [
            Event::ConnectRequested,
            Event::ConnectSucceeded,
            Event::TransportDropped {
                reason: "blip".into(),
            },
            Event::ReconnectTimer,
            Event::ConnectSucceeded,
        ] {
            let (next, actions) = step(state, event);
            statuses.extend(emitted(&actions));
            state = next;
        }

        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    // ===========================================
    // Disconnect Tests
    // ===========================================

    #[test]
    fn disconnect_from_any_state() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed { error: "x".into() },
        ] {
            let (new_state, actions) = step(state, Event::DisconnectRequested);
            assert_eq!(new_state, ConnectionState::Disconnected);
            assert!(actions.iter().any(|a| matches!(a, Action::CloseTransport)));
        }
    }

    #[test]
    fn disconnect_from_reconnecting_cancels() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 2 },
            Event::DisconnectRequested,
        );

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(actions.iter().any(|a| matches!(a, Action::CancelReconnect)));
    }

    #[test]
    fn repeated_disconnect_emits_nothing() {
        let (new_state, actions) = step(ConnectionState::Disconnected, Event::DisconnectRequested);

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(emitted(&actions).is_empty());
    }

    #[test]
    fn disconnected_ignores_late_transport_events() {
        let (new_state, actions) = step(ConnectionState::Disconnected, Event::ConnectSucceeded);
        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Backoff Tests
    // ===========================================

    #[test]
    fn schedule_repeats_last_entry() {
        let policy = ReconnectPolicy::new(
            10,
            Backoff::Schedule {
                delays_ms: vec![0, 500],
            },
        );
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(7), Duration::from_millis(500));
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let policy = ReconnectPolicy::new(
            10,
            Backoff::Exponential {
                base_ms: 1_000,
                max_ms: 30_000,
                jitter_ms: 0,
            },
        );
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn exponential_jitter_stays_in_bounds() {
        let policy = ReconnectPolicy::new(
            5,
            Backoff::Exponential {
                base_ms: 2_000,
                max_ms: 30_000,
                jitter_ms: 5_000,
            },
        );
        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(7));
        }
    }

    #[test]
    fn exponential_saturates_at_extreme_bounds() {
        let policy = ReconnectPolicy::new(
            64,
            Backoff::Exponential {
                base_ms: u64::MAX,
                max_ms: u64::MAX,
                jitter_ms: u64::MAX,
            },
        );
        for attempt in [1, 40, 64] {
            assert_eq!(policy.delay_for(attempt), Duration::from_millis(u64::MAX));
        }
    }

    #[test]
    fn policy_deserializes_from_tagged_form() {
        let policy: ReconnectPolicy = serde_json::from_str(
            r#"{"max_attempts":3,"backoff":{"kind":"fixed","delay_ms":250}}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
    }
}
