//! The per-channel reconnect state machine.
//!
//! `Idle -> Connecting -> Connected`, `Connected -> LostConnection` on a transport error,
//! `LostConnection -> Reconnecting(n) -> {Connected, ConnectionFailed}`. Built on the
//! `ConnectionState` enum style from the reference reconnect-loop pattern, with these exact
//! state names and bounded/infinite/disabled attempt semantics.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    LostConnection,
    Reconnecting,
    ConnectionFailed,
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        matches!(self, ChannelState::Connected)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, ChannelState::ConnectionFailed)
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelState::Idle => "Idle",
            ChannelState::Connecting => "Connecting",
            ChannelState::Connected => "Connected",
            ChannelState::LostConnection => "LostConnection",
            ChannelState::Reconnecting => "Reconnecting",
            ChannelState::ConnectionFailed => "ConnectionFailed",
        }
    }
}

/// What a failed connection attempt should do next, decided purely from the attempt count and
/// the configured `max_reconnect_attempts` sentinel (see `config::RECONNECT_INFINITE`/
/// `RECONNECT_DISABLED`). `HostSession::run_reconnect_episode` asks this after every failed
/// attempt rather than inlining the sentinel comparisons itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    Retry,
    GiveUpDisabled,
    GiveUpExhausted,
}

/// `max_attempts` follows `config::RECONNECT_DISABLED` (0, never retry) and
/// `config::RECONNECT_INFINITE` (negative, retry forever) sentinels; any positive value bounds
/// the attempt count.
pub fn decide_reconnect_step(attempt: u32, max_attempts: i32) -> ReconnectStep {
    if max_attempts == crate::config::RECONNECT_DISABLED {
        return ReconnectStep::GiveUpDisabled;
    }
    let bounded = max_attempts > 0;
    if bounded && attempt >= max_attempts as u32 {
        return ReconnectStep::GiveUpExhausted;
    }
    ReconnectStep::Retry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_is_only_true_for_connected_state() {
        assert!(ChannelState::Connected.is_connected());
        assert!(!ChannelState::Reconnecting.is_connected());
        assert!(!ChannelState::LostConnection.is_connected());
    }

    #[test]
    fn terminal_failure_only_for_connection_failed() {
        assert!(ChannelState::ConnectionFailed.is_terminal_failure());
        assert!(!ChannelState::Reconnecting.is_terminal_failure());
    }

    #[test]
    fn disabled_sentinel_gives_up_immediately() {
        assert_eq!(decide_reconnect_step(1, crate::config::RECONNECT_DISABLED), ReconnectStep::GiveUpDisabled);
    }

    #[test]
    fn infinite_sentinel_always_retries() {
        for attempt in [1, 2, 100, 10_000] {
            assert_eq!(decide_reconnect_step(attempt, crate::config::RECONNECT_INFINITE), ReconnectStep::Retry);
        }
    }

    #[test]
    fn bounded_retries_until_attempt_reaches_max_then_gives_up() {
        let max = 3;
        assert_eq!(decide_reconnect_step(1, max), ReconnectStep::Retry);
        assert_eq!(decide_reconnect_step(2, max), ReconnectStep::Retry);
        assert_eq!(decide_reconnect_step(3, max), ReconnectStep::GiveUpExhausted);
        assert_eq!(decide_reconnect_step(4, max), ReconnectStep::GiveUpExhausted);
    }
}
