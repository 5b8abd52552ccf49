//! Stream Connector State Machine
//!
//! Transport-agnostic lifecycle of the upstream user-data connection.
//!
//! ```text
//!  Idle ──start──► Connecting ──opened──► Open ──subscribe sent──► Subscribed
//!                   ▲     │                 │                         │
//!                   │  open failed     send failed             closed / send failed
//!                   │     ▼                 ▼                         ▼
//!                   └─delay elapsed── Reconnecting ◄────────────────────┘
//!
//!  any state ──stop──► Closing (terminal)
//! ```
//!
//! The async driver lives in `infrastructure::exchange::connector`; this
//! module only decides the next state.

use std::fmt;

/// Lifecycle state of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorState {
    /// Not started.
    #[default]
    Idle,
    /// Acquiring a session token and opening the transport.
    Connecting,
    /// Transport open, subscribe request not yet sent.
    Open,
    /// Subscribed and dispatching inbound events.
    Subscribed,
    /// Shutting down. Terminal.
    Closing,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

impl ConnectorState {
    /// State name for logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Subscribed => "subscribed",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether the connector is delivering upstream events.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Subscribed)
    }

    /// Whether the connector has stopped for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing)
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::Subscribed => 3,
            Self::Closing => 4,
            Self::Reconnecting => 5,
        }
    }

    /// Apply an input and return the next state.
    ///
    /// Inputs that have no meaning in the current state leave it unchanged.
    #[must_use]
    pub fn next(self, input: &ConnectorInput) -> Self {
        match (self, input) {
            (Self::Closing, _) => Self::Closing,
            (_, ConnectorInput::Stop) => Self::Closing,

            (Self::Idle, ConnectorInput::Start)
            | (Self::Reconnecting, ConnectorInput::ReconnectDelayElapsed) => Self::Connecting,

            (Self::Connecting, ConnectorInput::Transport(TransportEvent::Opened)) => Self::Open,
            (Self::Connecting, ConnectorInput::OpenFailed) => Self::Reconnecting,

            (Self::Open, ConnectorInput::SubscribeSent) => Self::Subscribed,

            (
                Self::Open | Self::Subscribed,
                ConnectorInput::Transport(TransportEvent::Closed(_) | TransportEvent::SendFailed(_)),
            ) => Self::Reconnecting,

            (state, _) => state,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events surfaced by an upstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Opened,
    /// Application data frame.
    MessageReceived(String),
    /// Connection closed or failed, with a reason.
    Closed(String),
    /// An outbound send failed, with a reason.
    SendFailed(String),
}

/// Inputs driving the connector state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorInput {
    /// Begin connecting.
    Start,
    /// Something happened on the transport.
    Transport(TransportEvent),
    /// Token acquisition or transport open failed.
    OpenFailed,
    /// Subscribe request written successfully.
    SubscribeSent,
    /// Reconnect delay has passed.
    ReconnectDelayElapsed,
    /// Shut down.
    Stop,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn closed() -> ConnectorInput {
        ConnectorInput::Transport(TransportEvent::Closed("eof".to_string()))
    }

    fn send_failed() -> ConnectorInput {
        ConnectorInput::Transport(TransportEvent::SendFailed("broken pipe".to_string()))
    }

    fn message() -> ConnectorInput {
        ConnectorInput::Transport(TransportEvent::MessageReceived("{}".to_string()))
    }

    #[test_case(ConnectorState::Idle, ConnectorInput::Start, ConnectorState::Connecting ; "start")]
    #[test_case(ConnectorState::Connecting, ConnectorInput::Transport(TransportEvent::Opened), ConnectorState::Open ; "opened")]
    #[test_case(ConnectorState::Connecting, ConnectorInput::OpenFailed, ConnectorState::Reconnecting ; "open failed")]
    #[test_case(ConnectorState::Open, ConnectorInput::SubscribeSent, ConnectorState::Subscribed ; "subscribed")]
    #[test_case(ConnectorState::Open, send_failed(), ConnectorState::Reconnecting ; "subscribe send failed")]
    #[test_case(ConnectorState::Subscribed, message(), ConnectorState::Subscribed ; "message keeps subscribed")]
    #[test_case(ConnectorState::Subscribed, closed(), ConnectorState::Reconnecting ; "closed while subscribed")]
    #[test_case(ConnectorState::Subscribed, send_failed(), ConnectorState::Reconnecting ; "send failed while subscribed")]
    #[test_case(ConnectorState::Reconnecting, ConnectorInput::ReconnectDelayElapsed, ConnectorState::Connecting ; "delay elapsed")]
    fn transition(from: ConnectorState, input: ConnectorInput, to: ConnectorState) {
        assert_eq!(from.next(&input), to);
    }

    #[test_case(ConnectorState::Idle ; "idle")]
    #[test_case(ConnectorState::Connecting ; "connecting")]
    #[test_case(ConnectorState::Open ; "open")]
    #[test_case(ConnectorState::Subscribed ; "subscribed")]
    #[test_case(ConnectorState::Reconnecting ; "reconnecting")]
    fn stop_always_closes(from: ConnectorState) {
        assert_eq!(from.next(&ConnectorInput::Stop), ConnectorState::Closing);
    }

    #[test]
    fn closing_is_terminal() {
        for input in [
            ConnectorInput::Start,
            ConnectorInput::ReconnectDelayElapsed,
            ConnectorInput::Transport(TransportEvent::Opened),
            closed(),
        ] {
            assert_eq!(ConnectorState::Closing.next(&input), ConnectorState::Closing);
        }
    }

    #[test]
    fn irrelevant_inputs_are_ignored() {
        assert_eq!(
            ConnectorState::Idle.next(&ConnectorInput::SubscribeSent),
            ConnectorState::Idle
        );
        assert_eq!(
            ConnectorState::Reconnecting.next(&closed()),
            ConnectorState::Reconnecting
        );
        assert_eq!(
            ConnectorState::Subscribed.next(&ConnectorInput::Start),
            ConnectorState::Subscribed
        );
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectorState::Subscribed.to_string(), "subscribed");
        assert!(ConnectorState::Subscribed.is_live());
        assert!(!ConnectorState::Open.is_live());
        assert!(ConnectorState::Closing.is_terminal());
    }
}
