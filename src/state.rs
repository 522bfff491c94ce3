//! Connection finite-state-machine types.
//!
//! States for both endpoints of a transfer, following the TCP diagram
//! (RFC 793 §3.2) trimmed to what this protocol's open and close exchanges
//! actually visit.  Transitions live in [`crate::connection`].

/// All possible states of the connection FSM.
///
/// ```text
///  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED ──FIN sent──▶ FIN_SENT
///     │                                            │                       │
///     └──SYN rcvd──▶ SYN_RCVD ──ACK──▶ ESTABLISHED │            ACK+FIN    │
///                                                  ▼                       ▼
///                                  FIN rcvd ▶ CLOSE_WAIT ─FIN─▶ LAST_ACK ▶ DONE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received; SYN-ACK sent; waiting for ACK.
    SynRcvd,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for the peer's ACK and FIN.
    FinSent,
    /// Peer's FIN received and acknowledged; local FIN pending.
    CloseWait,
    /// Local FIN sent from CloseWait; waiting for the final ACK.
    LastAck,
    /// Teardown complete.
    Done,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
