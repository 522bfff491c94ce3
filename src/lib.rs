//! `prtp` — a TCP-like reliable file-transfer protocol over UDP.
//!
//! # Architecture
//!
//! ```text
//!  file bytes                                   output file
//!      │                                             ▲
//!      ▼                                             │
//!  ┌──────────────────────────────┐   ┌──────────────┴───────────────┐
//!  │     Connection (sender)      │   │     Connection (receiver)    │
//!  │  ├── SendWindow   (GBN)      │   │  ├── Delivery (in-order)     │
//!  │  └── CongestionController    │   │  └── cumulative ACKs         │
//!  └────┬─────────────────────────┘   └──────────────┬───────────────┘
//!       │ segments                         ACKs      │
//!       ▼                                            ▼
//!  ┌───────────┐     lossy / corrupting     ┌───────────┐
//!  │ Transport │ ─────────────────────────▶ │ Transport │
//!  └───────────┘      UDP datagrams         └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]     — wire format (serialise / deserialise / integrity tag)
//! - [`transport`]   — async UDP socket with impairment injection
//! - [`reliability`] — Go-Back-N send window, timers, duplicate-ACK counting
//! - [`congestion`]  — Reno AIMD congestion controller
//! - [`delivery`]    — receiver-side in-order delivery state
//! - [`state`]       — connection finite-state-machine types
//! - [`connection`]  — handshakes, data transfer loops, teardown

pub mod congestion;
pub mod connection;
pub mod delivery;
pub mod reliability;
pub mod segment;
pub mod state;
pub mod transport;

pub use congestion::{CcEvent, CcState, CongestionController};
pub use connection::{ConnError, Connection, TransferStats};
pub use delivery::Delivery;
pub use reliability::{AckEvent, SendWindow};
pub use segment::{Segment, SegmentError};
pub use state::ConnectionState;
pub use transport::{ImpairmentConfig, Transport, TransportError};
