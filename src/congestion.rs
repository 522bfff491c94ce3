//! Reno-style AIMD congestion controller.
//!
//! The controller consumes loss and acknowledgement signals from the
//! reliability layer as [`CcEvent`]s and evolves the congestion window:
//!
//! | Event         | SLOW_START            | CONGESTION_AVOIDANCE  | FAST_RECOVERY       |
//! |---------------|-----------------------|-----------------------|---------------------|
//! | new-ack       | cwnd += 1; → CA at ssthresh | cwnd += 1/cwnd  | cwnd := ssthresh; → CA |
//! | triple-dup    | halve ssthresh; cwnd := ssthresh + 3; → FR    | (same) | ignored   |
//! | dup-in-recovery | —                   | —                     | cwnd += 1           |
//! | timeout       | halve ssthresh; cwnd := 1; → SS (all states)  |        |           |
//!
//! The `max(ssthresh, 2)` floor keeps a single loss from collapsing the
//! window to nothing; the reset to 1 on timeout treats timer expiry as a
//! sign of sustained congestion rather than an isolated drop.

/// Initial congestion window, in segments.
pub const INITIAL_CWND: f64 = 1.0;

/// Initial slow-start threshold, in segments.
pub const INITIAL_SSTHRESH: f64 = 64.0;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl std::fmt::Display for CcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Signals fed in by the reliability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcEvent {
    /// A cumulative ACK covered one more segment (emitted once per newly
    /// acknowledged segment).
    NewAck,
    /// Third duplicate ACK; a fast retransmit was performed.
    TripleDup,
    /// Duplicate ACK past the threshold while recovery is underway.
    DupInRecovery,
    /// Retransmission timer expired (one event per Go-Back-N batch).
    Timeout,
}

/// AIMD congestion state for one connection.
#[derive(Debug)]
pub struct CongestionController {
    cwnd: f64,
    ssthresh: f64,
    state: CcState,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    pub fn new() -> Self {
        Self::with_initial_window(INITIAL_CWND)
    }

    /// Start with a non-default initial window (the sender's `--window`).
    pub fn with_initial_window(cwnd: f64) -> Self {
        Self {
            cwnd: cwnd.max(1.0),
            ssthresh: INITIAL_SSTHRESH,
            state: CcState::SlowStart,
        }
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn state(&self) -> CcState {
        self.state
    }

    /// In-flight cap handed to the reliability layer: `floor(cwnd)` capped
    /// by the peer-advertised window, never below 1.
    pub fn effective_window(&self, advertised: u16) -> u32 {
        (self.cwnd.floor() as u32).min(advertised as u32).max(1)
    }

    /// Apply one event to the window state.
    pub fn on_event(&mut self, event: CcEvent) {
        match event {
            CcEvent::NewAck => match self.state {
                CcState::SlowStart => {
                    self.cwnd += 1.0;
                    if self.cwnd >= self.ssthresh {
                        self.state = CcState::CongestionAvoidance;
                    }
                }
                CcState::CongestionAvoidance => {
                    self.cwnd += 1.0 / self.cwnd;
                }
                CcState::FastRecovery => {
                    self.cwnd = self.ssthresh;
                    self.state = CcState::CongestionAvoidance;
                }
            },
            CcEvent::TripleDup => {
                if self.state != CcState::FastRecovery {
                    self.ssthresh = (self.cwnd / 2.0).max(2.0);
                    self.cwnd = self.ssthresh + 3.0;
                    self.state = CcState::FastRecovery;
                }
            }
            CcEvent::DupInRecovery => {
                if self.state == CcState::FastRecovery {
                    self.cwnd += 1.0;
                }
            }
            CcEvent::Timeout => {
                self.ssthresh = (self.cwnd / 2.0).max(2.0);
                self.cwnd = 1.0;
                self.state = CcState::SlowStart;
            }
        }
    }
}
