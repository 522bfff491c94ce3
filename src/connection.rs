//! Connection lifecycle: handshakes, data-transfer loops, teardown.
//!
//! A [`Connection`] owns the complete state for one transfer session: the
//! transport, the Go-Back-N send window, the congestion controller, and the
//! receiver delivery state.  Obtain one via [`Connection::connect`] (sender,
//! active open) or [`Connection::accept`] (receiver, passive open); both
//! drive the three-way handshake with loss injection suspended.
//!
//! The data phase is a single-threaded cooperative loop per endpoint:
//! bounded-timeout receive, timer expiry, then new sends while the window
//! has room.  ACKs processed in one receive step are always reflected in
//! the next send decision.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;

use crate::congestion::{CcEvent, CongestionController};
use crate::delivery::{Accept, Delivery, ADVERTISED_WINDOW};
use crate::reliability::{AckEvent, SendWindow, TIMEOUT_INTERVAL};
use crate::segment::{flags, Segment, MAX_PAYLOAD};
use crate::state::ConnectionState;
use crate::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Receive poll quantum for the data-phase event loop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Attempts per handshake segment (SYN, SYN|ACK, FIN) before giving up.
const MAX_HANDSHAKE_RETRIES: u32 = 5;

/// Consecutive retransmission timeouts with no window advance before the
/// transfer is declared dead.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 10;

/// Receiver-side: silence from the sender this long ends the transfer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Fatal connection-level failures.
///
/// Transient faults (lost, corrupted, duplicate, or stale segments) never
/// surface here; they are absorbed by retransmission and the duplicate-ACK
/// policy.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The underlying socket failed; not a protocol condition.
    #[error("transport failure: {0}")]
    Transport(TransportError),
    /// A handshake exchange exhausted its retries.
    #[error("handshake failed after {MAX_HANDSHAKE_RETRIES} attempts")]
    HandshakeFailed,
    /// The peer stopped acknowledging; the Go-Back-N retransmit ceiling hit.
    #[error("transfer stalled: {timeouts} consecutive timeouts at seq {seq}")]
    RetransmitCeiling { timeouts: u32, seq: u32 },
    /// The peer sent RST.
    #[error("connection reset by peer")]
    Reset,
    /// No traffic from the peer within the idle window.
    #[error("peer idle for more than {}s", IDLE_TIMEOUT.as_secs())]
    IdleTimeout,
    /// The operation is not valid in the current FSM state.
    #[error("operation invalid in state {0}")]
    BadState(ConnectionState),
}

/// Summary of a completed outbound transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferStats {
    /// Application bytes acknowledged end to end.
    pub bytes: usize,
    /// Data segments the file was chunked into.
    pub segments: u32,
    /// Go-Back-N timeout events over the whole transfer.
    pub retransmit_timeouts: u32,
    /// Fast retransmissions triggered by triple duplicate ACKs.
    pub fast_retransmits: u32,
    /// Wall-clock time from first segment to last ACK.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One endpoint of a reliable transfer session.
#[derive(Debug)]
pub struct Connection {
    /// Current FSM state.
    pub state: ConnectionState,
    /// Go-Back-N send window (sender side of the session).
    pub window: SendWindow,
    /// AIMD congestion controller driving the effective window.
    pub congestion: CongestionController,
    /// In-order delivery state (receiver side of the session).
    pub delivery: Delivery,
    transport: Transport,
    peer: SocketAddr,
    /// Our own sequence number for control segments (1 after the handshake).
    local_seq: u32,
    /// Peer-advertised receive window from the handshake.
    peer_window: u16,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Three-way open
    // -----------------------------------------------------------------------

    /// Active open (sender side).
    ///
    /// Sends SYN(seq=0) with loss injection suspended, waits for SYN|ACK,
    /// completes with ACK(seq=1, ack=1).  The SYN is retransmitted on each
    /// timeout up to [`MAX_HANDSHAKE_RETRIES`] times.  `initial_window`
    /// seeds the congestion controller's cwnd.
    pub async fn connect(
        mut transport: Transport,
        peer: SocketAddr,
        initial_window: f64,
    ) -> Result<Self, ConnError> {
        transport.set_handshake_mode(true);
        let syn = Segment::control(flags::SYN, 0, 0, ADVERTISED_WINDOW);

        let mut peer_window = ADVERTISED_WINDOW;
        let mut attempt = 0;
        loop {
            if attempt >= MAX_HANDSHAKE_RETRIES {
                return Err(ConnError::HandshakeFailed);
            }
            transport
                .send_to(&syn, peer)
                .await
                .map_err(ConnError::Transport)?;
            log::debug!("[conn] → SYN (attempt {})", attempt + 1);

            match timeout(TIMEOUT_INTERVAL, transport.recv_from()).await {
                Ok(Ok((seg, addr)))
                    if addr == peer && seg.is_syn() && seg.is_ack() && seg.ack_num == 1 =>
                {
                    peer_window = seg.window;
                    break;
                }
                Ok(Ok(_)) => attempt += 1,
                Ok(Err(e)) if e.is_decode() => attempt += 1,
                Ok(Err(e)) => return Err(ConnError::Transport(e)),
                Err(_elapsed) => attempt += 1,
            }
        }

        let ack = Segment::control(flags::ACK, 1, 1, ADVERTISED_WINDOW);
        transport
            .send_to(&ack, peer)
            .await
            .map_err(ConnError::Transport)?;
        transport.set_handshake_mode(false);
        log::info!("[conn] established with {peer}");

        Ok(Self {
            state: ConnectionState::Established,
            window: SendWindow::new(1),
            congestion: CongestionController::with_initial_window(initial_window),
            delivery: Delivery::new(1),
            transport,
            peer,
            local_seq: 1,
            peer_window,
        })
    }

    /// Passive open (receiver side).
    ///
    /// Blocks until a SYN arrives, answers SYN|ACK(seq=0, ack=1), and waits
    /// for the completing ACK.  A data segment arriving instead of the ACK
    /// is treated as an implicit completion (the sender only sends data once
    /// established); the segment itself is dropped and recovered by normal
    /// retransmission.
    pub async fn accept(mut transport: Transport) -> Result<Self, ConnError> {
        transport.set_handshake_mode(true);

        let (peer, syn) = loop {
            match transport.recv_from().await {
                Ok((seg, addr)) if seg.is_syn() && !seg.is_ack() => break (addr, seg),
                Ok(_) => continue,
                Err(e) if e.is_decode() => continue,
                Err(e) => return Err(ConnError::Transport(e)),
            }
        };
        log::debug!("[conn] ← SYN from {peer}");
        let peer_window = syn.window;

        let syn_ack = Segment::control(flags::SYN | flags::ACK, 0, 1, ADVERTISED_WINDOW);
        let mut attempt = 0;
        'retry: loop {
            if attempt >= MAX_HANDSHAKE_RETRIES {
                return Err(ConnError::HandshakeFailed);
            }
            transport
                .send_to(&syn_ack, peer)
                .await
                .map_err(ConnError::Transport)?;
            log::debug!("[conn] → SYN+ACK (attempt {})", attempt + 1);

            let deadline = Instant::now() + TIMEOUT_INTERVAL;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    attempt += 1;
                    continue 'retry;
                }
                match timeout(remaining, transport.recv_from()).await {
                    Ok(Ok((seg, addr))) if addr == peer => {
                        if seg.is_syn() && !seg.is_ack() {
                            // Our SYN|ACK was lost or corrupted; resend it.
                            attempt += 1;
                            continue 'retry;
                        }
                        // Data or FIN instead of the ACK also means the
                        // sender is established; the segment is dropped here
                        // and recovered by its retransmission.
                        if (seg.is_ack() && seg.ack_num == 1) || seg.has_payload() || seg.is_fin()
                        {
                            break 'retry;
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_decode() => {}
                    Ok(Err(e)) => return Err(ConnError::Transport(e)),
                    Err(_elapsed) => {
                        attempt += 1;
                        continue 'retry;
                    }
                }
            }
        }

        transport.set_handshake_mode(false);
        log::info!("[conn] established with {peer}");

        Ok(Self {
            state: ConnectionState::Established,
            window: SendWindow::new(1),
            congestion: CongestionController::new(),
            delivery: Delivery::new(1),
            transport,
            peer,
            local_seq: 1,
            peer_window,
        })
    }

    // -----------------------------------------------------------------------
    // Data phase — sender
    // -----------------------------------------------------------------------

    /// Transfer `data` to the peer, blocking until every segment has been
    /// acknowledged.
    ///
    /// Chunks the input into segments of at most [`MAX_PAYLOAD`] bytes and
    /// pipelines them under the effective window (min of cwnd and the
    /// peer-advertised window).  Loss is recovered by Go-Back-N timeout
    /// retransmission and by fast retransmit on triple duplicate ACKs.
    pub async fn send_file(&mut self, data: &[u8]) -> Result<TransferStats, ConnError> {
        if self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }

        let start = Instant::now();
        let total = data.len();
        let mut offset = 0usize;
        let mut consecutive_timeouts = 0u32;
        let mut retransmit_timeouts = 0u32;
        let mut fast_retransmits = 0u32;
        let mut last_progress = 0usize;

        while offset < total || self.window.has_unacked() {
            // Bounded poll; ACKs processed here are reflected in this
            // iteration's send decisions below.
            if let Some(seg) = self.recv_segment(POLL_INTERVAL).await? {
                if seg.is_rst() {
                    self.state = ConnectionState::Closed;
                    return Err(ConnError::Reset);
                }
                // A retransmitted SYN|ACK (our handshake ACK was lost) is
                // ignored; the data in flight completes the open implicitly.
                if seg.is_ack() && !seg.is_syn() {
                    self.peer_window = seg.window;
                    match self.window.on_ack(seg.ack_num, Instant::now()) {
                        AckEvent::Advanced { newly_acked } => {
                            consecutive_timeouts = 0;
                            for _ in 0..newly_acked {
                                self.congestion.on_event(CcEvent::NewAck);
                            }
                            log::debug!(
                                "[conn] ← ACK {} (+{newly_acked}) cwnd={:.1} {}",
                                seg.ack_num,
                                self.congestion.cwnd(),
                                self.congestion.state()
                            );
                        }
                        AckEvent::TripleDup => {
                            if let Some(oldest) = self.window.oldest_unacked().cloned() {
                                log::debug!("[conn] fast retransmit seq={}", oldest.seq_num);
                                self.transport
                                    .send_to(&oldest, self.peer)
                                    .await
                                    .map_err(ConnError::Transport)?;
                                self.window.refresh_timer(oldest.seq_num, Instant::now());
                                self.congestion.on_event(CcEvent::TripleDup);
                                fast_retransmits += 1;
                            }
                        }
                        AckEvent::DupInRecovery => {
                            self.congestion.on_event(CcEvent::DupInRecovery);
                        }
                        AckEvent::Duplicate { .. } | AckEvent::Stale => {}
                    }
                }
            }

            // Expire timers; a timeout retransmits the whole window.
            if let Some(batch) = self.window.check_timeout(Instant::now()) {
                consecutive_timeouts += 1;
                retransmit_timeouts += 1;
                if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    return Err(ConnError::RetransmitCeiling {
                        timeouts: consecutive_timeouts,
                        seq: self.window.send_base(),
                    });
                }
                log::debug!(
                    "[conn] timeout — retransmitting {} segment(s) from seq {}",
                    batch.len(),
                    self.window.send_base()
                );
                for seg in &batch {
                    self.transport
                        .send_to(seg, self.peer)
                        .await
                        .map_err(ConnError::Transport)?;
                }
                self.congestion.on_event(CcEvent::Timeout);
            }

            // Fill the window with new segments.
            let effective = self.congestion.effective_window(self.peer_window);
            while offset < total && self.window.can_send(effective) {
                let end = (offset + MAX_PAYLOAD).min(total);
                let seg = self.window.next_segment(
                    self.delivery.ack_number(),
                    ADVERTISED_WINDOW,
                    data[offset..end].to_vec(),
                );
                log::debug!(
                    "[conn] → DATA seq={} len={} in_flight={}",
                    seg.seq_num,
                    end - offset,
                    self.window.in_flight() + 1
                );
                self.transport
                    .send_to(&seg, self.peer)
                    .await
                    .map_err(ConnError::Transport)?;
                self.window.record_sent(seg, Instant::now());
                offset = end;
            }

            if total > 0 {
                let progress = offset * 100 / total;
                if progress >= last_progress + 10 {
                    log::info!(
                        "[conn] progress {progress}% ({offset}/{total} bytes) send_base={} next_seq={} cwnd={:.1}",
                        self.window.send_base(),
                        self.window.next_seq_num(),
                        self.congestion.cwnd()
                    );
                    last_progress = progress;
                }
            }
        }

        Ok(TransferStats {
            bytes: total,
            segments: self.window.next_seq_num() - 1,
            retransmit_timeouts,
            fast_retransmits,
            duration: start.elapsed(),
        })
    }

    /// Graceful close after all data has been acknowledged (four-way, with
    /// loss injection suspended).
    ///
    /// Sends FIN, waits for the peer's ACK and FIN (possibly folded into
    /// one FIN|ACK), and answers the final ACK.  If the exchange's retries
    /// are exhausted the connection is force-closed with a warning rather
    /// than wedging the process.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        if matches!(self.state, ConnectionState::Done | ConnectionState::Closed) {
            return Ok(());
        }
        self.transport.set_handshake_mode(true);

        let fin = Segment::control(
            flags::FIN,
            self.window.next_seq_num(),
            self.delivery.ack_number(),
            ADVERTISED_WINDOW,
        );
        self.state = ConnectionState::FinSent;

        let mut attempt = 0;
        'retry: while attempt < MAX_HANDSHAKE_RETRIES {
            self.transport
                .send_to(&fin, self.peer)
                .await
                .map_err(ConnError::Transport)?;
            log::debug!("[conn] → FIN seq={} (attempt {})", fin.seq_num, attempt + 1);

            let deadline = Instant::now() + TIMEOUT_INTERVAL;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    attempt += 1;
                    continue 'retry;
                }
                match self.recv_segment(remaining).await? {
                    Some(seg) if seg.is_fin() => {
                        let final_ack = Segment::control(
                            flags::ACK,
                            fin.seq_num + 1,
                            seg.seq_num + 1,
                            ADVERTISED_WINDOW,
                        );
                        self.transport
                            .send_to(&final_ack, self.peer)
                            .await
                            .map_err(ConnError::Transport)?;
                        self.state = ConnectionState::Done;
                        log::debug!("[conn] ← FIN; → final ACK — closed");
                        return Ok(());
                    }
                    Some(seg) if seg.is_ack() && seg.ack_num == fin.seq_num + 1 => {
                        log::debug!("[conn] ← ACK of FIN; awaiting peer FIN");
                    }
                    Some(_) | None => {}
                }
            }
        }

        log::warn!("[conn] close handshake incomplete; force-closing");
        self.state = ConnectionState::Done;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data phase — receiver
    // -----------------------------------------------------------------------

    /// Receive the peer's transfer until its FIN, returning the delivered
    /// bytes.
    ///
    /// Every integrity-valid data segment is answered with a cumulative ACK
    /// for the next expected seq — for duplicates and gaps that ACK is the
    /// duplicate the sender's fast-retransmit logic counts.  Corrupted
    /// datagrams produce no response at all.
    pub async fn receive_file(&mut self) -> Result<Vec<u8>, ConnError> {
        if self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }
        let mut last_heard = Instant::now();

        loop {
            let Some(seg) = self.recv_segment(POLL_INTERVAL).await? else {
                if last_heard.elapsed() >= IDLE_TIMEOUT {
                    return Err(ConnError::IdleTimeout);
                }
                continue;
            };
            last_heard = Instant::now();

            if seg.is_rst() {
                self.state = ConnectionState::Closed;
                return Err(ConnError::Reset);
            }

            if seg.is_fin() {
                self.finish_close(seg.seq_num).await?;
                return Ok(self.delivery.take_bytes());
            }

            if seg.has_payload() {
                let accepted = self.delivery.on_segment(seg.seq_num, &seg.payload);
                let ack = Segment::control(
                    flags::ACK,
                    self.local_seq,
                    self.delivery.ack_number(),
                    ADVERTISED_WINDOW,
                );
                self.transport
                    .send_to(&ack, self.peer)
                    .await
                    .map_err(ConnError::Transport)?;
                match accepted {
                    Accept::InOrder => log::debug!(
                        "[conn] ← DATA seq={} len={}; → ACK {}",
                        seg.seq_num,
                        seg.payload.len(),
                        self.delivery.ack_number()
                    ),
                    Accept::Duplicate | Accept::Gap => log::debug!(
                        "[conn] ← DATA seq={} out of order; → dup ACK {}",
                        seg.seq_num,
                        self.delivery.ack_number()
                    ),
                }
            }
            // Pure ACKs carry nothing for the receiving side.
        }
    }

    /// Receiver half of the four-way close: ACK the peer's FIN, send our
    /// own, and wait (bounded) for the final ACK.
    async fn finish_close(&mut self, peer_fin_seq: u32) -> Result<(), ConnError> {
        self.transport.set_handshake_mode(true);

        let ack = Segment::control(
            flags::ACK,
            self.local_seq,
            peer_fin_seq + 1,
            ADVERTISED_WINDOW,
        );
        self.transport
            .send_to(&ack, self.peer)
            .await
            .map_err(ConnError::Transport)?;
        self.state = ConnectionState::CloseWait;
        log::debug!("[conn] ← FIN seq={peer_fin_seq}; → ACK");

        let fin = Segment::control(
            flags::FIN | flags::ACK,
            self.local_seq,
            peer_fin_seq + 1,
            ADVERTISED_WINDOW,
        );
        self.state = ConnectionState::LastAck;

        for attempt in 0..MAX_HANDSHAKE_RETRIES {
            self.transport
                .send_to(&fin, self.peer)
                .await
                .map_err(ConnError::Transport)?;
            log::debug!("[conn] → FIN seq={} (attempt {})", fin.seq_num, attempt + 1);

            match self.recv_segment(TIMEOUT_INTERVAL).await? {
                Some(seg) if seg.is_ack() && !seg.is_fin() && seg.ack_num == self.local_seq + 1 => {
                    self.state = ConnectionState::Done;
                    log::debug!("[conn] ← final ACK — closed");
                    return Ok(());
                }
                // The peer retransmitted its FIN: our ACK+FIN was lost, and
                // the loop resends it.
                Some(_) | None => {}
            }
        }

        log::warn!("[conn] final ACK never arrived; force-closing");
        self.state = ConnectionState::Done;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Receive one segment from the peer within `wait`.
    ///
    /// Returns `Ok(None)` on poll expiry, on datagrams from other addresses,
    /// and on undecodable datagrams (the silent-drop path for corruption).
    /// Only socket-level failures surface as errors.
    async fn recv_segment(&mut self, wait: Duration) -> Result<Option<Segment>, ConnError> {
        match timeout(wait, self.transport.recv_from()).await {
            Ok(Ok((seg, addr))) if addr == self.peer => Ok(Some(seg)),
            Ok(Ok((_, addr))) => {
                log::trace!("[conn] ignoring datagram from {addr}");
                Ok(None)
            }
            Ok(Err(e)) if e.is_decode() => {
                log::trace!("[conn] dropping undecodable datagram: {e}");
                Ok(None)
            }
            Ok(Err(e)) => Err(ConnError::Transport(e)),
            Err(_elapsed) => Ok(None),
        }
    }
}
