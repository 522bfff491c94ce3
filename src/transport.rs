//! Async UDP transport with impairment injection.
//!
//! [`Transport`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`Segment`] instead of raw bytes and, on the send path, applies a
//! configurable fault model:
//!
//! | Fault       | Description                                        |
//! |-------------|----------------------------------------------------|
//! | Packet loss | Drop a datagram with probability `loss_rate`.      |
//! | Corruption  | Flip one random bit with `corruption_rate`.        |
//! | Delay       | Sleep a uniform duration in `[min_delay, max_delay]`. |
//!
//! The connection layer switches [`Transport::set_handshake_mode`] on before
//! SYN/FIN exchanges; while it is on, no loss is injected (corruption and
//! delay may still apply), so control segments are expected to reach the
//! peer in one transmission.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::segment::{Segment, SegmentError};

/// Largest datagram we will read (header + payload fits well within this).
const MAX_DATAGRAM: usize = 2048;

/// Impairment parameters, normally populated from CLI flags.
///
/// All rates are probabilities in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct ImpairmentConfig {
    /// Probability that an outgoing datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that one bit of an outgoing datagram is flipped.
    pub corruption_rate: f64,
    /// Lower bound of the per-datagram send delay.
    pub min_delay: Duration,
    /// Upper bound of the per-datagram send delay.
    pub max_delay: Duration,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        // No faults by default — the transport is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corruption_rate: 0.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Errors that can arise from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid segment.
    ///
    /// Callers treat this as a silent drop: the sender's retransmission
    /// timer recovers the segment.
    #[error("segment decode error: {0}")]
    Segment(#[from] SegmentError),
}

impl TransportError {
    /// `true` when the error is a per-datagram decode failure rather than a
    /// socket-level fault.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Segment(_))
    }
}

/// An async, segment-oriented UDP socket with fault injection.
#[derive(Debug)]
pub struct Transport {
    /// Address this socket is bound to (resolved after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    config: ImpairmentConfig,
    rng: SmallRng,
    handshake_mode: bool,
}

impl Transport {
    /// Bind a new transport to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(
        local_addr: SocketAddr,
        config: ImpairmentConfig,
    ) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            config,
            rng: SmallRng::from_entropy(),
            handshake_mode: false,
        })
    }

    /// Bind with a fixed RNG seed so injected faults are reproducible.
    pub async fn bind_seeded(
        local_addr: SocketAddr,
        config: ImpairmentConfig,
        seed: u64,
    ) -> Result<Self, TransportError> {
        let mut transport = Self::bind(local_addr, config).await?;
        transport.rng = SmallRng::seed_from_u64(seed);
        Ok(transport)
    }

    /// Suspend (`true`) or resume (`false`) loss injection.
    ///
    /// The connection layer holds this on for the SYN and FIN exchanges.
    pub fn set_handshake_mode(&mut self, on: bool) {
        self.handshake_mode = on;
    }

    /// Encode `segment` and send it as a single datagram to `dest`,
    /// subject to the impairment model.
    ///
    /// A datagram dropped by loss injection still returns `Ok(())` — from
    /// the protocol's point of view it was sent and lost in the network.
    pub async fn send_to(
        &mut self,
        segment: &Segment,
        dest: SocketAddr,
    ) -> Result<(), TransportError> {
        let mut bytes = segment.encode();

        if !self.handshake_mode
            && self.config.loss_rate > 0.0
            && self.rng.gen_bool(self.config.loss_rate)
        {
            log::trace!("[net] dropped seq={} len={}", segment.seq_num, bytes.len());
            return Ok(());
        }

        if self.config.corruption_rate > 0.0 && self.rng.gen_bool(self.config.corruption_rate) {
            let byte = self.rng.gen_range(0..bytes.len());
            let bit = self.rng.gen_range(0..8u8);
            bytes[byte] ^= 1 << bit;
            log::trace!("[net] corrupted seq={} byte={byte} bit={bit}", segment.seq_num);
        }

        if self.config.max_delay > Duration::ZERO {
            let delay = self
                .rng
                .gen_range(self.config.min_delay.as_secs_f64()..=self.config.max_delay.as_secs_f64());
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// Returns `(segment, sender_address)`.  Datagrams that fail to decode
    /// are returned as `Err` — the caller decides whether to ignore them.
    pub async fn recv_from(&mut self) -> Result<(Segment, SocketAddr), TransportError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let segment = Segment::decode(&buf[..n])?;
        Ok((segment, addr))
    }
}
