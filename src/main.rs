//! Entry point for `prtp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing) and file I/O.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use prtp::transport::{ImpairmentConfig, Transport};
use prtp::Connection;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

/// Impairment parameters shared by both roles.
#[derive(Args)]
struct Impairments {
    /// Packet loss rate (0.0-1.0).
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,
    /// Packet corruption rate (0.0-1.0).
    #[arg(long, default_value_t = 0.0)]
    corruption_rate: f64,
    /// Minimum per-datagram delay in seconds.
    #[arg(long, default_value_t = 0.0)]
    min_delay: f64,
    /// Maximum per-datagram delay in seconds.
    #[arg(long, default_value_t = 0.0)]
    max_delay: f64,
}

impl From<Impairments> for ImpairmentConfig {
    fn from(args: Impairments) -> Self {
        Self {
            loss_rate: args.loss_rate,
            corruption_rate: args.corruption_rate,
            min_delay: Duration::from_secs_f64(args.min_delay),
            max_delay: Duration::from_secs_f64(args.max_delay),
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// Local IP address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        local_ip: String,
        /// Local port to bind (0 = OS-assigned).
        #[arg(long, default_value_t = 0)]
        local_port: u16,
        /// Remote IP address.
        #[arg(long)]
        remote_ip: String,
        /// Remote port.
        #[arg(long)]
        remote_port: u16,
        /// File to send.
        #[arg(long)]
        file: PathBuf,
        /// Initial congestion window, in segments.
        #[arg(long, default_value_t = 1.0)]
        window: f64,
        #[command(flatten)]
        impairments: Impairments,
    },
    /// Receive a file from a sender.
    Receive {
        /// Local IP address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        local_ip: String,
        /// Local port to bind.
        #[arg(long)]
        local_port: u16,
        /// Output file path.
        #[arg(long)]
        output: PathBuf,
        #[command(flatten)]
        impairments: Impairments,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Send {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
            file,
            window,
            impairments,
        } => {
            let local: SocketAddr = format!("{local_ip}:{local_port}")
                .parse()
                .context("invalid local address")?;
            let remote: SocketAddr = format!("{remote_ip}:{remote_port}")
                .parse()
                .context("invalid remote address")?;

            let data = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            log::info!(
                "sending {} ({} bytes) to {remote}",
                file.display(),
                data.len()
            );

            let transport = Transport::bind(local, impairments.into())
                .await
                .context("binding local socket")?;
            let mut conn = Connection::connect(transport, remote, window)
                .await
                .context("connection open failed")?;

            let stats = conn
                .send_file(&data)
                .await
                .context("file transfer failed")?;
            conn.close().await.context("connection close failed")?;

            let secs = stats.duration.as_secs_f64();
            log::info!(
                "transfer complete: {} bytes in {} segments, {:.2}s ({:.2} KB/s), {} timeouts, {} fast retransmits",
                stats.bytes,
                stats.segments,
                secs,
                stats.bytes as f64 / secs.max(1e-9) / 1024.0,
                stats.retransmit_timeouts,
                stats.fast_retransmits
            );
        }
        Mode::Receive {
            local_ip,
            local_port,
            output,
            impairments,
        } => {
            let local: SocketAddr = format!("{local_ip}:{local_port}")
                .parse()
                .context("invalid local address")?;

            let transport = Transport::bind(local, impairments.into())
                .await
                .context("binding local socket")?;
            log::info!("listening on {}", transport.local_addr);

            let mut conn = Connection::accept(transport)
                .await
                .context("connection accept failed")?;
            let data = conn.receive_file().await.context("receive failed")?;

            std::fs::write(&output, &data)
                .with_context(|| format!("writing {}", output.display()))?;
            log::info!("received {} bytes into {}", data.len(), output.display());
        }
    }

    Ok(())
}
