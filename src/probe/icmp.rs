//! ICMP reachability prober
//!
//! Unprivileged ICMP echo via surge-ping. One prober is shared across every
//! ping batch in flight; a semaphore bounds the number of outstanding echo
//! exchanges so a large cycle cannot exhaust sockets.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::probe::ProbeError;

/// Result of one ping exchange against a host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingOutcome {
    /// Echo requests sent
    pub sent: u32,
    /// Echo replies received
    pub received: u32,
    /// Packet loss percentage
    pub loss_pct: f64,
    /// Fastest round-trip, milliseconds
    pub min_rtt_ms: Option<f64>,
    /// Mean round-trip, milliseconds
    pub avg_rtt_ms: Option<f64>,
    /// Slowest round-trip, milliseconds
    pub max_rtt_ms: Option<f64>,
    /// At least one reply arrived
    pub is_alive: bool,
}

impl PingOutcome {
    /// An outcome representing a host that never answered
    #[must_use]
    pub fn unreachable(sent: u32) -> Self {
        Self {
            sent,
            received: 0,
            loss_pct: 100.0,
            min_rtt_ms: None,
            avg_rtt_ms: None,
            max_rtt_ms: None,
            is_alive: false,
        }
    }

    /// Builds an outcome from collected round-trip times
    #[must_use]
    pub fn from_rtts(sent: u32, rtts_ms: &[f64]) -> Self {
        let received = u32::try_from(rtts_ms.len()).unwrap_or(u32::MAX);
        if received == 0 {
            return Self::unreachable(sent);
        }
        let sum: f64 = rtts_ms.iter().sum();
        let min = rtts_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rtts_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lost = sent.saturating_sub(received);
        Self {
            sent,
            received,
            loss_pct: (f64::from(lost) / f64::from(sent.max(1))) * 100.0,
            min_rtt_ms: Some(min),
            avg_rtt_ms: Some(sum / f64::from(received)),
            max_rtt_ms: Some(max),
            is_alive: true,
        }
    }
}

/// Reachability probing seam used by the ping worker
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Pings one host; `Err` means the prober itself failed (no socket, no
    /// route), not that the host is down. Callers skip the device rather
    /// than record a DOWN sample
    async fn probe(&self, ip: IpAddr) -> Result<PingOutcome, ProbeError>;
}

/// Production ICMP prober over surge-ping
pub struct IcmpProber {
    client_v4: Client,
    client_v6: Option<Client>,
    limiter: Arc<Semaphore>,
    count: u8,
    interval: std::time::Duration,
    timeout: std::time::Duration,
}

impl IcmpProber {
    /// Creates the prober and its ICMP sockets
    ///
    /// The IPv6 socket is optional: hosts without an IPv6 stack still probe
    /// IPv4 targets.
    ///
    /// # Errors
    ///
    /// Returns an error when the IPv4 ICMP socket cannot be created.
    pub fn new(config: &ProbeConfig) -> std::io::Result<Self> {
        let client_v4 = Client::new(&Config::default())?;
        let client_v6 = Client::new(&Config::builder().kind(ICMP::V6).build()).ok();
        Ok(Self {
            client_v4,
            client_v6,
            limiter: Arc::new(Semaphore::new(config.icmp_concurrency.as_usize())),
            count: config.icmp_count,
            interval: config.icmp_interval,
            timeout: config.icmp_timeout,
        })
    }

    fn client_for(&self, ip: IpAddr) -> Result<&Client, ProbeError> {
        match ip {
            IpAddr::V4(_) => Ok(&self.client_v4),
            IpAddr::V6(_) => self.client_v6.as_ref().ok_or(ProbeError::Icmp {
                ip,
                message: "no IPv6 ICMP socket available".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for IcmpProber {
    async fn probe(&self, ip: IpAddr) -> Result<PingOutcome, ProbeError> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProbeError::Cancelled)?;

        let client = self.client_for(ip)?;
        let payload = [0u8; 56];
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random::<u16>())).await;
        pinger.timeout(self.timeout);

        let mut rtts_ms = Vec::with_capacity(usize::from(self.count));
        for sequence in 0..self.count {
            match pinger.ping(PingSequence(u16::from(sequence)), &payload).await {
                Ok((_packet, rtt)) => rtts_ms.push(rtt.as_secs_f64() * 1000.0),
                Err(e) => debug!(%ip, sequence, error = %e, "echo request unanswered"),
            }
            if usize::from(sequence) + 1 < usize::from(self.count) {
                tokio::time::sleep(self.interval).await;
            }
        }

        Ok(PingOutcome::from_rtts(u32::from(self.count), &rtts_ms))
    }
}
