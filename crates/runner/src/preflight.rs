//! Network preflight
//!
//! Tracker traffic is only worth capturing if tracker domains actually
//! resolve. DNS-level blockers answer with a sinkhole address instead.

use async_trait::async_trait;
use privprobe_common::{Error, Result};
use rand::seq::SliceRandom;
use std::net::IpAddr;
use tracing::debug;

/// Addresses blockers return for blocked names.
pub const SINKHOLE_ADDRESSES: [&str; 2] = ["0.0.0.0", "127.0.0.1"];

/// Resolves host names to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// First address `domain` resolves to.
    async fn resolve(&self, domain: &str) -> Result<IpAddr>;
}

/// [`HostResolver`] backed by the system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> Result<IpAddr> {
        let mut addrs = tokio::net::lookup_host((domain, 0)).await?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| Error::Internal(format!("{} resolved to no addresses", domain)))
    }
}

/// Resolve a randomly chosen tracker domain and fail with
/// [`Error::DnsBlocked`] if it points at a sinkhole.
pub async fn check_tracker_resolution(resolver: &dyn HostResolver, domains: &[String]) -> Result<()> {
    let domain = domains
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| Error::InvalidConfig("no tracker domains configured".to_string()))?;

    let address = resolver.resolve(domain).await?;
    debug!("{} resolved to {}", domain, address);

    let address = address.to_string();
    if SINKHOLE_ADDRESSES.contains(&address.as_str()) {
        return Err(Error::DnsBlocked {
            domain: domain.clone(),
            address,
        });
    }
    Ok(())
}
