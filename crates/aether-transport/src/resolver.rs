//! DNS resolution contract (spec §1: "specified only by the interface the
//! core consumes").

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no addresses found for '{0}'")]
    NoAddresses(String),
    #[error("resolution failed for '{0}': {1}")]
    Failed(String, String),
}

/// Resolves a DNS name to one or more IP addresses. A named `Endpoint`
/// (spec §3) must be resolved via this trait before a `Transport` is built.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the OS stub resolver via `tokio::net::lookup_host`.
///
/// The only resolver shipped in this crate; alternative resolvers (mDNS,
/// DNS-over-HTTPS, a hardcoded hosts file for embedded targets) implement
/// the same trait and are registered by the host application.
pub struct SystemDnsResolver;

#[async_trait]
impl DnsResolver for SystemDnsResolver {
    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = format!("{name}:0");
        let addrs: Vec<IpAddr> = tokio::net::lookup_host(lookup)
            .await
            .map_err(|e| ResolveError::Failed(name.to_owned(), e.to_string()))?
            .map(|sa| sa.ip())
            .collect();
        if addrs.is_empty() {
            return Err(ResolveError::NoAddresses(name.to_owned()));
        }
        Ok(addrs)
    }
}
