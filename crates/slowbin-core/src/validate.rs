//! Admission validation for target URLs.
//!
//! A URL is admitted only if it parses with an authority, names a scheme,
//! resolves to an address, and that address is not the IPv4 loopback. This is
//! advisory admission control: private ranges, IPv6 loopback and redirects are
//! not inspected.

use crate::error::{Result, SlowbinError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::debug;
use url::{Host, ParseError, Url};

/// The single address rejected as local.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Hostname resolution used during admission.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to its addresses, in resolver order.
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Resolver with a fixed host table. Unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `addr`. Repeated calls add further addresses.
    pub fn with_host(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        self.hosts
            .entry(host.into().to_ascii_lowercase())
            .or_default()
            .push(addr);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")))
    }
}

/// Validates target URLs before any origin request is made.
#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn HostResolver>,
}

impl UrlValidator {
    /// Create a validator using the given resolver.
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    /// Validate `raw`, returning the parsed URL when it is admitted.
    ///
    /// Checks run in order and stop at the first failure. Resolution is
    /// attempted exactly once.
    pub async fn validate(&self, raw: &str) -> Result<Url> {
        let url = parse_target(raw)?;

        let addr = match url.host() {
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            Some(Host::Domain(domain)) => {
                let port = url.port_or_known_default().unwrap_or(80);
                let addrs = self.resolver.resolve(domain, port).await.map_err(|e| {
                    debug!("Failed to resolve {}: {}", domain, e);
                    SlowbinError::BadHostname
                })?;
                select_address(&addrs).ok_or(SlowbinError::BadHostname)?
            }
            None => return Err(SlowbinError::BadUrl),
        };

        if addr == LOOPBACK {
            debug!("Rejected local URL {} ({})", raw, addr);
            return Err(SlowbinError::LocalUrl);
        }

        Ok(url)
    }
}

/// Parse a target URL, checking for an authority and then for a scheme.
///
/// Input without a scheme (`//host/path` or `host/path`) is reported as
/// `SchemeNotSpecified` when an authority can be read from it, and as
/// `BadUrl` otherwise.
pub fn parse_target(raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => Ok(url),
            _ => Err(SlowbinError::BadUrl),
        },
        Err(ParseError::RelativeUrlWithoutBase) => {
            let candidate = format!("http://{}", raw.trim_start_matches('/'));
            let has_authority = !raw.trim_start_matches('/').is_empty()
                && Url::parse(&candidate)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| !h.is_empty()))
                    .unwrap_or(false);

            if has_authority {
                Err(SlowbinError::SchemeNotSpecified)
            } else {
                Err(SlowbinError::BadUrl)
            }
        }
        Err(_) => Err(SlowbinError::BadUrl),
    }
}

/// Pick the address a hostname lookup is judged by: the first IPv4 address,
/// or the first address of any family when there is none.
pub fn select_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
