//! SSRF guard for user-supplied URLs.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

use crate::error::ValidationError;

/// Resolves a host name to socket addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns every address found for `host`. Lookup failures yield an empty list.
    async fn resolve(&self, host: &str) -> Vec<SocketAddr>;
}

/// Resolver backed by the system's `getaddrinfo`, asking for both address families.
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Vec<SocketAddr> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => addrs.collect(),
            Err(err) => {
                debug!(host, error = %err, "DNS resolution failed");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A URL that passed validation, with the addresses it was checked against.
#[derive(Debug, Clone)]
pub struct ValidatedUrl {
    pub url: Url,
    pub scheme: Scheme,
    pub host: String,
    pub resolved_addresses: BTreeSet<IpAddr>,
}

#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn HostResolver>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl UrlValidator {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    pub async fn validate(&self, raw: &str) -> Result<ValidatedUrl, ValidationError> {
        let url = Url::parse(raw.trim()).map_err(|err| match err {
            // Without a scheme the string is not an absolute URL at all.
            url::ParseError::RelativeUrlWithoutBase => ValidationError::UnsupportedScheme,
            _ => ValidationError::InvalidHost,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(ValidationError::UnsupportedScheme),
        };

        let resolved_addresses: BTreeSet<IpAddr> = match url.host() {
            Some(Host::Ipv4(ip)) => BTreeSet::from([IpAddr::V4(ip)]),
            Some(Host::Ipv6(ip)) => BTreeSet::from([IpAddr::V6(ip)]),
            Some(Host::Domain(domain)) if !domain.is_empty() => self
                .resolver
                .resolve(domain)
                .await
                .into_iter()
                // SocketAddr keeps any IPv6 zone as a separate scope id.
                .map(|addr| addr.ip())
                .collect(),
            _ => return Err(ValidationError::InvalidHost),
        };

        if let Some(blocked) = resolved_addresses.iter().find(|ip| is_blocked(**ip)) {
            debug!(url = %url, address = %blocked, "rejecting non-public host");
            return Err(ValidationError::HostNotAllowed);
        }

        let host = url.host_str().unwrap_or_default().to_string();
        Ok(ValidatedUrl {
            url,
            scheme,
            host,
            resolved_addresses,
        })
    }
}

/// True for any address that is not publicly routable.
pub fn is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_blocked_v4(ip),
        IpAddr::V6(ip) => is_blocked_v6(ip),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();

    ip.is_unspecified()
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (b & 0xc0) == 64)
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }

    let s = ip.segments();

    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // outside 2000::/3 everything is reserved, unique-local or link-local
        || (s[0] & 0xe000) != 0x2000
        // 2001::/23 protocol assignments
        || (s[0] == 0x2001 && s[1] < 0x0200)
        // 2001:db8::/32 documentation
        || (s[0] == 0x2001 && s[1] == 0x0db8)
}

/// Resolver answering from a fixed table.
#[cfg(test)]
pub(crate) struct StaticResolver {
    table: std::collections::HashMap<String, Vec<SocketAddr>>,
}

#[cfg(test)]
impl StaticResolver {
    pub(crate) fn new(entries: Vec<(&str, Vec<SocketAddr>)>) -> Self {
        Self {
            table: entries
                .into_iter()
                .map(|(host, addrs)| (host.to_string(), addrs))
                .collect(),
        }
    }

    pub(crate) fn public(host: &str) -> Self {
        Self::new(vec![(host, vec![addr("93.184.216.34")])])
    }
}

/// Parses an IP literal into a socket address with port 0.
#[cfg(test)]
pub(crate) fn addr(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 0)
}

#[cfg(test)]
#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Vec<SocketAddr> {
        self.table.get(host).cloned().unwrap_or_default()
    }
}
