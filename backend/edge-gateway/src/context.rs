//! Typed request-scoped values.
//!
//! Everything the admission layer attaches to a request lives in one of these
//! types, stored by type in actix request extensions or GraphQL request data.

use std::future::{ready, Ready};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::HeaderMap;
use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest};

use crate::admission::{AdmissionKey, PAYMENT_HEADER};
use crate::auth::Principal;

/// Resolved caller, as seen by GraphQL resolvers.
#[derive(Debug, Clone)]
pub struct Caller(pub Arc<Principal>);

/// Marks a GraphQL request that arrived over `GET`; mutations are refused.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyTransport;

/// Session token minted during a WebSocket handshake, kept for the connection's lifetime.
#[derive(Debug, Clone)]
pub struct IssuedSessionToken(pub String);

/// Everything known about an HTTP request once it has passed principal resolution.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Arc<Principal>,
    pub client_ip: String,
    pub payment: Option<String>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(
        principal: Arc<Principal>,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        proxies: &TrustedProxies,
    ) -> Self {
        Self {
            principal,
            client_ip: client_ip(headers, peer, proxies),
            payment: headers
                .get(PAYMENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|v| !v.is_empty()),
            started_at: Instant::now(),
        }
    }

    /// Build from an actix request, using the proxy list registered as app data.
    pub fn for_request(principal: Arc<Principal>, req: &HttpRequest) -> Self {
        match req.app_data::<web::Data<TrustedProxies>>() {
            Some(proxies) => Self::new(principal, req.headers(), req.peer_addr(), proxies),
            None => Self::new(
                principal,
                req.headers(),
                req.peer_addr(),
                &TrustedProxies::default(),
            ),
        }
    }

    pub fn admission_key(&self) -> AdmissionKey {
        AdmissionKey::for_principal(&self.principal, &self.client_ip)
    }
}

impl FromRequest for RequestContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    /// Requests that skipped the principal middleware are treated as anonymous.
    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let ctx = req.extensions().get::<RequestContext>().cloned();
        ready(Ok(ctx.unwrap_or_else(|| {
            RequestContext::for_request(Arc::new(Principal::anonymous()), req)
        })))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (
                addr.trim().parse::<IpAddr>().ok()?,
                Some(prefix.trim().parse::<u8>().ok()?),
            ),
            None => (raw.parse::<IpAddr>().ok()?, None),
        };
        let addr = addr.to_canonical();
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        (prefix <= max).then_some(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Proxies whose forwarding headers are believed. Empty means only the peer
/// address is used.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// Comma-separated CIDRs or bare addresses. Returns the entries that did not parse.
    pub fn parse(raw: &str) -> (Self, Vec<String>) {
        let mut networks = Vec::new();
        let mut invalid = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match IpNetwork::parse(entry) {
                Some(network) => networks.push(network),
                None => invalid.push(entry.to_string()),
            }
        }
        (Self { networks }, invalid)
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(ip))
    }
}

/// Client address for admission keying.
///
/// Forwarding headers are only honoured when the peer is a trusted proxy.
/// `X-Forwarded-For` is walked right to left and the first untrusted hop wins;
/// if every hop is trusted the leftmost one is used. `X-Real-IP` comes next,
/// then the peer itself.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, proxies: &TrustedProxies) -> String {
    let Some(direct) = peer.map(|addr| addr.ip().to_canonical()) else {
        return "unknown".to_string();
    };
    if !proxies.is_trusted(direct) {
        return direct.to_string();
    }

    let hops: Vec<IpAddr> = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .filter_map(|ip| ip.trim().parse::<IpAddr>().ok())
                .map(|ip| ip.to_canonical())
                .collect()
        })
        .unwrap_or_default();

    let forwarded = hops
        .iter()
        .rev()
        .find(|ip| !proxies.is_trusted(**ip))
        .or_else(|| hops.first())
        .copied();

    let real_ip = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(direct)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn peer(ip: &str) -> Option<SocketAddr> {
        Some(SocketAddr::new(ip.parse().unwrap(), 5555))
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(value),
        );
        headers
    }

    fn proxies(raw: &str) -> TrustedProxies {
        let (proxies, invalid) = TrustedProxies::parse(raw);
        assert!(invalid.is_empty(), "invalid entries: {:?}", invalid);
        proxies
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let mut headers = forwarded("10.0.0.7");
        headers.insert(
            HeaderName::from_static("x-real-ip"),
            HeaderValue::from_static("10.0.0.8"),
        );
        let ip = client_ip(&headers, peer("198.51.100.9"), &TrustedProxies::default());
        assert_eq!(ip, "198.51.100.9");

        let ip = client_ip(&headers, peer("198.51.100.9"), &proxies("10.0.0.0/8"));
        assert_eq!(ip, "198.51.100.9");
    }

    #[test]
    fn test_trusted_peer_uses_rightmost_untrusted_hop() {
        let lb = proxies("10.0.0.0/8, 192.168.1.1");
        let headers = forwarded("203.0.113.50, 198.51.100.4, 192.168.1.1");
        assert_eq!(client_ip(&headers, peer("10.1.2.3"), &lb), "198.51.100.4");
    }

    #[test]
    fn test_all_hops_trusted_uses_leftmost() {
        let lb = proxies("10.0.0.0/8");
        let headers = forwarded("10.0.0.5, 10.0.0.6");
        assert_eq!(client_ip(&headers, peer("10.1.2.3"), &lb), "10.0.0.5");
    }

    #[test]
    fn test_trusted_peer_falls_back_to_real_ip_then_peer() {
        let lb = proxies("10.0.0.0/8");
        let mut headers = forwarded("not-an-ip");
        headers.insert(
            HeaderName::from_static("x-real-ip"),
            HeaderValue::from_static("198.51.100.4"),
        );
        assert_eq!(client_ip(&headers, peer("10.1.2.3"), &lb), "198.51.100.4");
        assert_eq!(client_ip(&HeaderMap::new(), peer("10.1.2.3"), &lb), "10.1.2.3");
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let headers = forwarded("203.0.113.7");
        assert_eq!(client_ip(&headers, None, &proxies("0.0.0.0/0")), "unknown");
    }

    #[test]
    fn test_parse_trusted_proxies() {
        let (parsed, invalid) = TrustedProxies::parse("10.0.0.0/8, ::1, 172.16.0.0/99, bogus,");
        assert_eq!(invalid, vec!["172.16.0.0/99", "bogus"]);
        assert!(parsed.is_trusted("10.200.0.1".parse().unwrap()));
        assert!(parsed.is_trusted("::1".parse().unwrap()));
        assert!(!parsed.is_trusted("11.0.0.1".parse().unwrap()));
        assert!(TrustedProxies::parse("").0.is_empty());
    }

    #[test]
    fn test_ipv4_mapped_peer_matches_ipv4_network() {
        let lb = proxies("10.0.0.0/8");
        assert!(lb.is_trusted("::ffff:10.0.0.1".parse().unwrap()));
    }
}
