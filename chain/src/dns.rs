//! DNS resolution and pinning for preferred peer URLs.
//!
//! Preferred peers are configured as hostnames, but weights must survive DNS
//! flips, so each hostname is resolved to IP variants that join the
//! preferred set alongside the original URL. A periodic task re-resolves and
//! merges; it never removes entries.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::peers::{PeerListKind, PeerRegistry};

/// The outcome of resolving one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUrl {
    pub hostname: String,
    pub original_url: String,
    /// The original URL with its host swapped for the first resolved IP;
    /// equal to `original_url` when resolution failed.
    pub resolved_url: String,
    pub ips: Vec<IpAddr>,
    pub resolution_error: Option<String>,
}

pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    cache: DashMap<String, ResolvedUrl>,
}

/// `Url::to_string` appends a bare slash to host-only URLs; trim it so
/// rewritten URLs compare equal to what the operator configured.
fn url_to_string(url: &reqwest::Url, original: &str) -> String {
    let s = url.to_string();
    if url.path() == "/" && !original.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s
    }
}

impl DnsResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|err| {
            warn!(%err, "system resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        DnsResolver {
            resolver,
            cache: DashMap::new(),
        }
    }

    /// Resolves a URL's hostname, IPv4 first, IPv6 on failure. IP-literal
    /// hosts skip resolution entirely. Results are cached by hostname.
    pub async fn resolve_url(&self, url_str: &str) -> ResolvedUrl {
        let url = match reqwest::Url::parse(url_str) {
            Ok(url) => url,
            Err(err) => {
                return ResolvedUrl {
                    hostname: String::new(),
                    original_url: url_str.to_string(),
                    resolved_url: url_str.to_string(),
                    ips: Vec::new(),
                    resolution_error: Some(err.to_string()),
                }
            }
        };

        let hostname = match url.host_str() {
            Some(host) => host.to_string(),
            None => {
                return ResolvedUrl {
                    hostname: String::new(),
                    original_url: url_str.to_string(),
                    resolved_url: url_str.to_string(),
                    ips: Vec::new(),
                    resolution_error: Some("url has no host".to_string()),
                }
            }
        };

        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return ResolvedUrl {
                hostname,
                original_url: url_str.to_string(),
                resolved_url: url_str.to_string(),
                ips: vec![ip],
                resolution_error: None,
            };
        }

        let (ips, resolution_error) = self.lookup(&hostname).await;
        let resolved_url = match ips.first() {
            Some(ip) => {
                let mut rewritten = url.clone();
                match rewritten.set_ip_host(*ip) {
                    Ok(()) => url_to_string(&rewritten, url_str),
                    Err(()) => url_str.to_string(),
                }
            }
            None => url_str.to_string(),
        };

        let entry = ResolvedUrl {
            hostname: hostname.clone(),
            original_url: url_str.to_string(),
            resolved_url,
            ips,
            resolution_error,
        };
        self.cache.insert(hostname, entry.clone());
        entry
    }

    async fn lookup(&self, hostname: &str) -> (Vec<IpAddr>, Option<String>) {
        match self.resolver.ipv4_lookup(hostname).await {
            Ok(lookup) => {
                let ips = lookup.iter().map(|a| IpAddr::V4(a.0)).collect();
                (ips, None)
            }
            Err(v4_err) => match self.resolver.ipv6_lookup(hostname).await {
                Ok(lookup) => {
                    let ips = lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect();
                    (ips, None)
                }
                Err(v6_err) => {
                    debug!(%hostname, %v4_err, %v6_err, "dns resolution failed");
                    (Vec::new(), Some(v4_err.to_string()))
                }
            },
        }
    }

    /// The cached resolution for a hostname, if any.
    pub fn resolved(&self, hostname: &str) -> Option<ResolvedUrl> {
        self.cache.get(hostname).map(|entry| entry.clone())
    }

    /// For each URL: the cached IP-rewritten form when one is known, the
    /// input unchanged otherwise.
    pub fn resolved_url_strings(&self, urls: &[String]) -> Vec<String> {
        urls.iter()
            .map(|url_str| {
                let hostname = reqwest::Url::parse(url_str)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string));
                match hostname.and_then(|host| self.resolved(&host)) {
                    Some(entry) if !entry.ips.is_empty() => entry.resolved_url,
                    _ => url_str.clone(),
                }
            })
            .collect()
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the periodic re-resolution loop. Startup wires it, shutdown
/// calls [`DnsRefreshTask::stop`].
pub struct DnsRefreshTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DnsRefreshTask {
    pub fn start(
        resolver: Arc<DnsResolver>,
        registry: Arc<PeerRegistry>,
        interval: Duration,
        get_chunk_urls: Vec<String>,
        post_chunk_urls: Vec<String>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        refresh_preferred(&resolver, &registry, PeerListKind::GetChunk, &get_chunk_urls).await;
                        refresh_preferred(&resolver, &registry, PeerListKind::PostChunk, &post_chunk_urls).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        DnsRefreshTask { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Resolves each preferred URL and merges the IP variants into the
/// registry's preferred set. Existing entries are kept even when a hostname
/// stops resolving.
async fn refresh_preferred(
    resolver: &DnsResolver,
    registry: &PeerRegistry,
    kind: PeerListKind,
    urls: &[String],
) {
    for url in urls {
        let resolved = resolver.resolve_url(url).await;
        if resolved.ips.is_empty() {
            continue;
        }
        if resolved.resolved_url != resolved.original_url {
            registry.add_preferred_variants(kind, std::slice::from_ref(&resolved.resolved_url));
        }
    }
}
