//! Peer registry: discovered peer records, preferred-peer sets, and the
//! weighted selection tables.
//!
//! Records live for the process lifetime; stale peers are never deleted,
//! they just cool until the chooser stops picking them. All reads are
//! snapshots of atomically replaced lists, so hot paths never hold a lock
//! across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::thread_rng;
use tracing::debug;

use crate::chooser::{choose_weighted, WeightedPeer};

/// Starting weight for peers learned from `/peers`.
pub const DISCOVERED_PEER_WEIGHT: f64 = 50.0;
/// Starting weight for operator-configured preferred peers.
pub const PREFERRED_PEER_WEIGHT: f64 = 100.0;
pub const MIN_PEER_WEIGHT: f64 = 1.0;
pub const MAX_PEER_WEIGHT: f64 = 100.0;

/// A peer observed via `/peers` discovery and `/info` probes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerRecord {
    pub url: String,
    pub blocks: u64,
    pub height: u64,
    pub last_seen_ms: u64,
}

/// Which weighted list a weight update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerListKind {
    GetChunk,
    PostChunk,
}

#[derive(Debug, Clone)]
pub struct PeerRegistryConfig {
    pub preferred_get_chunk_urls: Vec<String>,
    pub preferred_post_chunk_urls: Vec<String>,
    /// Weight step applied on success/failure.
    pub temperature_delta: f64,
    /// Chooser inputs.
    pub choice_temperature: f64,
    pub choice_influence: f64,
}

impl Default for PeerRegistryConfig {
    fn default() -> Self {
        PeerRegistryConfig {
            preferred_get_chunk_urls: Vec::new(),
            preferred_post_chunk_urls: Vec::new(),
            temperature_delta: 2.0,
            choice_temperature: 50.0,
            choice_influence: 2.0,
        }
    }
}

struct WeightedList {
    entries: Arc<Vec<WeightedPeer>>,
    /// Union of configured preferred URLs and their DNS-resolved variants.
    preferred: HashSet<String>,
}

impl WeightedList {
    fn new(preferred_urls: &[String]) -> Self {
        let preferred: HashSet<String> = preferred_urls.iter().cloned().collect();
        let entries = preferred_urls
            .iter()
            .map(|url| WeightedPeer::new(url.clone(), PREFERRED_PEER_WEIGHT))
            .collect();
        WeightedList {
            entries: Arc::new(entries),
            preferred,
        }
    }

    fn add_if_absent(&mut self, url: &str, weight: f64) {
        if self.entries.iter().any(|p| p.id == url) {
            return;
        }
        let mut next = self.entries.as_ref().clone();
        next.push(WeightedPeer::new(url.to_string(), weight));
        self.entries = Arc::new(next);
    }

    fn adjust(&mut self, url: &str, delta: f64) {
        let Some(index) = self.entries.iter().position(|p| p.id == url) else {
            return;
        };
        let mut next = self.entries.as_ref().clone();
        next[index].weight = (next[index].weight + delta).clamp(MIN_PEER_WEIGHT, MAX_PEER_WEIGHT);
        self.entries = Arc::new(next);
    }
}

pub struct PeerRegistry {
    config: PeerRegistryConfig,
    records: RwLock<HashMap<String, PeerRecord>>,
    get_chunk: RwLock<WeightedList>,
    post_chunk: RwLock<WeightedList>,
}

impl PeerRegistry {
    pub fn new(config: PeerRegistryConfig) -> Self {
        let get_chunk = WeightedList::new(&config.preferred_get_chunk_urls);
        let post_chunk = WeightedList::new(&config.preferred_post_chunk_urls);
        PeerRegistry {
            config,
            records: RwLock::new(HashMap::new()),
            get_chunk: RwLock::new(get_chunk),
            post_chunk: RwLock::new(post_chunk),
        }
    }

    fn list(&self, kind: PeerListKind) -> &RwLock<WeightedList> {
        match kind {
            PeerListKind::GetChunk => &self.get_chunk,
            PeerListKind::PostChunk => &self.post_chunk,
        }
    }

    /// Adds peers learned from discovery. New peers enter both weighted
    /// lists at the discovered weight; existing entries are untouched.
    pub fn ingest_discovered(&self, urls: &[String], now_ms: u64) {
        {
            let mut records = self.records.write();
            for url in urls {
                records.entry(url.clone()).or_insert_with(|| PeerRecord {
                    url: url.clone(),
                    last_seen_ms: now_ms,
                    ..Default::default()
                });
            }
        }
        for kind in [PeerListKind::GetChunk, PeerListKind::PostChunk] {
            let mut list = self.list(kind).write();
            for url in urls {
                list.add_if_absent(url, DISCOVERED_PEER_WEIGHT);
            }
        }
    }

    /// Records the result of an `/info` probe.
    pub fn record_info(&self, url: &str, blocks: u64, height: u64, now_ms: u64) {
        let mut records = self.records.write();
        let record = records.entry(url.to_string()).or_insert_with(|| PeerRecord {
            url: url.to_string(),
            ..Default::default()
        });
        record.blocks = blocks;
        record.height = height;
        record.last_seen_ms = now_ms;
    }

    pub fn records(&self) -> Vec<PeerRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn record(&self, url: &str) -> Option<PeerRecord> {
        self.records.read().get(url).cloned()
    }

    /// Merges DNS-resolved variants of the configured preferred URLs into
    /// the preferred set. Nothing is ever removed: membership in either the
    /// original or resolved set grants preferred status.
    pub fn add_preferred_variants(&self, kind: PeerListKind, variants: &[String]) {
        let mut list = self.list(kind).write();
        for url in variants {
            if list.preferred.insert(url.clone()) {
                debug!(%url, ?kind, "adding resolved preferred peer variant");
            }
            list.add_if_absent(url, PREFERRED_PEER_WEIGHT);
        }
    }

    pub fn is_preferred(&self, kind: PeerListKind, url: &str) -> bool {
        self.list(kind).read().preferred.contains(url)
    }

    /// Snapshot of the weighted table for a list.
    pub fn weights(&self, kind: PeerListKind) -> Arc<Vec<WeightedPeer>> {
        self.list(kind).read().entries.clone()
    }

    /// Success warms a peer toward the weight ceiling.
    pub fn warm(&self, kind: PeerListKind, url: &str) {
        self.list(kind)
            .write()
            .adjust(url, self.config.temperature_delta);
    }

    /// Failure cools a peer toward the floor. Preferred peers are exempt.
    pub fn cool(&self, kind: PeerListKind, url: &str) {
        let mut list = self.list(kind).write();
        if list.preferred.contains(url) {
            return;
        }
        list.adjust(url, -self.config.temperature_delta);
    }

    /// Draws `count` distinct peers from a list, weight-proportionally.
    pub fn choose(&self, kind: PeerListKind, count: usize) -> Vec<String> {
        let table = self.weights(kind);
        choose_weighted(
            &mut thread_rng(),
            &table,
            count,
            self.config.choice_temperature,
            self.config.choice_influence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_preferred(get: &[&str], post: &[&str]) -> PeerRegistry {
        PeerRegistry::new(PeerRegistryConfig {
            preferred_get_chunk_urls: get.iter().map(|s| s.to_string()).collect(),
            preferred_post_chunk_urls: post.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn preferred_peers_start_at_the_ceiling_discovered_at_fifty() {
        let registry = registry_with_preferred(&["http://pref"], &[]);
        registry.ingest_discovered(&["http://found".to_string()], 0);

        let weights = registry.weights(PeerListKind::GetChunk);
        let pref = weights.iter().find(|p| p.id == "http://pref").unwrap();
        let found = weights.iter().find(|p| p.id == "http://found").unwrap();
        assert_eq!(pref.weight, 100.0);
        assert_eq!(found.weight, 50.0);
    }

    #[test]
    fn warm_and_cool_are_clamped() {
        let registry = registry_with_preferred(&[], &[]);
        registry.ingest_discovered(&["http://p".to_string()], 0);

        for _ in 0..100 {
            registry.warm(PeerListKind::GetChunk, "http://p");
        }
        assert_eq!(
            registry.weights(PeerListKind::GetChunk)[0].weight,
            MAX_PEER_WEIGHT
        );

        for _ in 0..100 {
            registry.cool(PeerListKind::GetChunk, "http://p");
        }
        assert_eq!(
            registry.weights(PeerListKind::GetChunk)[0].weight,
            MIN_PEER_WEIGHT
        );
    }

    #[test]
    fn preferred_peers_are_never_cooled() {
        let registry = registry_with_preferred(&["http://pref"], &[]);
        for _ in 0..10 {
            registry.cool(PeerListKind::GetChunk, "http://pref");
        }
        assert_eq!(registry.weights(PeerListKind::GetChunk)[0].weight, 100.0);
    }

    #[test]
    fn resolved_variants_join_the_preferred_union() {
        let registry = registry_with_preferred(&["http://pref.example"], &[]);
        registry.add_preferred_variants(
            PeerListKind::GetChunk,
            &["http://10.0.0.5".to_string()],
        );

        // Both the original and the resolved variant are preferred and
        // cooling is a no-op for each.
        assert!(registry.is_preferred(PeerListKind::GetChunk, "http://pref.example"));
        assert!(registry.is_preferred(PeerListKind::GetChunk, "http://10.0.0.5"));
        registry.cool(PeerListKind::GetChunk, "http://10.0.0.5");
        let weights = registry.weights(PeerListKind::GetChunk);
        let variant = weights.iter().find(|p| p.id == "http://10.0.0.5").unwrap();
        assert_eq!(variant.weight, 100.0);

        // The post list is unaffected.
        assert!(!registry.is_preferred(PeerListKind::PostChunk, "http://10.0.0.5"));
    }

    #[test]
    fn info_probe_updates_are_upserts() {
        let registry = registry_with_preferred(&[], &[]);
        registry.record_info("http://p", 10, 1000, 5);
        registry.record_info("http://p", 12, 1002, 9);
        let record = registry.record("http://p").unwrap();
        assert_eq!(record.blocks, 12);
        assert_eq!(record.height, 1002);
        assert_eq!(record.last_seen_ms, 9);
        // Discovery later does not clobber probe data.
        registry.ingest_discovered(&["http://p".to_string()], 11);
        assert_eq!(registry.record("http://p").unwrap().height, 1002);
    }

    #[test]
    fn choose_draws_from_the_requested_list() {
        let registry = registry_with_preferred(&["http://g"], &["http://p"]);
        let picks = registry.choose(PeerListKind::PostChunk, 5);
        assert_eq!(picks, vec!["http://p".to_string()]);
    }
}
