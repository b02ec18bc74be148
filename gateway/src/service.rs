//! Service wiring: builds the composite client and the limiter, starts the
//! background loops in dependency order, and tears them down in reverse.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tracing::info;

use ar_gateway_bundles::{resolve_item_offset, BundleError, DataItemLocation};
use ar_gateway_chain::{
    BroadcastConfig, ChainClientConfig, CompositeChainClient, DnsRefreshTask, DnsResolver,
    MemoryBlockStore, MemoryTxStore, PeerRefreshTask, PeerRegistry, PeerRegistryConfig,
    ReqwestHttpClient,
};
use ar_gateway_indexes::{BlockOffsetIndex, Initialized, SearchBounds};
use ar_gateway_limiter::{IpAllowList, MemoryBucketStore, RateLimitConfig, RateLimiter};
use ar_gateway_types::Base64;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub chain: ChainClientConfig,
    pub broadcast: BroadcastConfig,
    pub registry: PeerRegistryConfig,
    pub rate_limit: RateLimitConfig,
    pub ip_allow_list: Vec<String>,
    pub dns_refresh_interval: Duration,
    pub peer_refresh_interval: Duration,
    /// JSON contents of the block↔offset map, when the deployment ships
    /// one.
    pub block_offset_map_json: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            chain: ChainClientConfig::default(),
            broadcast: BroadcastConfig::default(),
            registry: PeerRegistryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ip_allow_list: Vec::new(),
            dns_refresh_interval: Duration::from_secs(300),
            peer_refresh_interval: Duration::from_secs(600),
            block_offset_map_json: None,
        }
    }
}

/// The assembled data-retrieval core. Owns every background task; dropping
/// it without [`GatewayService::shutdown`] leaves loops running.
pub struct GatewayService {
    client: CompositeChainClient,
    limiter: RateLimiter<MemoryBucketStore>,
    block_offset_index: Option<BlockOffsetIndex<Initialized>>,
    dns_task: Option<DnsRefreshTask>,
    peer_task: Option<PeerRefreshTask>,
}

impl GatewayService {
    /// Startup order: peer registry, composite client (which starts the
    /// trusted-node bucket), then the DNS and peer refresh loops.
    pub fn start(config: GatewayConfig) -> Result<Self> {
        let registry = Arc::new(PeerRegistry::new(config.registry.clone()));
        let http = Arc::new(ReqwestHttpClient::new());
        let client = CompositeChainClient::new(
            config.chain.clone(),
            http,
            registry.clone(),
            config.broadcast.clone(),
            Arc::new(MemoryBlockStore::new()),
            Arc::new(MemoryTxStore::new()),
        );

        let block_offset_index = match &config.block_offset_map_json {
            Some(json) => Some(BlockOffsetIndex::new().init_from_json(json)?),
            None => None,
        };

        let limiter = RateLimiter::new(
            MemoryBucketStore::new(),
            config.rate_limit.clone(),
            IpAllowList::new(&config.ip_allow_list)?,
        );

        let resolver = Arc::new(DnsResolver::new());
        let dns_task = DnsRefreshTask::start(
            resolver,
            registry,
            config.dns_refresh_interval,
            config.registry.preferred_get_chunk_urls.clone(),
            config.registry.preferred_post_chunk_urls.clone(),
        );
        let peer_task = PeerRefreshTask::start(client.clone(), config.peer_refresh_interval);

        info!("gateway data retrieval core started");
        Ok(GatewayService {
            client,
            limiter,
            block_offset_index,
            dns_task: Some(dns_task),
            peer_task: Some(peer_task),
        })
    }

    pub fn client(&self) -> &CompositeChainClient {
        &self.client
    }

    pub fn limiter(&self) -> &RateLimiter<MemoryBucketStore> {
        &self.limiter
    }

    /// Narrows the block-height window for an absolute weave offset, when a
    /// block↔offset map was loaded.
    pub fn search_bounds_for_offset(
        &self,
        target_offset: u128,
        current_height: u64,
    ) -> Option<SearchBounds> {
        self.block_offset_index
            .as_ref()
            .map(|index| index.get_search_bounds(target_offset, current_height))
    }

    /// Locates a data item inside a bundle transaction, reading windows of
    /// validated chunk data through the composite client.
    pub async fn resolve_bundle_item(
        &self,
        target_item_id: &Base64,
        root_bundle_id: &Base64,
    ) -> Result<Option<DataItemLocation>, BundleError> {
        resolve_item_offset(&self.client, target_item_id, root_bundle_id).await
    }

    /// Teardown in reverse start order.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.peer_task.take() {
            task.stop().await;
        }
        if let Some(task) = self.dns_task.take() {
            task.stop().await;
        }
        self.client.stop().await;
        info!("gateway data retrieval core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_map_json() -> String {
        r#"{
            "version": "1",
            "generatedAt": "2024-05-01T00:00:00Z",
            "currentHeight": 1000,
            "currentWeaveSize": 2000,
            "intervalBytes": 1000,
            "intervals": [
                {"offset": 0, "blockHeight": 0},
                {"offset": 1000, "blockHeight": 500}
            ]
        }"#
        .to_string()
    }

    #[tokio::test]
    async fn starts_and_stops_cleanly() {
        let config = GatewayConfig {
            block_offset_map_json: Some(offset_map_json()),
            ..Default::default()
        };
        let service = GatewayService::start(config).unwrap();

        let bounds = service.search_bounds_for_offset(1500, 1000).unwrap();
        assert_eq!(bounds.low_height, 500);
        assert_eq!(bounds.high_height, 1000);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn bad_offset_map_fails_startup() {
        let config = GatewayConfig {
            block_offset_map_json: Some("[]".to_string()),
            ..Default::default()
        };
        assert!(GatewayService::start(config).is_err());
    }
}
