//! The composite chain client.
//!
//! One object binds the data-source roles the rest of the gateway consumes:
//! block/tx access with prefetch ([`ChainSource`]), Merkle-validated chunk
//! retrieval from the peer fleet ([`ChunkByAny`]), chunk broadcast
//! ([`ChunkBroadcaster`]), contiguous range reads over validated chunks
//! ([`ContiguousDataSource`]), and peer fleet maintenance ([`WithPeers`]).
//!
//! Trusted-node traffic runs through a shared semaphore and a leaky token
//! bucket; peer traffic is dispatched by weighted choice and never falls
//! back to the trusted node for chunks, because peers are the authority
//! there.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use ar_gateway_bundles::RegionSource;
use ar_gateway_types::consensus::MAX_FORK_DEPTH;
use ar_gateway_types::json::{
    BlockJson, ChunkJson, ChunkPostJson, NetworkInfoJson, TransactionJson, TxOffsetJson,
};
use ar_gateway_types::Base64;
use ar_gateway_validator::{hash_sha256, DataPathRequest, InvalidProofError, RulesetResolver};

use crate::chunk_queue::{
    BroadcastConfig, BroadcastResult, ChunkPostClient, ChunkPostResult, ChunkQueueSet,
};
use crate::error::ChainError;
use crate::headers::{peer_gateway_headers, trusted_node_headers, RequestAttributes};
use crate::peers::{PeerListKind, PeerRecord, PeerRegistry};
use crate::promise_cache::{PromiseCache, SharedPromise};
use crate::retry::{with_retries, RetryPolicy, TrustedNodeThrottle};
use crate::stores::{BlockStore, TxStore};

//==============================================================================
// HTTP transport
//------------------------------------------------------------------------------

/// Minimal HTTP surface the client needs; injected so the composite client
/// can be exercised against fakes.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn get_json(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<serde_json::Value, ChainError>;

    async fn get_text(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<String, ChainError>;

    async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, ChainError>;
}

pub struct ReqwestHttpClient {
    http: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        ReqwestHttpClient {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<serde_json::Value, ChainError> {
        let response = self
            .http
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(ChainError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::from_status(status));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))
    }

    async fn get_text(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<String, ChainError> {
        let response = self
            .http
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(ChainError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::from_status(status));
        }
        response
            .text()
            .await
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))
    }

    async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<u16, ChainError> {
        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(ChainError::from_reqwest)?;
        Ok(response.status().as_u16())
    }
}

/// Chunk POST transport with the two distinguishable deadlines: the outer
/// abort timeout marks the result canceled, the transport's own response
/// timeout marks it timed out.
pub struct HttpChunkPostClient {
    http: Arc<dyn HttpClient>,
    node_release: String,
}

impl HttpChunkPostClient {
    pub fn new(http: Arc<dyn HttpClient>, node_release: String) -> Self {
        HttpChunkPostClient { http, node_release }
    }
}

#[async_trait]
impl ChunkPostClient for HttpChunkPostClient {
    async fn post_chunk(
        &self,
        peer_url: &str,
        chunk: &ChunkPostJson,
        abort_timeout: Duration,
        response_timeout: Duration,
    ) -> ChunkPostResult {
        let url = join_url(peer_url, "chunk");
        let body = match serde_json::to_value(chunk) {
            Ok(body) => body,
            Err(err) => return ChunkPostResult::rejected(&err.to_string()),
        };
        let headers = trusted_node_headers(&self.node_release);

        let post = self.http.post_json(&url, headers, body, response_timeout);
        match tokio::time::timeout(abort_timeout, post).await {
            Err(_) => ChunkPostResult {
                success: false,
                canceled: true,
                error: Some("aborted before a response arrived".to_string()),
                ..Default::default()
            },
            Ok(Ok(status)) => ChunkPostResult {
                success: (200..300).contains(&status),
                status_code: Some(status),
                ..Default::default()
            },
            Ok(Err(ChainError::TimedOut)) => ChunkPostResult {
                success: false,
                timed_out: true,
                error: Some("response timeout".to_string()),
                ..Default::default()
            },
            Ok(Err(err)) => ChunkPostResult {
                success: false,
                error: Some(err.to_string()),
                ..Default::default()
            },
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//==============================================================================
// Roles
//------------------------------------------------------------------------------

/// A chunk request, addressed both absolutely (for ruleset selection and
/// peer `GET /chunk`) and relative to its transaction (for proof walking).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub absolute_offset: u128,
    pub tx_size: u64,
    pub data_root: Base64,
    pub relative_offset: u128,
}

impl ChunkRequest {
    /// Cache key: the JSON fingerprint of the four addressing fields.
    pub fn fingerprint(&self) -> String {
        serde_json::json!({
            "absoluteOffset": self.absolute_offset.to_string(),
            "txSize": self.tx_size,
            "dataRoot": self.data_root.to_string(),
            "relativeOffset": self.relative_offset.to_string(),
        })
        .to_string()
    }
}

/// A chunk that passed Merkle validation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChunk {
    pub chunk: Vec<u8>,
    pub tx_path: Base64,
    pub data_path: Base64,
    /// Offsets within the transaction's data, from the proof walk.
    pub start_offset: u128,
    pub end_offset: u128,
    /// SHA-256 of the chunk bytes, equal to the proven leaf data hash.
    pub hash: [u8; 32],
    pub source: Option<String>,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn get_block_by_height(&self, height: u64) -> Result<Arc<BlockJson>, ChainError>;
    async fn get_tx(&self, id: &Base64) -> Result<Arc<TransactionJson>, ChainError>;
    async fn get_tx_offset(&self, id: &Base64) -> Result<TxOffsetJson, ChainError>;
    async fn get_tx_field(&self, id: &Base64, field: &str) -> Result<String, ChainError>;
    async fn get_tx_data_size(&self, id: &Base64) -> Result<u64, ChainError>;
    async fn get_pending_tx_ids(&self) -> Result<Vec<Base64>, ChainError>;
    async fn get_height(&self) -> Result<u64, ChainError>;
    async fn get_network_info(&self) -> Result<NetworkInfoJson, ChainError>;
}

#[async_trait]
pub trait ChunkByAny: Send + Sync {
    async fn get_chunk_by_any(&self, request: ChunkRequest)
        -> Result<Arc<ValidatedChunk>, ChainError>;
}

#[async_trait]
pub trait ChunkBroadcaster: Send + Sync {
    async fn broadcast_chunk(&self, chunk: ChunkPostJson, min_success: usize) -> BroadcastResult;
}

#[async_trait]
pub trait ContiguousDataSource: Send + Sync {
    async fn read_tx_data_range(
        &self,
        tx_id: &Base64,
        offset: u128,
        length: usize,
    ) -> Result<Bytes, ChainError>;
}

#[async_trait]
pub trait WithPeers: Send + Sync {
    async fn refresh_peers(&self) -> Result<(), ChainError>;
    fn peer_records(&self) -> Vec<PeerRecord>;
}

//==============================================================================
// Composite client
//------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChainClientConfig {
    pub trusted_node_url: String,
    pub node_release: String,
    pub max_requests_per_second: u64,
    pub trusted_concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub block_cache_capacity: usize,
    pub tx_cache_capacity: usize,
    pub prefetch_ttl: Duration,
    pub chunk_cache_capacity: usize,
    pub chunk_cache_ttl: Duration,
    /// Per-attempt peer chunk timeout; kept very short for tail latency.
    pub peer_chunk_timeout: Duration,
    pub peer_chunk_attempts: usize,
    pub peer_select_count: usize,
    pub peer_tx_count: usize,
    pub peer_tx_timeout: Duration,
    pub peer_info_timeout: Duration,
    pub throttle_poll_interval: Duration,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        ChainClientConfig {
            trusted_node_url: "https://arweave.net".to_string(),
            node_release: "ar-gateway/0.1.0".to_string(),
            max_requests_per_second: 20,
            trusted_concurrency: 10,
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            block_cache_capacity: 128,
            tx_cache_capacity: 1024,
            prefetch_ttl: Duration::from_secs(30),
            chunk_cache_capacity: 512,
            chunk_cache_ttl: Duration::from_secs(60),
            peer_chunk_timeout: Duration::from_millis(500),
            peer_chunk_attempts: 3,
            peer_select_count: 3,
            peer_tx_count: 3,
            peer_tx_timeout: Duration::from_secs(3),
            peer_info_timeout: Duration::from_secs(3),
            throttle_poll_interval: Duration::from_millis(100),
        }
    }
}

struct ClientInner {
    config: ChainClientConfig,
    http: Arc<dyn HttpClient>,
    registry: Arc<PeerRegistry>,
    queues: ChunkQueueSet,
    throttle: TrustedNodeThrottle,
    trusted_semaphore: Semaphore,
    block_cache: Arc<PromiseCache<u64, BlockJson>>,
    tx_cache: Arc<PromiseCache<Vec<u8>, TransactionJson>>,
    chunk_cache: Arc<PromiseCache<String, ValidatedChunk>>,
    block_store: Arc<dyn BlockStore>,
    tx_store: Arc<dyn TxStore>,
    ruleset: RulesetResolver,
    max_prefetch_height: AtomicU64,
}

#[derive(Clone)]
pub struct CompositeChainClient {
    inner: Arc<ClientInner>,
}

impl CompositeChainClient {
    pub fn new(
        config: ChainClientConfig,
        http: Arc<dyn HttpClient>,
        registry: Arc<PeerRegistry>,
        broadcast: BroadcastConfig,
        block_store: Arc<dyn BlockStore>,
        tx_store: Arc<dyn TxStore>,
    ) -> Self {
        let post_client = Arc::new(HttpChunkPostClient::new(
            http.clone(),
            config.node_release.clone(),
        ));
        let queues = ChunkQueueSet::new(broadcast, post_client, registry.clone());
        let throttle = TrustedNodeThrottle::start(
            config.max_requests_per_second,
            config.throttle_poll_interval,
        );

        CompositeChainClient {
            inner: Arc::new(ClientInner {
                block_cache: PromiseCache::new(config.block_cache_capacity, config.prefetch_ttl),
                tx_cache: PromiseCache::new(config.tx_cache_capacity, config.prefetch_ttl),
                chunk_cache: PromiseCache::new(
                    config.chunk_cache_capacity,
                    config.chunk_cache_ttl,
                ),
                trusted_semaphore: Semaphore::new(config.trusted_concurrency.max(1)),
                throttle,
                queues,
                registry,
                http,
                block_store,
                tx_store,
                ruleset: RulesetResolver::default(),
                max_prefetch_height: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.inner.registry
    }

    pub async fn stop(&self) {
        self.inner.throttle.stop().await;
        self.inner.queues.shutdown();
    }

    //--------------------------------------------------------------------------
    // Trusted node access
    //--------------------------------------------------------------------------

    /// Every trusted-node request serializes through the shared queue and
    /// the leaky bucket, and retries with exponential backoff. Upstream 429s
    /// additionally drain `2^attempt` tokens from the bucket.
    async fn trusted_get_value(&self, path: &str) -> Result<serde_json::Value, ChainError> {
        let inner = &self.inner;
        let url = join_url(&inner.config.trusted_node_url, path);
        with_retries(
            path,
            inner.config.retry,
            |_attempt| {
                let url = url.clone();
                async move {
                    let _permit = inner
                        .trusted_semaphore
                        .acquire()
                        .await
                        .map_err(|_| ChainError::Canceled)?;
                    inner.throttle.acquire().await;
                    inner
                        .http
                        .get_json(
                            &url,
                            trusted_node_headers(&inner.config.node_release),
                            inner.config.request_timeout,
                        )
                        .await
                }
            },
            |attempt, err| {
                if matches!(err, ChainError::RateLimited) {
                    inner.throttle.penalize(attempt);
                }
            },
        )
        .await
    }

    async fn trusted_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        let value = self.trusted_get_value(path).await?;
        serde_json::from_value(value).map_err(|e| ChainError::MalformedResponse(e.to_string()))
    }

    //--------------------------------------------------------------------------
    // Prefetch
    //--------------------------------------------------------------------------

    /// Returns the shared in-flight promise for a block height, starting the
    /// fetch when none is live. Errors evict so later callers retry afresh.
    pub fn prefetch_block_by_height(
        &self,
        height: u64,
        prefetch_txs: bool,
    ) -> SharedPromise<BlockJson> {
        self.inner
            .max_prefetch_height
            .fetch_max(height, Ordering::SeqCst);

        let client = self.clone();
        self.inner.block_cache.get_or_start(height, move || {
            async move {
                let inner = &client.inner;
                if let Some(block) = inner.block_store.get_by_height(height).await {
                    debug!(height, "block prefetch served from store");
                    return Ok(block);
                }

                let mut block: BlockJson =
                    client.trusted_get(&format!("block/height/{height}")).await?;
                // PoA payloads are dead weight for data retrieval.
                block.strip_poa();
                if !block.is_sane() || block.height != height {
                    return Err(ChainError::MalformedResponse(format!(
                        "block {height} failed sanity checks"
                    )));
                }

                let max_height = inner.max_prefetch_height.load(Ordering::SeqCst);
                let stable = max_height.saturating_sub(height) > MAX_FORK_DEPTH;
                inner.block_store.put(&block, stable).await;

                if prefetch_txs {
                    for id in &block.txs.0 {
                        let promise = client.prefetch_tx(id.clone());
                        tokio::spawn(async move {
                            let _ = promise.await;
                        });
                    }
                }
                Ok(block)
            }
            .boxed()
        })
    }

    /// Returns the shared in-flight promise for a transaction: store, then
    /// peers (first success wins), then the trusted node.
    pub fn prefetch_tx(&self, id: Base64) -> SharedPromise<TransactionJson> {
        let client = self.clone();
        self.inner.tx_cache.get_or_start(id.0.clone(), move || {
            async move {
                let inner = &client.inner;
                if let Some(tx) = inner.tx_store.get(&id).await {
                    return Ok(tx);
                }

                let mut tx = match client.peer_get_tx(&id).await {
                    Ok(tx) => tx,
                    Err(peer_err) => {
                        debug!(error = %peer_err, "peers failed, falling back to trusted node");
                        client.trusted_get_tx(&id).await?
                    }
                };

                // Inline data is never trusted or cached; chunks are the
                // source of truth.
                tx.strip_data();
                if !tx.is_sane() {
                    return Err(ChainError::MalformedResponse(
                        "transaction failed sanity checks".to_string(),
                    ));
                }
                if tx.owner.is_empty() {
                    tx.owner = crate::owner::recover_owner(&tx)?;
                }
                inner.tx_store.put(&tx).await;
                Ok(tx)
            }
            .boxed()
        })
    }

    async fn trusted_get_tx(&self, id: &Base64) -> Result<TransactionJson, ChainError> {
        match self.trusted_get(&format!("tx/{id}")).await {
            Err(ChainError::NotFound) => self.trusted_get(&format!("unconfirmed_tx/{id}")).await,
            other => other,
        }
    }

    /// First-success-wins race over a weighted selection of peers.
    async fn peer_get_tx(&self, id: &Base64) -> Result<TransactionJson, ChainError> {
        let inner = &self.inner;
        let peers = inner
            .registry
            .choose(PeerListKind::GetChunk, inner.config.peer_tx_count);
        if peers.is_empty() {
            return Err(ChainError::Transport("no peers available".to_string()));
        }

        let attempts: Vec<_> = peers
            .iter()
            .map(|peer| {
                let url = join_url(peer, &format!("tx/{id}"));
                let peer = peer.clone();
                let headers = peer_gateway_headers(
                    &inner.config.node_release,
                    &RequestAttributes::default(),
                );
                let http = inner.http.clone();
                let timeout = inner.config.peer_tx_timeout;
                async move {
                    let value = http.get_json(&url, headers, timeout).await?;
                    let tx: TransactionJson = serde_json::from_value(value)
                        .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;
                    Ok::<_, ChainError>((peer, tx))
                }
                .boxed()
            })
            .collect();

        match futures::future::select_ok(attempts).await {
            Ok(((peer, tx), _rest)) => {
                inner.registry.warm(PeerListKind::GetChunk, &peer);
                Ok(tx)
            }
            Err(err) => Err(err),
        }
    }

    //--------------------------------------------------------------------------
    // Chunks
    //--------------------------------------------------------------------------

    async fn fetch_and_validate_chunk(
        &self,
        peer: &str,
        request: &ChunkRequest,
    ) -> Result<ValidatedChunk, ChainError> {
        let inner = &self.inner;
        let url = join_url(peer, &format!("chunk/{}", request.absolute_offset));
        let value = inner
            .http
            .get_json(
                &url,
                peer_gateway_headers(&inner.config.node_release, &RequestAttributes::default()),
                inner.config.peer_chunk_timeout,
            )
            .await?;
        let chunk_json: ChunkJson = serde_json::from_value(value)
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;

        let data_root: [u8; 32] = request
            .data_root
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::MalformedResponse("data root must be 32 bytes".to_string()))?;

        let parsed = inner.ruleset.parse_data_path(
            request.absolute_offset,
            DataPathRequest {
                data_root,
                data_size: request.tx_size as u128,
                data_path: chunk_json.data_path.as_slice(),
                offset: request.relative_offset,
                ruleset: None,
            },
        )?;

        let chunk_bytes = chunk_json.chunk.0;
        if chunk_bytes.len() as u128 != parsed.chunk_size {
            return Err(InvalidProofError::ChunkSizeMismatch {
                expected: parsed.chunk_size,
                actual: chunk_bytes.len() as u128,
            }
            .into());
        }
        let hash = hash_sha256(&chunk_bytes);
        if hash != parsed.chunk_data {
            return Err(InvalidProofError::ChunkHashMismatch.into());
        }

        Ok(ValidatedChunk {
            chunk: chunk_bytes,
            tx_path: chunk_json.tx_path,
            data_path: chunk_json.data_path,
            start_offset: parsed.start_offset,
            end_offset: parsed.end_offset,
            hash,
            source: Some(peer.to_string()),
        })
    }

    /// Tries weighted peers sequentially under the short per-attempt
    /// timeout, warming winners and cooling losers. Peer failures never fall
    /// back to the trusted node here.
    async fn peer_get_chunk(&self, request: ChunkRequest) -> Result<ValidatedChunk, ChainError> {
        let inner = &self.inner;
        let mut attempts = 0usize;
        for _ in 0..inner.config.peer_chunk_attempts {
            let peers = inner
                .registry
                .choose(PeerListKind::GetChunk, inner.config.peer_select_count);
            if peers.is_empty() {
                break;
            }
            for peer in peers {
                attempts += 1;
                match self.fetch_and_validate_chunk(&peer, &request).await {
                    Ok(chunk) => {
                        inner.registry.warm(PeerListKind::GetChunk, &peer);
                        return Ok(chunk);
                    }
                    Err(err) => {
                        debug!(peer = %peer, error = %err, "peer chunk attempt failed");
                        inner.registry.cool(PeerListKind::GetChunk, &peer);
                    }
                }
            }
        }
        Err(ChainError::NoPeerSucceeded { attempts })
    }
}

#[async_trait]
impl ChainSource for CompositeChainClient {
    async fn get_block_by_height(&self, height: u64) -> Result<Arc<BlockJson>, ChainError> {
        self.prefetch_block_by_height(height, true)
            .await
            .map_err(ChainError::Shared)
    }

    async fn get_tx(&self, id: &Base64) -> Result<Arc<TransactionJson>, ChainError> {
        self.prefetch_tx(id.clone()).await.map_err(ChainError::Shared)
    }

    async fn get_tx_offset(&self, id: &Base64) -> Result<TxOffsetJson, ChainError> {
        self.trusted_get(&format!("tx/{id}/offset")).await
    }

    async fn get_tx_field(&self, id: &Base64, field: &str) -> Result<String, ChainError> {
        let inner = &self.inner;
        let url = join_url(&inner.config.trusted_node_url, &format!("tx/{id}/{field}"));
        let _permit = inner
            .trusted_semaphore
            .acquire()
            .await
            .map_err(|_| ChainError::Canceled)?;
        inner.throttle.acquire().await;
        inner
            .http
            .get_text(
                &url,
                trusted_node_headers(&inner.config.node_release),
                inner.config.request_timeout,
            )
            .await
    }

    async fn get_tx_data_size(&self, id: &Base64) -> Result<u64, ChainError> {
        let text = self.get_tx_field(id, "data_size").await?;
        text.trim()
            .parse()
            .map_err(|_| ChainError::MalformedResponse(format!("bad data size: {text}")))
    }

    async fn get_pending_tx_ids(&self) -> Result<Vec<Base64>, ChainError> {
        let ids: Vec<String> = self.trusted_get("tx/pending").await?;
        ids.iter()
            .map(|id| {
                id.parse::<Base64>()
                    .map_err(|e| ChainError::MalformedResponse(e.to_string()))
            })
            .collect()
    }

    async fn get_height(&self) -> Result<u64, ChainError> {
        self.trusted_get("height").await
    }

    async fn get_network_info(&self) -> Result<NetworkInfoJson, ChainError> {
        self.trusted_get("info").await
    }
}

#[async_trait]
impl ChunkByAny for CompositeChainClient {
    async fn get_chunk_by_any(
        &self,
        request: ChunkRequest,
    ) -> Result<Arc<ValidatedChunk>, ChainError> {
        let key = request.fingerprint();
        let client = self.clone();
        let promise = self
            .inner
            .chunk_cache
            .get_or_start(key, move || {
                async move { client.peer_get_chunk(request).await }.boxed()
            });
        promise.await.map_err(ChainError::Shared)
    }
}

#[async_trait]
impl ChunkBroadcaster for CompositeChainClient {
    async fn broadcast_chunk(&self, chunk: ChunkPostJson, min_success: usize) -> BroadcastResult {
        self.inner.queues.broadcast(chunk, min_success).await
    }
}

#[async_trait]
impl ContiguousDataSource for CompositeChainClient {
    /// Reads a byte range of a transaction's data by pulling and validating
    /// the covering chunks.
    async fn read_tx_data_range(
        &self,
        tx_id: &Base64,
        offset: u128,
        length: usize,
    ) -> Result<Bytes, ChainError> {
        let tx_offset = self.get_tx_offset(tx_id).await?;
        let size = tx_offset.size as u128;
        if offset >= size || length == 0 {
            return Ok(Bytes::new());
        }
        let data_start = (tx_offset.offset + 1).checked_sub(size).ok_or_else(|| {
            ChainError::MalformedResponse("tx offset smaller than tx size".to_string())
        })?;
        let tx = self.get_tx(tx_id).await?;

        let end = (offset + length as u128).min(size);
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut cursor = offset;
        while cursor < end {
            let chunk = self
                .get_chunk_by_any(ChunkRequest {
                    absolute_offset: data_start + cursor,
                    tx_size: tx_offset.size,
                    data_root: tx.data_root.clone(),
                    relative_offset: cursor,
                })
                .await?;
            if cursor < chunk.start_offset || cursor >= chunk.end_offset {
                return Err(ChainError::MalformedResponse(format!(
                    "chunk covers [{}, {}) but offset {} was requested",
                    chunk.start_offset, chunk.end_offset, cursor
                )));
            }
            let begin = (cursor - chunk.start_offset) as usize;
            let take = ((chunk.end_offset - cursor).min(end - cursor)) as usize;
            out.extend_from_slice(&chunk.chunk[begin..begin + take]);
            cursor += take as u128;
        }
        Ok(Bytes::from(out))
    }
}

/// Lets the bundle resolver read nested bundle regions through validated
/// chunks, keyed by the root bundle's transaction id.
#[async_trait]
impl RegionSource for CompositeChainClient {
    async fn read(&self, bundle_id: &Base64, offset: u128, length: usize) -> eyre::Result<Bytes> {
        self.read_tx_data_range(bundle_id, offset, length)
            .await
            .map_err(eyre::Report::new)
    }

    async fn size(&self, bundle_id: &Base64) -> eyre::Result<u128> {
        let tx_offset = self
            .get_tx_offset(bundle_id)
            .await
            .map_err(eyre::Report::new)?;
        Ok(tx_offset.size as u128)
    }
}

#[async_trait]
impl WithPeers for CompositeChainClient {
    /// Pulls `/peers` from the trusted node and probes each peer's `/info`.
    /// Existing records and weights survive; new peers enter at the
    /// discovered weight.
    async fn refresh_peers(&self) -> Result<(), ChainError> {
        let inner = &self.inner;
        let hosts: Vec<String> = self.trusted_get("peers").await?;
        let urls: Vec<String> = hosts
            .iter()
            .map(|host| {
                if host.starts_with("http://") || host.starts_with("https://") {
                    host.clone()
                } else {
                    format!("http://{host}")
                }
            })
            .collect();
        inner.registry.ingest_discovered(&urls, now_ms());

        futures::stream::iter(urls)
            .for_each_concurrent(8, |url| async move {
                let info_url = join_url(&url, "info");
                let headers = trusted_node_headers(&inner.config.node_release);
                match inner
                    .http
                    .get_json(&info_url, headers, inner.config.peer_info_timeout)
                    .await
                {
                    Ok(value) => match serde_json::from_value::<NetworkInfoJson>(value) {
                        Ok(info) => {
                            inner
                                .registry
                                .record_info(&url, info.blocks, info.height, now_ms());
                        }
                        Err(err) => warn!(peer = %url, %err, "peer info response malformed"),
                    },
                    Err(err) => debug!(peer = %url, %err, "peer info probe failed"),
                }
            })
            .await;
        Ok(())
    }

    fn peer_records(&self) -> Vec<PeerRecord> {
        self.inner.registry.records()
    }
}

//==============================================================================
// Peer refresh task
//------------------------------------------------------------------------------

/// Owner of the periodic peer refresh loop.
pub struct PeerRefreshTask {
    stop_tx: tokio::sync::watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl PeerRefreshTask {
    pub fn start(client: CompositeChainClient, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = client.refresh_peers().await {
                            warn!(%err, "peer refresh failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        PeerRefreshTask { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
