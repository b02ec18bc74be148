//! Composite chain access for the gateway.
//!
//! The crate assembles everything needed to retrieve chain data from a
//! trusted node plus a fleet of discovered peers: weighted peer selection,
//! DNS-pinned preferred peers, per-peer chunk POST queues with broadcast,
//! promise-cached prefetching, and the composite client that binds the
//! data-source roles together.

pub mod chooser;
pub mod chunk_queue;
pub mod client;
pub mod dns;
pub mod error;
pub mod headers;
pub mod owner;
pub mod peers;
pub mod promise_cache;
pub mod retry;
pub mod stores;

pub use chooser::{choose_weighted, WeightedPeer};
pub use chunk_queue::{
    BroadcastConfig, BroadcastResult, ChunkPostClient, ChunkPostResult, ChunkQueueSet,
    PeerPostOutcome,
};
pub use client::{
    ChainClientConfig, ChainSource, ChunkByAny, ChunkBroadcaster, ChunkRequest,
    CompositeChainClient, ContiguousDataSource, HttpClient, PeerRefreshTask, ReqwestHttpClient,
    ValidatedChunk, WithPeers,
};
pub use dns::{DnsRefreshTask, DnsResolver, ResolvedUrl};
pub use error::ChainError;
pub use peers::{PeerListKind, PeerRecord, PeerRegistry, PeerRegistryConfig};
pub use promise_cache::PromiseCache;
pub use retry::{with_retries, RetryPolicy, TrustedNodeThrottle};
pub use stores::{BlockStore, MemoryBlockStore, MemoryTxStore, TxStore};
