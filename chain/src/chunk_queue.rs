//! Per-peer chunk POST queues and the broadcast fan-out.
//!
//! Each peer gets one bounded FIFO processed by a small fixed pool, so a
//! slow peer backs up its own queue instead of the whole broadcast. Queue
//! depth doubles as the backpressure signal: peers at or over the threshold
//! are skipped when a broadcast selects its targets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use ar_gateway_types::json::ChunkPostJson;

use crate::peers::{PeerListKind, PeerRegistry};

/// Outcome of a single chunk POST. `canceled` and `timed_out` distinguish
/// the two deadlines: the request-level abort versus a silent server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPostResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub canceled: bool,
    pub timed_out: bool,
}

impl ChunkPostResult {
    pub fn rejected(reason: &str) -> Self {
        ChunkPostResult {
            success: false,
            error: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Transport for chunk POSTs, injected so queues can be exercised without a
/// network.
#[async_trait]
pub trait ChunkPostClient: Send + Sync + 'static {
    async fn post_chunk(
        &self,
        peer_url: &str,
        chunk: &ChunkPostJson,
        abort_timeout: Duration,
        response_timeout: Duration,
    ) -> ChunkPostResult;
}

struct QueuedPost {
    chunk: Arc<ChunkPostJson>,
    abort_timeout: Duration,
    response_timeout: Duration,
    reply: oneshot::Sender<ChunkPostResult>,
}

/// One peer's bounded FIFO and its worker pool.
pub struct PeerChunkQueue {
    peer_url: String,
    tx: mpsc::Sender<QueuedPost>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl PeerChunkQueue {
    fn start(
        peer_url: String,
        client: Arc<dyn ChunkPostClient>,
        concurrency: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedPost>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let depth = Arc::new(AtomicUsize::new(0));

        let workers = (0..concurrency.max(1))
            .map(|_| {
                let rx = rx.clone();
                let depth = depth.clone();
                let client = client.clone();
                let peer_url = peer_url.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next task
                        // so siblings can process in parallel.
                        let next = { rx.lock().await.recv().await };
                        let Some(task) = next else { break };
                        let result = client
                            .post_chunk(
                                &peer_url,
                                &task.chunk,
                                task.abort_timeout,
                                task.response_timeout,
                            )
                            .await;
                        depth.fetch_sub(1, Ordering::SeqCst);
                        let _ = task.reply.send(result);
                    }
                })
            })
            .collect();

        PeerChunkQueue {
            peer_url,
            tx,
            depth,
            capacity: capacity.max(1),
            workers,
        }
    }

    /// Queued plus in-flight tasks.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Rejects immediately when the queue is at capacity.
    fn enqueue(
        &self,
        chunk: Arc<ChunkPostJson>,
        abort_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<oneshot::Receiver<ChunkPostResult>, ()> {
        if self.depth.load(Ordering::SeqCst) >= self.capacity {
            return Err(());
        }
        let (reply, receiver) = oneshot::channel();
        self.depth.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedPost {
            chunk,
            abort_timeout,
            response_timeout,
            reply,
        };
        match self.tx.try_send(queued) {
            Ok(()) => Ok(receiver),
            Err(_) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(())
            }
        }
    }

    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
        debug!(peer = %self.peer_url, "chunk queue shut down");
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Workers per peer queue.
    pub per_peer_concurrency: usize,
    /// Maximum queued + in-flight tasks per peer.
    pub queue_capacity: usize,
    /// Peers at or above this depth are skipped by broadcasts.
    pub eligible_depth_threshold: usize,
    /// Global cap on peers a single broadcast posts to concurrently.
    pub broadcast_parallelism: usize,
    pub abort_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            per_peer_concurrency: 2,
            queue_capacity: 32,
            eligible_depth_threshold: 16,
            broadcast_parallelism: 8,
            abort_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerPostOutcome {
    pub peer: String,
    pub result: ChunkPostResult,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<PeerPostOutcome>,
}

/// All peer queues plus the broadcast scheduler.
pub struct ChunkQueueSet {
    config: BroadcastConfig,
    client: Arc<dyn ChunkPostClient>,
    registry: Arc<PeerRegistry>,
    queues: DashMap<String, Arc<PeerChunkQueue>>,
}

impl ChunkQueueSet {
    pub fn new(
        config: BroadcastConfig,
        client: Arc<dyn ChunkPostClient>,
        registry: Arc<PeerRegistry>,
    ) -> Self {
        ChunkQueueSet {
            config,
            client,
            registry,
            queues: DashMap::new(),
        }
    }

    fn queue_for(&self, peer_url: &str) -> Arc<PeerChunkQueue> {
        self.queues
            .entry(peer_url.to_string())
            .or_insert_with(|| {
                Arc::new(PeerChunkQueue::start(
                    peer_url.to_string(),
                    self.client.clone(),
                    self.config.per_peer_concurrency,
                    self.config.queue_capacity,
                ))
            })
            .clone()
    }

    pub fn queue_depth(&self, peer_url: &str) -> usize {
        self.queues
            .get(peer_url)
            .map(|queue| queue.depth())
            .unwrap_or(0)
    }

    /// Queues one POST on the peer's FIFO and waits for its result.
    pub async fn post_to_peer(&self, peer_url: &str, chunk: Arc<ChunkPostJson>) -> ChunkPostResult {
        let queue = self.queue_for(peer_url);
        match queue.enqueue(
            chunk,
            self.config.abort_timeout,
            self.config.response_timeout,
        ) {
            Ok(receiver) => receiver
                .await
                .unwrap_or_else(|_| ChunkPostResult::rejected("worker dropped the task")),
            Err(()) => ChunkPostResult::rejected("peer queue full"),
        }
    }

    /// Posts a chunk to the best eligible peers until `min_success` peers
    /// accept it. Eligible peers are ordered preferred-first then by weight;
    /// new sends stop being scheduled once the threshold is met, while
    /// already-scheduled sends run to completion and have their results
    /// recorded.
    pub async fn broadcast(&self, chunk: ChunkPostJson, min_success: usize) -> BroadcastResult {
        let weights = self.registry.weights(PeerListKind::PostChunk);
        let mut candidates: Vec<(String, f64, bool)> = weights
            .iter()
            .filter(|peer| self.queue_depth(&peer.id) < self.config.eligible_depth_threshold)
            .map(|peer| {
                let preferred = self
                    .registry
                    .is_preferred(PeerListKind::PostChunk, &peer.id);
                (peer.id.clone(), peer.weight, preferred)
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        });

        let chunk = Arc::new(chunk);
        let mut candidate_iter = candidates.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut outcome = BroadcastResult::default();

        loop {
            if outcome.success_count < min_success {
                while in_flight.len() < self.config.broadcast_parallelism {
                    let Some((peer, _, _)) = candidate_iter.next() else {
                        break;
                    };
                    let chunk = chunk.clone();
                    in_flight.push(async move {
                        let result = self.post_to_peer(&peer, chunk).await;
                        (peer, result)
                    });
                }
            }

            let Some((peer, result)) = in_flight.next().await else {
                break;
            };
            if result.success {
                self.registry.warm(PeerListKind::PostChunk, &peer);
                if outcome.success_count < min_success {
                    outcome.success_count += 1;
                }
            } else {
                self.registry.cool(PeerListKind::PostChunk, &peer);
                outcome.failure_count += 1;
            }
            outcome.results.push(PeerPostOutcome { peer, result });
        }

        outcome
    }

    pub fn shutdown(&self) {
        for queue in self.queues.iter() {
            queue.shutdown();
        }
    }
}
