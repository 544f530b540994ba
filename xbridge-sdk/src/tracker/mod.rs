//! Cross-chain operation tracker.
//!
//! Resolves a [`TransactionLinker`] to the remote [`OperationId`], then
//! reads its status from the tracking service. Every request walks the
//! configured endpoints in order; a failing endpoint is logged and skipped,
//! and only when all of them fail does the call return
//! [`BridgeError::AllEndpointsFailed`].
//!
//! Not-yet-known values (`""` from the service) are returned as `None` or
//! [`SimplifiedStatus::OperationIdNotFound`], never as errors: the service
//! indexes the chain with some lag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{DirectionMarkers, TrackerConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{
    ExecutionStages, OperationId, OperationIdsByShardsKey, SimplifiedStatus, StatusInfo,
    TransactionLinker,
};

pub mod transport;

pub use transport::{HttpTransport, TrackingTransport};

/// Which way an operation crosses the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Started on the TVM side by bridging assets.
    Forward,
    /// Started on the EVM side by the bridge.
    Reverse,
}

/// Polling policy for blocking waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

enum Request<'a> {
    Get {
        path: &'a str,
        query: Vec<(&'a str, String)>,
    },
    Post {
        path: &'a str,
        body: Value,
    },
}

impl Request<'_> {
    fn path(&self) -> &str {
        match self {
            Self::Get { path, .. } | Self::Post { path, .. } => path,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Client of the tracking service.
#[derive(Clone)]
pub struct OperationTracker {
    config: TrackerConfig,
    transport: Arc<dyn TrackingTransport>,
}

impl OperationTracker {
    /// Tracker over HTTP.
    pub fn new(config: TrackerConfig) -> BridgeResult<Self> {
        let transport = HttpTransport::new(Duration::from_millis(config.timeout_ms))?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(
        config: TrackerConfig,
        transport: Arc<dyn TrackingTransport>,
    ) -> BridgeResult<Self> {
        if config.endpoints.is_empty() {
            return Err(BridgeError::Config("tracker endpoint list is empty".into()));
        }
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn markers(&self, direction: Direction) -> &DirectionMarkers {
        match direction {
            Direction::Forward => &self.config.forward,
            Direction::Reverse => &self.config.reverse,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: &Request<'_>) -> BridgeResult<T> {
        for endpoint in &self.config.endpoints {
            let url = format!("{}/{}", endpoint.trim_end_matches('/'), request.path());
            let result = match request {
                Request::Get { query, .. } => self.transport.get(&url, query).await,
                Request::Post { body, .. } => self.transport.post(&url, body).await,
            };
            let parsed = result.and_then(|value| {
                serde_json::from_value::<Envelope<T>>(value)
                    .map(|envelope| envelope.response)
                    .map_err(BridgeError::from)
            });
            match parsed {
                Ok(response) => return Ok(response),
                Err(e) => warn!(
                    %endpoint,
                    request = request.path(),
                    error = %e,
                    "tracking endpoint failed"
                ),
            }
        }
        Err(BridgeError::AllEndpointsFailed {
            request: request.path().to_string(),
            attempted: self.config.endpoints.len(),
        })
    }

    /// Operation id for `linker`, `None` while the service has not seen it.
    pub async fn get_operation_id(
        &self,
        linker: &TransactionLinker,
    ) -> BridgeResult<Option<OperationId>> {
        let request = Request::Get {
            path: "operationId",
            query: vec![
                ("shardedId", linker.shards_key().to_string()),
                ("caller", linker.caller().to_string()),
                ("shardCount", linker.shard_count().to_string()),
                ("timestamp", linker.timestamp().to_string()),
            ],
        };
        let raw: String = self.fetch(&request).await?;
        let id = OperationId::from_response(raw);
        debug!(shards_key = linker.shards_key(), operation_id = ?id, "resolved operation id");
        Ok(id)
    }

    /// Current stage name of an operation; empty while unknown.
    pub async fn get_operation_status(&self, operation_id: &OperationId) -> BridgeResult<String> {
        let request = Request::Get {
            path: "status",
            query: vec![("operationId", operation_id.to_string())],
        };
        self.fetch(&request).await
    }

    /// Operation ids for many shard keys of one caller. Every distinct key
    /// appears in the result; unresolved keys map to `None`.
    pub async fn get_operation_ids_by_shards_keys(
        &self,
        shards_keys: &[String],
        caller: &str,
    ) -> BridgeResult<OperationIdsByShardsKey> {
        let keys = distinct(shards_keys.iter().cloned());
        let mut out: OperationIdsByShardsKey = keys.iter().map(|k| (k.clone(), None)).collect();

        for (index, chunk) in keys.chunks(self.chunk_size()).enumerate() {
            self.pause_between_chunks(index).await;
            let request = Request::Post {
                path: "operationIdsByShardsKeys",
                body: json!({ "shardsKeys": chunk, "caller": caller }),
            };
            let found: HashMap<String, String> = self.fetch(&request).await?;
            for (key, raw) in found {
                if let Some(slot) = out.get_mut(&key) {
                    *slot = OperationId::from_response(raw);
                }
            }
        }
        Ok(out)
    }

    /// Current status of many operations. Every distinct id appears in the
    /// result; ids the service does not know map to `None`.
    pub async fn get_statuses_by_operation_ids(
        &self,
        operation_ids: &[OperationId],
    ) -> BridgeResult<HashMap<OperationId, Option<StatusInfo>>> {
        self.batch_by_operation_ids("statusesByOperationIds", operation_ids).await
    }

    /// Stage profiling records of many operations.
    pub async fn get_stage_profilings(
        &self,
        operation_ids: &[OperationId],
    ) -> BridgeResult<HashMap<OperationId, Option<ExecutionStages>>> {
        self.batch_by_operation_ids("stageProfiling", operation_ids).await
    }

    async fn batch_by_operation_ids<T: DeserializeOwned>(
        &self,
        path: &str,
        operation_ids: &[OperationId],
    ) -> BridgeResult<HashMap<OperationId, Option<T>>> {
        let ids = distinct(operation_ids.iter().cloned());
        let mut out: HashMap<OperationId, Option<T>> =
            ids.iter().map(|id| (id.clone(), None)).collect();

        for (index, chunk) in ids.chunks(self.chunk_size()).enumerate() {
            self.pause_between_chunks(index).await;
            let request = Request::Post {
                path,
                body: json!({ "operationIds": chunk }),
            };
            let found: HashMap<String, Option<T>> = self.fetch(&request).await?;
            for (id, value) in found {
                if let Some(slot) = out.get_mut(&OperationId::from(id.as_str())) {
                    *slot = value;
                }
            }
        }
        Ok(out)
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    async fn pause_between_chunks(&self, index: usize) {
        if index > 0 && self.config.chunk_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.chunk_delay_ms)).await;
        }
    }

    /// Reduce a stage name to a simplified status for `direction`.
    pub fn classify_status(&self, status: &str, direction: Direction) -> SimplifiedStatus {
        let markers = self.markers(direction);
        if status == markers.executed {
            SimplifiedStatus::Successful
        } else if markers.failed.iter().any(|m| m == status) {
            SimplifiedStatus::Failed
        } else {
            SimplifiedStatus::Pending
        }
    }

    /// One-shot status of the operation behind `linker`.
    pub async fn simplified_status(
        &self,
        linker: &TransactionLinker,
        direction: Direction,
    ) -> BridgeResult<SimplifiedStatus> {
        match self.get_operation_id(linker).await? {
            None => Ok(SimplifiedStatus::OperationIdNotFound),
            Some(id) => {
                let status = self.get_operation_status(&id).await?;
                Ok(self.classify_status(&status, direction))
            }
        }
    }

    /// Poll until the operation id is known.
    pub async fn wait_for_operation_id(
        &self,
        linker: &TransactionLinker,
        options: WaitOptions,
    ) -> BridgeResult<OperationId> {
        for attempt in 0..options.max_attempts {
            if let Some(id) = self.get_operation_id(linker).await? {
                return Ok(id);
            }
            debug!(attempt, shards_key = linker.shards_key(), "operation id not yet known");
            tokio::time::sleep(options.delay).await;
        }
        Err(BridgeError::TrackingTimeout {
            attempts: options.max_attempts,
            waiting_for: format!("operation id of shards key {}", linker.shards_key()),
        })
    }
}

fn distinct<T: Clone + Eq + std::hash::Hash>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKING SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a tracked linker stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingState {
    /// The service has not reported an operation id yet.
    Unresolved,
    /// Operation id known, no status read yet.
    Resolved(OperationId),
    Pending(OperationId),
    Successful(OperationId),
    Failed(OperationId),
}

impl TrackingState {
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::Unresolved => None,
            Self::Resolved(id)
            | Self::Pending(id)
            | Self::Successful(id)
            | Self::Failed(id) => Some(id),
        }
    }

    pub fn simplified(&self) -> SimplifiedStatus {
        match self {
            Self::Unresolved => SimplifiedStatus::OperationIdNotFound,
            Self::Resolved(_) | Self::Pending(_) => SimplifiedStatus::Pending,
            Self::Successful(_) => SimplifiedStatus::Successful,
            Self::Failed(_) => SimplifiedStatus::Failed,
        }
    }
}

/// Caller-driven tracking of one linker. Each [`poll`](Self::poll) makes at
/// most one lookup; terminal states are sticky.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    linker: TransactionLinker,
    direction: Direction,
    state: TrackingState,
}

impl TrackingSession {
    pub fn new(linker: TransactionLinker, direction: Direction) -> Self {
        Self {
            linker,
            direction,
            state: TrackingState::Unresolved,
        }
    }

    pub fn linker(&self) -> &TransactionLinker {
        &self.linker
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    /// Advance by one lookup and return the simplified status.
    pub async fn poll(&mut self, tracker: &OperationTracker) -> BridgeResult<SimplifiedStatus> {
        self.state = match &self.state {
            TrackingState::Unresolved => match tracker.get_operation_id(&self.linker).await? {
                Some(id) => {
                    info!(
                        shards_key = self.linker.shards_key(),
                        operation_id = %id,
                        "operation resolved"
                    );
                    TrackingState::Resolved(id)
                }
                None => TrackingState::Unresolved,
            },
            TrackingState::Resolved(id) | TrackingState::Pending(id) => {
                let status = tracker.get_operation_status(id).await?;
                match tracker.classify_status(&status, self.direction) {
                    SimplifiedStatus::Successful => TrackingState::Successful(id.clone()),
                    SimplifiedStatus::Failed => {
                        warn!(operation_id = %id, %status, "operation failed");
                        TrackingState::Failed(id.clone())
                    }
                    _ => TrackingState::Pending(id.clone()),
                }
            }
            terminal => terminal.clone(),
        };
        Ok(self.state.simplified())
    }

    /// Poll until terminal; exceeding `max_attempts` is a timeout.
    pub async fn wait_until_terminal(
        &mut self,
        tracker: &OperationTracker,
        options: WaitOptions,
    ) -> BridgeResult<SimplifiedStatus> {
        for attempt in 0..options.max_attempts {
            let status = self.poll(tracker).await?;
            if status.is_terminal() {
                info!(
                    shards_key = self.linker.shards_key(),
                    %status,
                    attempt,
                    "operation finished"
                );
                return Ok(status);
            }
            tokio::time::sleep(options.delay).await;
        }
        Err(BridgeError::TrackingTimeout {
            attempts: options.max_attempts,
            waiting_for: format!("terminal status of shards key {}", self.linker.shards_key()),
        })
    }
}
