use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::Adapter;
use crate::error::{ErrorKind, MaterializeResult};
use crate::types::{Checkpoint, Key, LoadRequest, Loaded, StoreRequest};
use crate::{bail, materialize_error};

#[derive(Debug, Default)]
struct Inner {
    /// Committed documents by binding and encoded key.
    documents: BTreeMap<(usize, String), serde_json::Value>,
    pending: Vec<StoreRequest>,
    prepared: Option<Checkpoint>,
    checkpoint: Option<Checkpoint>,
    loads: Vec<LoadRequest>,
    stores: Vec<StoreRequest>,
    commits: usize,
    acknowledgements: usize,
    fail_next_commit: Option<ErrorKind>,
}

/// Destination keeping committed documents in memory.
///
/// Clones share their state, so a clone kept aside can inspect what a transactor
/// wrote through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed document of `key` in `binding`.
    pub fn document(&self, binding: usize, key: &Key) -> Option<serde_json::Value> {
        self.inner()
            .documents
            .get(&(binding, codec::encode(key)))
            .cloned()
    }

    pub fn document_count(&self) -> usize {
        self.inner().documents.len()
    }

    /// Checkpoint of the last successful commit.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.inner().checkpoint.clone()
    }

    /// Every key requested by a load, in order.
    pub fn loads(&self) -> Vec<LoadRequest> {
        self.inner().loads.clone()
    }

    /// Every row passed to store, in order.
    pub fn stores(&self) -> Vec<StoreRequest> {
        self.inner().stores.clone()
    }

    pub fn commits(&self) -> usize {
        self.inner().commits
    }

    pub fn acknowledgements(&self) -> usize {
        self.inner().acknowledgements
    }

    /// Makes the next commit fail with `kind` without applying anything.
    pub fn fail_next_commit(&self, kind: ErrorKind) {
        self.inner().fail_next_commit = Some(kind);
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        let mut inner = self.inner();
        let loaded = keys
            .iter()
            .filter_map(|request| {
                inner
                    .documents
                    .get(&(request.binding, codec::encode(&request.key)))
                    .map(|document| Loaded {
                        binding: request.binding,
                        document: document.clone(),
                    })
            })
            .collect();
        inner.loads.extend(keys);

        Ok(loaded)
    }

    fn prepare(&mut self, checkpoint: &Checkpoint) -> MaterializeResult<()> {
        let mut inner = self.inner();
        if !inner.pending.is_empty() {
            bail!(
                ErrorKind::InvariantViolation,
                "Prepare found rows left from a previous transaction",
                inner.pending.len()
            );
        }
        inner.prepared = Some(checkpoint.clone());

        Ok(())
    }

    fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        let mut inner = self.inner();
        inner.stores.extend(rows.iter().cloned());
        inner.pending.extend(rows);

        Ok(())
    }

    async fn commit(&mut self, shutdown_rx: ShutdownRx) -> MaterializeResult<()> {
        let mut inner = self.inner();
        let pending = std::mem::take(&mut inner.pending);

        if shutdown_rx.is_shutdown() {
            bail!(ErrorKind::Canceled, "Commit was canceled by shutdown");
        }
        if let Some(kind) = inner.fail_next_commit.take() {
            return Err(materialize_error!(kind, "Injected commit failure"));
        }

        let rows = pending.len();
        for row in pending {
            inner
                .documents
                .insert((row.binding, codec::encode(&row.key)), row.document);
        }
        inner.checkpoint = inner.prepared.take();
        inner.commits += 1;

        info!(rows, commits = inner.commits, "committed in-memory transaction");

        Ok(())
    }

    async fn acknowledge(&mut self) -> MaterializeResult<()> {
        self.inner().acknowledgements += 1;

        Ok(())
    }

    async fn destroy(self) {}
}
