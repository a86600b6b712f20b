//! Protocol state machine enforcing the order of transaction calls.
//!
//! A session moves `Idle → Loading → Prepared → Storing → Committing → Idle` for
//! every transaction and ends in `Destroyed`. Calls arriving in any other order are
//! invariant violations, fatal for the session.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::binding::Binding;
use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::{Adapter, Destination};
use crate::error::{ErrorKind, MaterializeResult};
use crate::materialize_error;
use crate::types::{Checkpoint, LoadRequest, Loaded, StoreRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactorState {
    Idle,
    Loading,
    Prepared,
    Storing,
    Committing,
    Destroyed,
}

impl fmt::Display for TransactorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactorState::Idle => "idle",
            TransactorState::Loading => "loading",
            TransactorState::Prepared => "prepared",
            TransactorState::Storing => "storing",
            TransactorState::Committing => "committing",
            TransactorState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Drives one destination adapter through transactions.
pub struct Transactor<A: Adapter = Destination> {
    adapter: Option<A>,
    state: TransactorState,
    /// Delta-update flag of each binding, by binding index.
    delta_updates: Vec<bool>,
    /// Set by a successful commit until it is acknowledged.
    pending_ack: bool,
    shutdown_rx: ShutdownRx,
}

impl<A: Adapter> Transactor<A> {
    pub fn new(adapter: A, bindings: &[Binding], shutdown_rx: ShutdownRx) -> Self {
        Self {
            adapter: Some(adapter),
            state: TransactorState::Idle,
            delta_updates: bindings.iter().map(|b| b.delta_updates).collect(),
            pending_ack: false,
            shutdown_rx,
        }
    }

    pub fn state(&self) -> TransactorState {
        self.state
    }

    /// Whether binding `index` is delta-only. Unknown bindings are an invariant
    /// violation.
    pub fn is_delta(&self, binding: usize) -> MaterializeResult<bool> {
        self.delta_updates.get(binding).copied().ok_or_else(|| {
            materialize_error!(
                ErrorKind::InvariantViolation,
                "Request references an unknown binding",
                binding
            )
        })
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[TransactorState],
    ) -> MaterializeResult<()> {
        if !allowed.contains(&self.state) {
            bail!(
                ErrorKind::InvariantViolation,
                "Transaction call is out of order",
                format!("{operation} called while {}", self.state)
            );
        }

        Ok(())
    }

    fn adapter(&mut self) -> MaterializeResult<&mut A> {
        self.adapter.as_mut().ok_or_else(|| {
            materialize_error!(ErrorKind::InvalidState, "Transactor was destroyed")
        })
    }

    /// Loads stored documents for `keys`. Keys of delta bindings are dropped, and the
    /// adapter is not called when no key remains.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        self.expect_state("load", &[TransactorState::Idle, TransactorState::Loading])?;
        self.state = TransactorState::Loading;

        let mut filtered = Vec::with_capacity(keys.len());
        for request in keys {
            if !self.is_delta(request.binding)? {
                filtered.push(request);
            }
        }
        if filtered.is_empty() {
            return Ok(Vec::new());
        }

        self.adapter()?.load(filtered).await
    }

    /// Opens the transaction that commits `checkpoint`.
    #[instrument(skip_all)]
    pub fn prepare(&mut self, checkpoint: &Checkpoint) -> MaterializeResult<()> {
        self.expect_state("prepare", &[TransactorState::Idle, TransactorState::Loading])?;
        if self.pending_ack {
            bail!(
                ErrorKind::InvariantViolation,
                "Prepare called before the previous commit was acknowledged"
            );
        }

        self.adapter()?.prepare(checkpoint)?;
        self.state = TransactorState::Prepared;

        debug!(checkpoint_bytes = checkpoint.as_bytes().len(), "prepared transaction");

        Ok(())
    }

    /// Buffers `rows`. Rows of delta bindings must not claim to exist.
    pub fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        self.expect_state("store", &[TransactorState::Prepared, TransactorState::Storing])?;

        for row in &rows {
            if self.is_delta(row.binding)? && row.exists {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Stored row of a delta binding claims to exist",
                    row.binding
                );
            }
        }

        self.state = TransactorState::Storing;
        self.adapter()?.store(rows)
    }

    /// Commits the prepared transaction. On failure the transactor stays in
    /// `Committing` and only `destroy` is accepted.
    #[instrument(skip_all)]
    pub async fn commit(&mut self) -> MaterializeResult<()> {
        self.expect_state("commit", &[TransactorState::Prepared, TransactorState::Storing])?;
        self.state = TransactorState::Committing;

        let shutdown_rx = self.shutdown_rx.clone();
        if let Err(err) = self.adapter()?.commit(shutdown_rx).await {
            warn!(error = %err, "transaction commit failed");
            return Err(err);
        }

        self.state = TransactorState::Idle;
        self.pending_ack = true;

        info!("committed transaction");

        Ok(())
    }

    /// Acknowledges that the last commit is durable upstream.
    pub async fn acknowledge(&mut self) -> MaterializeResult<()> {
        if !self.pending_ack {
            bail!(
                ErrorKind::InvariantViolation,
                "Acknowledge called without a committed transaction",
                self.state
            );
        }
        self.expect_state("acknowledge", &[TransactorState::Idle, TransactorState::Loading])?;

        self.adapter()?.acknowledge().await?;
        self.pending_ack = false;

        Ok(())
    }

    /// Releases the adapter. Valid in every state; further calls fail.
    pub async fn destroy(&mut self) {
        self.state = TransactorState::Destroyed;
        if let Some(adapter) = self.adapter.take() {
            adapter.destroy().await;
            info!("destroyed transactor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::destination::memory::MemoryAdapter;
    use crate::test_utils::{elasticsearch_endpoint, orders_binding};
    use crate::types::{Key, KeyValue};
    use serde_json::json;

    fn key(k1: i64) -> Key {
        Key::new(vec![KeyValue::Integer(k1), KeyValue::Bool(true)])
    }

    fn bindings() -> Vec<Binding> {
        let endpoint = elasticsearch_endpoint();
        vec![
            orders_binding(&endpoint, 0, json!({"index": "orders"})),
            orders_binding(&endpoint, 1, json!({"index": "events", "delta_updates": true})),
        ]
    }

    fn transactor() -> (Transactor<MemoryAdapter>, MemoryAdapter) {
        let adapter = MemoryAdapter::new();
        let (_tx, rx) = create_shutdown_channel();
        (Transactor::new(adapter.clone(), &bindings(), rx), adapter)
    }

    fn row(binding: usize, k1: i64, exists: bool) -> StoreRequest {
        StoreRequest {
            binding,
            key: key(k1),
            values: Vec::new(),
            document: json!({"k1": k1, "k2": true}),
            exists,
        }
    }

    #[tokio::test]
    async fn full_transaction_cycle() {
        let (mut transactor, adapter) = transactor();

        let loaded = transactor
            .load(vec![LoadRequest {
                binding: 0,
                key: key(1),
            }])
            .await
            .unwrap();
        assert!(loaded.is_empty());
        assert_eq!(transactor.state(), TransactorState::Loading);

        transactor.prepare(&Checkpoint::from(b"C1".to_vec())).unwrap();
        assert_eq!(transactor.state(), TransactorState::Prepared);

        transactor.store(vec![row(0, 1, false)]).unwrap();
        assert_eq!(transactor.state(), TransactorState::Storing);

        transactor.commit().await.unwrap();
        assert_eq!(transactor.state(), TransactorState::Idle);
        assert_eq!(adapter.checkpoint(), Some(Checkpoint::from(b"C1".to_vec())));

        transactor.acknowledge().await.unwrap();
        assert_eq!(adapter.acknowledgements(), 1);

        let loaded = transactor
            .load(vec![LoadRequest {
                binding: 0,
                key: key(1),
            }])
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn prepare_without_load_and_commit_without_store() {
        let (mut transactor, adapter) = transactor();

        transactor.prepare(&Checkpoint::from(b"C1".to_vec())).unwrap();
        transactor.commit().await.unwrap();

        assert_eq!(adapter.commits(), 1);
        assert_eq!(adapter.document_count(), 0);
    }

    #[tokio::test]
    async fn delta_keys_are_never_loaded() {
        let (mut transactor, adapter) = transactor();

        let loaded = transactor
            .load(vec![LoadRequest {
                binding: 1,
                key: key(1),
            }])
            .await
            .unwrap();

        assert!(loaded.is_empty());
        assert!(adapter.loads().is_empty());
    }

    #[tokio::test]
    async fn out_of_order_calls_are_invariant_violations() {
        let (mut transactor, _adapter) = transactor();

        let err = transactor.store(vec![row(0, 1, false)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let err = transactor.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let err = transactor.acknowledge().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        transactor.prepare(&Checkpoint::default()).unwrap();
        let err = transactor.load(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let err = transactor.prepare(&Checkpoint::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn prepare_requires_acknowledged_commit() {
        let (mut transactor, _adapter) = transactor();

        transactor.prepare(&Checkpoint::default()).unwrap();
        transactor.commit().await.unwrap();

        let err = transactor.prepare(&Checkpoint::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        transactor.acknowledge().await.unwrap();
        transactor.prepare(&Checkpoint::default()).unwrap();
    }

    #[tokio::test]
    async fn unknown_bindings_and_existing_delta_rows_are_rejected() {
        let (mut transactor, _adapter) = transactor();

        let err = transactor
            .load(vec![LoadRequest {
                binding: 7,
                key: key(1),
            }])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        transactor.prepare(&Checkpoint::default()).unwrap();
        let err = transactor.store(vec![row(1, 1, true)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn failed_commit_leaves_transactor_committing() {
        let (mut transactor, adapter) = transactor();
        adapter.fail_next_commit(ErrorKind::FenceTakeover);

        transactor.prepare(&Checkpoint::default()).unwrap();
        transactor.store(vec![row(0, 1, false)]).unwrap();
        let err = transactor.commit().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FenceTakeover);
        assert_eq!(transactor.state(), TransactorState::Committing);
        assert_eq!(adapter.document_count(), 0);

        let err = transactor.prepare(&Checkpoint::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn destroy_is_terminal() {
        let (mut transactor, _adapter) = transactor();
        transactor.prepare(&Checkpoint::default()).unwrap();

        transactor.destroy().await;
        assert_eq!(transactor.state(), TransactorState::Destroyed);

        let err = transactor.load(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }
}
