//! Drives a destination through transactions read from a change stream.
//!
//! Documents are buffered until a [`ChangeEvent::Commit`] closes the transaction.
//! Each transaction then runs the full protocol: load the current version of every
//! non-delta key, prepare the checkpoint, store every document with whether it
//! already existed, commit and acknowledge.

use std::collections::{HashMap, HashSet};

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::binding::Binding;
use crate::codec;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::destination::{Adapter, Destination};
use crate::error::{ErrorKind, MaterializeResult};
use crate::materialize_error;
use crate::transactor::Transactor;
use crate::types::{ChangeEvent, Checkpoint, Key, LoadRequest, StoreRequest};

/// Counters of a pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub transactions: usize,
    pub documents: usize,
}

#[derive(Debug)]
struct BufferedDocument {
    binding: usize,
    key: Key,
    values: Vec<serde_json::Value>,
    document: serde_json::Value,
}

/// Documents of the open transaction, combined last-write-wins per key.
#[derive(Debug, Default)]
struct TransactionBuffer {
    documents: Vec<BufferedDocument>,
    positions: HashMap<(usize, String), usize>,
}

impl TransactionBuffer {
    fn push(&mut self, document: BufferedDocument) {
        let id = (document.binding, codec::encode(&document.key));
        match self.positions.get(&id) {
            Some(&position) => self.documents[position] = document,
            None => {
                self.positions.insert(id, self.documents.len());
                self.documents.push(document);
            }
        }
    }

    fn take(&mut self) -> Vec<BufferedDocument> {
        self.positions.clear();
        std::mem::take(&mut self.documents)
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

pub struct MaterializationPipeline<A: Adapter = Destination> {
    bindings: Vec<Binding>,
    transactor: Transactor<A>,
    buffer: TransactionBuffer,
    shutdown_tx: ShutdownTx,
    stats: PipelineStats,
}

impl<A: Adapter> MaterializationPipeline<A> {
    pub fn new(adapter: A, bindings: Vec<Binding>) -> Self {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let transactor = Transactor::new(adapter, &bindings, shutdown_rx);

        Self {
            bindings,
            transactor,
            buffer: TransactionBuffer::default(),
            shutdown_tx,
            stats: PipelineStats::default(),
        }
    }

    /// Returns a handle that stops the pipeline and cancels an in-flight commit.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Consumes `events` until the stream ends, fails or shutdown is signalled, then
    /// destroys the transactor.
    ///
    /// Documents not followed by a commit are dropped.
    pub async fn run<S>(mut self, events: S) -> MaterializeResult<PipelineStats>
    where
        S: Stream<Item = MaterializeResult<ChangeEvent>>,
    {
        let result = self.process(events).await;

        let uncommitted = self.buffer.len();
        if uncommitted > 0 {
            warn!(uncommitted, "dropping documents of an uncommitted transaction");
        }
        self.transactor.destroy().await;

        let stats = result.inspect_err(|err| {
            error!(
                error = %err,
                fatal = err.is_fatal(),
                "materialization pipeline failed"
            );
        })?;
        info!(
            transactions = stats.transactions,
            documents = stats.documents,
            "materialization pipeline finished"
        );

        Ok(stats)
    }

    async fn process<S>(&mut self, events: S) -> MaterializeResult<PipelineStats>
    where
        S: Stream<Item = MaterializeResult<ChangeEvent>>,
    {
        let mut events = std::pin::pin!(events);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown_rx.wait() => {
                    info!("shutdown signalled, stopping materialization pipeline");
                    break;
                }
                event = events.next() => event,
            };

            match event {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(ChangeEvent::Document {
                    binding,
                    key,
                    values,
                    document,
                })) => {
                    if binding >= self.bindings.len() {
                        return Err(materialize_error!(
                            ErrorKind::InvariantViolation,
                            "Change references an unknown binding",
                            binding
                        ));
                    }
                    self.buffer.push(BufferedDocument {
                        binding,
                        key,
                        values,
                        document,
                    });
                }
                Some(Ok(ChangeEvent::Commit { checkpoint })) => {
                    self.run_transaction(checkpoint).await?;
                }
            }
        }

        Ok(self.stats)
    }

    async fn run_transaction(&mut self, checkpoint: Checkpoint) -> MaterializeResult<()> {
        let documents = self.buffer.take();

        let mut requests = Vec::new();
        for document in &documents {
            if !self.transactor.is_delta(document.binding)? {
                requests.push(LoadRequest {
                    binding: document.binding,
                    key: document.key.clone(),
                });
            }
        }

        // Loaded documents carry no key, so it is extracted again from each of them.
        let mut existing = HashSet::new();
        for loaded in self.transactor.load(requests).await? {
            let binding = self.bindings.get(loaded.binding).ok_or_else(|| {
                materialize_error!(
                    ErrorKind::InvariantViolation,
                    "Destination loaded a document of an unknown binding",
                    loaded.binding
                )
            })?;
            let key = Key::from_document(&loaded.document, binding.key_pointers())?;
            existing.insert((loaded.binding, codec::encode(&key)));
        }

        self.transactor.prepare(&checkpoint)?;

        let rows = documents
            .into_iter()
            .map(|document| {
                let exists = existing.contains(&(document.binding, codec::encode(&document.key)));
                StoreRequest {
                    binding: document.binding,
                    key: document.key,
                    values: document.values,
                    document: document.document,
                    exists,
                }
            })
            .collect::<Vec<_>>();
        let stored = rows.len();

        self.transactor.store(rows)?;
        self.transactor.commit().await?;
        self.transactor.acknowledge().await?;

        self.stats.transactions += 1;
        self.stats.documents += stored;

        debug!(
            documents = stored,
            existing = existing.len(),
            "materialized transaction"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::MemoryAdapter;
    use crate::test_utils::{elasticsearch_endpoint, orders_binding};
    use crate::types::KeyValue;
    use serde_json::json;

    fn bindings() -> Vec<Binding> {
        let endpoint = elasticsearch_endpoint();
        vec![
            orders_binding(&endpoint, 0, json!({"index": "orders"})),
            orders_binding(&endpoint, 1, json!({"index": "events", "delta_updates": true})),
        ]
    }

    fn document(binding: &Binding, k1: i64, label: &str) -> MaterializeResult<ChangeEvent> {
        ChangeEvent::from_document(binding, json!({"k1": k1, "k2": true, "string": label}))
    }

    fn commit(checkpoint: &'static [u8]) -> MaterializeResult<ChangeEvent> {
        Ok(ChangeEvent::Commit {
            checkpoint: Checkpoint::from(checkpoint),
        })
    }

    fn key(k1: i64) -> Key {
        Key::new(vec![KeyValue::Integer(k1), KeyValue::Bool(true)])
    }

    #[tokio::test]
    async fn transactions_set_exists_from_loaded_documents() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());

        let events = vec![
            document(&bindings[0], 1, "a"),
            document(&bindings[0], 2, "b"),
            commit(b"C1"),
            document(&bindings[0], 1, "c"),
            document(&bindings[0], 3, "d"),
            commit(b"C2"),
        ];
        let stats = pipeline.run(futures::stream::iter(events)).await.unwrap();

        assert_eq!(
            stats,
            PipelineStats {
                transactions: 2,
                documents: 4
            }
        );
        assert_eq!(adapter.checkpoint(), Some(Checkpoint::from(&b"C2"[..])));
        assert_eq!(adapter.acknowledgements(), 2);

        let exists: Vec<_> = adapter.stores().iter().map(|row| row.exists).collect();
        assert_eq!(exists, vec![false, false, true, false]);
        assert_eq!(
            adapter.document(0, &key(1)).unwrap()["string"],
            json!("c")
        );
    }

    #[tokio::test]
    async fn documents_for_the_same_key_are_combined() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());

        let events = vec![
            document(&bindings[0], 1, "first"),
            document(&bindings[0], 2, "other"),
            document(&bindings[0], 1, "last"),
            commit(b"C1"),
        ];
        pipeline.run(futures::stream::iter(events)).await.unwrap();

        let stores = adapter.stores();
        assert_eq!(stores.len(), 2);
        assert_eq!(stores[0].document["string"], json!("last"));
        assert_eq!(stores[0].values.len(), bindings[0].values.len());
    }

    #[tokio::test]
    async fn delta_bindings_skip_load() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());

        let events = vec![
            document(&bindings[1], 1, "a"),
            commit(b"C1"),
            document(&bindings[1], 1, "b"),
            commit(b"C2"),
        ];
        pipeline.run(futures::stream::iter(events)).await.unwrap();

        assert!(adapter.loads().is_empty());
        assert!(adapter.stores().iter().all(|row| !row.exists));
    }

    #[tokio::test]
    async fn uncommitted_documents_are_dropped() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());

        let events = vec![document(&bindings[0], 1, "a")];
        let stats = pipeline.run(futures::stream::iter(events)).await.unwrap();

        assert_eq!(stats, PipelineStats::default());
        assert_eq!(adapter.commits(), 0);
        assert!(adapter.stores().is_empty());
    }

    #[tokio::test]
    async fn stream_errors_and_failed_commits_stop_the_pipeline() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());

        let events = vec![
            document(&bindings[0], 1, "a"),
            Err(materialize_error!(ErrorKind::DeserializationError, "bad line")),
            commit(b"C1"),
        ];
        let err = pipeline.run(futures::stream::iter(events)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert_eq!(adapter.commits(), 0);

        let adapter = MemoryAdapter::new();
        adapter.fail_next_commit(ErrorKind::FenceTakeover);
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());
        let events = vec![document(&bindings[0], 1, "a"), commit(b"C1"), commit(b"C2")];
        let err = pipeline.run(futures::stream::iter(events)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FenceTakeover);
        assert_eq!(adapter.checkpoint(), None);
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_event() {
        let bindings = bindings();
        let adapter = MemoryAdapter::new();
        let pipeline = MaterializationPipeline::new(adapter.clone(), bindings.clone());
        pipeline.shutdown_tx().shutdown();

        let events = vec![document(&bindings[0], 1, "a"), commit(b"C1")];
        let stats = pipeline.run(futures::stream::iter(events)).await.unwrap();

        assert_eq!(stats.transactions, 0);
        assert_eq!(adapter.commits(), 0);
    }
}
