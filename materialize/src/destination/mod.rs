//! Destinations a materialization writes to.
//!
//! Every destination implements [`Adapter`], the per-transaction capability set the
//! [`crate::transactor::Transactor`] drives. [`Destination`] is the closed set of
//! supported destinations, dispatching to the concrete adapter of its endpoint.

use async_trait::async_trait;
use materialize_config::shared::{DEFAULT_LOAD_BATCH_SIZE, EndpointConfig};
use tracing::info;

use crate::binding::Binding;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::MaterializeResult;
use crate::types::{Checkpoint, LoadRequest, Loaded, StoreRequest};

pub mod elasticsearch;
pub mod memory;
pub mod postgres;
pub mod webhook;

use elasticsearch::ElasticsearchAdapter;
use postgres::PostgresAdapter;
use webhook::WebhookAdapter;

/// Transaction capabilities of a destination.
///
/// Calls follow the transaction protocol: any number of `load`s, one `prepare`,
/// any number of `store`s, then `commit`. `acknowledge` follows a commit once it is
/// durable upstream. Ordering is enforced by the transactor, not by adapters.
#[async_trait]
pub trait Adapter: Send {
    /// Returns the stored documents of the requested keys that exist.
    async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>>;

    /// Starts a transaction closing at `checkpoint`. Fails if a previous
    /// transaction left buffered work.
    fn prepare(&mut self, checkpoint: &Checkpoint) -> MaterializeResult<()>;

    /// Buffers rows. Performs no I/O.
    fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()>;

    /// Makes the buffered rows durable together with the prepared checkpoint.
    async fn commit(&mut self, shutdown_rx: ShutdownRx) -> MaterializeResult<()>;

    async fn acknowledge(&mut self) -> MaterializeResult<()> {
        Ok(())
    }

    /// Releases connections and clients.
    async fn destroy(self);
}

/// Session parameters shared by every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub materialization: String,
    pub key_begin: u32,
    pub key_end: u32,
    pub load_batch_size: usize,
}

impl OpenOptions {
    pub fn new(materialization: impl Into<String>) -> OpenOptions {
        OpenOptions {
            materialization: materialization.into(),
            key_begin: 0,
            key_end: u32::MAX,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }
}

/// A destination of one of the supported kinds.
pub enum Destination {
    Postgres(PostgresAdapter),
    Elasticsearch(ElasticsearchAdapter),
    Webhook(WebhookAdapter),
}

impl Destination {
    /// Opens the destination of `endpoint` for `bindings`.
    ///
    /// Returns the checkpoint stored by the destination, if it stores one.
    pub async fn open(
        endpoint: &EndpointConfig,
        bindings: &[Binding],
        options: &OpenOptions,
    ) -> MaterializeResult<(Destination, Option<Checkpoint>)> {
        let opened = match endpoint {
            EndpointConfig::Postgres(config) => {
                let (adapter, checkpoint) =
                    PostgresAdapter::open(config, bindings, options).await?;
                (Destination::Postgres(adapter), Some(checkpoint))
            }
            EndpointConfig::Elasticsearch(config) => (
                Destination::Elasticsearch(ElasticsearchAdapter::open(config, bindings, options)?),
                None,
            ),
            EndpointConfig::Webhook(_) => (Destination::Webhook(WebhookAdapter::open(bindings)?), None),
        };

        info!(
            destination = opened.0.kind(),
            bindings = bindings.len(),
            materialization = %options.materialization,
            "opened destination"
        );

        Ok(opened)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Postgres(_) => "postgres",
            Destination::Elasticsearch(_) => "elasticsearch",
            Destination::Webhook(_) => "webhook",
        }
    }
}

/// Creates or updates the destination resources of `bindings`, returning a
/// description of what was done.
pub async fn apply(endpoint: &EndpointConfig, bindings: &[Binding]) -> MaterializeResult<String> {
    let description = match endpoint {
        EndpointConfig::Postgres(config) => postgres::apply(config, bindings).await?,
        EndpointConfig::Elasticsearch(config) => elasticsearch::apply(config, bindings).await?,
        EndpointConfig::Webhook(_) => String::new(),
    };

    Ok(description)
}

#[async_trait]
impl Adapter for Destination {
    async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        match self {
            Destination::Postgres(adapter) => adapter.load(keys).await,
            Destination::Elasticsearch(adapter) => adapter.load(keys).await,
            Destination::Webhook(adapter) => adapter.load(keys).await,
        }
    }

    fn prepare(&mut self, checkpoint: &Checkpoint) -> MaterializeResult<()> {
        match self {
            Destination::Postgres(adapter) => adapter.prepare(checkpoint),
            Destination::Elasticsearch(adapter) => adapter.prepare(checkpoint),
            Destination::Webhook(adapter) => adapter.prepare(checkpoint),
        }
    }

    fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        match self {
            Destination::Postgres(adapter) => adapter.store(rows),
            Destination::Elasticsearch(adapter) => adapter.store(rows),
            Destination::Webhook(adapter) => adapter.store(rows),
        }
    }

    async fn commit(&mut self, shutdown_rx: ShutdownRx) -> MaterializeResult<()> {
        match self {
            Destination::Postgres(adapter) => adapter.commit(shutdown_rx).await,
            Destination::Elasticsearch(adapter) => adapter.commit(shutdown_rx).await,
            Destination::Webhook(adapter) => adapter.commit(shutdown_rx).await,
        }
    }

    async fn destroy(self) {
        match self {
            Destination::Postgres(adapter) => adapter.destroy().await,
            Destination::Elasticsearch(adapter) => adapter.destroy().await,
            Destination::Webhook(adapter) => adapter.destroy().await,
        }
    }
}
