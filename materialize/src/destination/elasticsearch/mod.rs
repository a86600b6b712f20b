//! Search-index adapter over the Elasticsearch HTTP API.

mod client;
pub mod schema;

use materialize_config::shared::{ElasticsearchEndpointConfig, FieldOverride};
use tracing::{debug, info};

use crate::binding::{Binding, Resource};
use crate::codec;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::OpenOptions;
use crate::error::{ErrorKind, MaterializeResult};
use crate::types::{Checkpoint, LoadRequest, Loaded, StoreRequest};
use crate::{bail, materialize_error};

pub use client::*;

fn index_of(binding: &Binding) -> MaterializeResult<&str> {
    match &binding.resource {
        Resource::Index { index, .. } => Ok(index),
        _ => Err(materialize_error!(
            ErrorKind::InvalidResourceConfig,
            "Binding does not target an index",
            binding.target()
        )),
    }
}

/// Creates the index of every binding with the mapping derived from its schema.
pub async fn apply(
    config: &ElasticsearchEndpointConfig,
    bindings: &[Binding],
) -> MaterializeResult<String> {
    let client = ElasticsearchClient::new(config.endpoint_url()?);

    let mut indices = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let field_overrides: &[FieldOverride] = match &binding.resource {
            Resource::Index {
                field_overrides, ..
            } => field_overrides.as_slice(),
            _ => &[],
        };
        let index = index_of(binding)?;
        let mapping = schema::build_mapping(&binding.schema, field_overrides).map_err(|err| {
            materialize_error!(
                ErrorKind::InvalidResourceConfig,
                "Collection schema has no index mapping",
                err
            )
        })?;

        let created = client.create_index(index, &mapping).await?;
        debug!(index, created, "applied index");
        indices.push(index.to_owned());
    }

    info!(indices = indices.len(), "applied search materialization");

    Ok(format!("created indices: {}", indices.join(",")))
}

struct IndexBinding {
    index: String,
    delta_updates: bool,
    /// Document ids waiting to be loaded.
    loading: Vec<String>,
}

pub struct ElasticsearchAdapter {
    client: ElasticsearchClient,
    bindings: Vec<IndexBinding>,
    items: Vec<BulkItem>,
    load_batch_size: usize,
}

impl ElasticsearchAdapter {
    pub fn open(
        config: &ElasticsearchEndpointConfig,
        bindings: &[Binding],
        options: &OpenOptions,
    ) -> MaterializeResult<ElasticsearchAdapter> {
        let client = ElasticsearchClient::new(config.endpoint_url()?);

        let bindings = bindings
            .iter()
            .map(|binding| {
                Ok(IndexBinding {
                    index: index_of(binding)?.to_owned(),
                    delta_updates: binding.delta_updates,
                    loading: Vec::with_capacity(options.load_batch_size),
                })
            })
            .collect::<MaterializeResult<Vec<_>>>()?;

        Ok(ElasticsearchAdapter {
            client,
            bindings,
            items: Vec::new(),
            load_batch_size: options.load_batch_size.max(1),
        })
    }

    async fn flush_loading(
        client: &ElasticsearchClient,
        binding: usize,
        index: &mut IndexBinding,
        loaded: &mut Vec<Loaded>,
    ) -> MaterializeResult<()> {
        if index.loading.is_empty() {
            return Ok(());
        }

        let documents = client.multi_get(&index.index, &index.loading).await?;
        debug!(
            index = %index.index,
            requested = index.loading.len(),
            found = documents.len(),
            "loaded documents by id"
        );
        index.loading.clear();

        loaded.extend(
            documents
                .into_iter()
                .map(|document| Loaded { binding, document }),
        );

        Ok(())
    }

    /// Fetches documents by id in batches per binding. Delta bindings are skipped.
    pub async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        let mut loaded = Vec::new();

        for request in keys {
            let Some(index) = self.bindings.get_mut(request.binding) else {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Load references an unknown binding",
                    request.binding
                );
            };
            if index.delta_updates {
                continue;
            }

            index.loading.push(codec::encode(&request.key));
            if index.loading.len() >= self.load_batch_size {
                Self::flush_loading(&self.client, request.binding, index, &mut loaded).await?;
            }
        }

        for (binding, index) in self.bindings.iter_mut().enumerate() {
            Self::flush_loading(&self.client, binding, index, &mut loaded).await?;
        }

        Ok(loaded)
    }

    pub fn prepare(&mut self, _checkpoint: &Checkpoint) -> MaterializeResult<()> {
        if !self.items.is_empty() {
            bail!(
                ErrorKind::InvariantViolation,
                "Prepare found bulk items left from a previous transaction",
                self.items.len()
            );
        }

        Ok(())
    }

    /// Queues an `index` action per row. Nothing is sent until commit.
    pub fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        for row in rows {
            let Some(index) = self.bindings.get(row.binding) else {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Store references an unknown binding",
                    row.binding
                );
            };

            self.items.push(BulkItem {
                index: index.index.clone(),
                id: codec::encode(&row.key),
                document: row.document,
            });
        }

        Ok(())
    }

    /// Refreshes every index, then submits the queued items as one bulk request.
    ///
    /// The queue is cleared whether or not the request succeeds.
    pub async fn commit(&mut self, mut shutdown_rx: ShutdownRx) -> MaterializeResult<()> {
        let items = std::mem::take(&mut self.items);

        let flush = async {
            for binding in &self.bindings {
                self.client.refresh(&binding.index).await?;
            }
            self.client.bulk(&items).await
        };

        tokio::select! {
            result = flush => result?,
            _ = shutdown_rx.wait() => {
                bail!(ErrorKind::Canceled, "Commit was canceled by shutdown");
            }
        }

        debug!(items = items.len(), "committed search transaction");

        Ok(())
    }

    pub async fn destroy(self) {
        debug!(bindings = self.bindings.len(), "closing search adapter");
    }
}
