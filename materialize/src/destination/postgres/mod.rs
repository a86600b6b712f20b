//! Relational adapter over the Postgres wire protocol.
//!
//! Load and Store use distinct connections. Loads stage batches of keys in
//! per-binding temporary tables and read documents back through one `UNION ALL`
//! join per batch, while Commit sends every buffered statement plus the fence
//! update in one pipelined transaction.

mod params;
mod sqlgen;

use futures::TryFutureExt;
use futures::future::{try_join, try_join_all};
use materialize_config::shared::PostgresEndpointConfig;
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::{Client, Connection, NoTls, Socket, Statement};
use tracing::{Instrument, debug, error, info, warn};

use crate::binding::{Binding, Resource};
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::OpenOptions;
use crate::error::{ErrorKind, MaterializeError, MaterializeResult};
use crate::fence::{CREATE_FENCE_TABLE, Fence, install_fence};
use crate::types::{Checkpoint, LoadRequest, Loaded, StoreRequest};
use crate::{bail, materialize_error};

pub use params::*;
pub use sqlgen::*;

fn spawn_postgres_connection(connection: Connection<Socket, NoTlsStream>) {
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the Postgres connection: {}", e);
            return;
        }

        info!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task);
}

async fn connect(config: &PostgresEndpointConfig) -> MaterializeResult<Client> {
    let (client, connection) = config.connect_options().connect(NoTls).await?;
    spawn_postgres_connection(connection);

    Ok(client)
}

fn table_of(binding: &Binding) -> MaterializeResult<&str> {
    match &binding.resource {
        Resource::Table { table } => Ok(table),
        _ => Err(materialize_error!(
            ErrorKind::InvalidResourceConfig,
            "Binding does not target a table",
            binding.target()
        )),
    }
}

/// Creates the fence table and the target table of every binding.
///
/// Returns the executed statements.
pub async fn apply(
    config: &PostgresEndpointConfig,
    bindings: &[Binding],
) -> MaterializeResult<String> {
    let client = connect(config).await?;

    let mut statements = vec![CREATE_FENCE_TABLE.trim().to_owned()];
    for binding in bindings {
        statements.push(create_table(table_of(binding)?, binding));
    }

    for statement in &statements {
        client.batch_execute(statement).await?;
    }

    info!(tables = bindings.len(), "applied relational materialization");

    Ok(statements.join("\n\n"))
}

/// Prepared statements and columns of one binding.
struct PostgresBinding {
    binding: Binding,
    load_insert: Statement,
    store_insert: Statement,
    store_update: Statement,
}

/// A statement buffered by Store, executed at Commit.
struct Pending {
    statement: Statement,
    params: Vec<SqlParam>,
}

pub struct PostgresAdapter {
    load_client: Client,
    /// Union of every binding's Load subquery, absent without bindings.
    load_query: Option<Statement>,
    /// Upper bound of keys staged per Load round trip.
    load_batch_size: usize,
    store_client: Client,
    fence: Fence,
    batch: Vec<Pending>,
    bindings: Vec<PostgresBinding>,
}

impl PostgresAdapter {
    /// Connects, installs the fence and prepares the statements of every binding.
    ///
    /// Returns the adapter and the checkpoint the session resumes from.
    pub async fn open(
        config: &PostgresEndpointConfig,
        bindings: &[Binding],
        options: &OpenOptions,
    ) -> MaterializeResult<(PostgresAdapter, Checkpoint)> {
        let load_client = connect(config).await?;
        let mut store_client = connect(config).await?;

        let fence = install_fence(
            &mut store_client,
            &options.materialization,
            options.key_begin,
            options.key_end,
        )
        .await?;

        let mut prepared = Vec::with_capacity(bindings.len());
        let mut queries = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let table = table_of(binding)?;
            let sql = BindingSql::new(table, binding);

            load_client.batch_execute(&sql.create_load_table).await?;

            prepared.push(PostgresBinding {
                binding: binding.clone(),
                load_insert: load_client.prepare(&sql.load_insert).await?,
                store_insert: store_client.prepare(&sql.store_insert).await?,
                store_update: store_client.prepare(&sql.store_update).await?,
            });
            queries.push(sql.load_query);

            debug!(binding = binding.index, table, "prepared relational binding");
        }

        let load_query = if queries.is_empty() {
            None
        } else {
            let union = load_union(queries.iter().map(String::as_str));
            Some(load_client.prepare(&union).await?)
        };

        let checkpoint = fence.checkpoint.clone();
        let adapter = PostgresAdapter {
            load_client,
            load_query,
            load_batch_size: options.load_batch_size.max(1),
            store_client,
            fence,
            batch: Vec::new(),
            bindings: prepared,
        };

        Ok((adapter, checkpoint))
    }

    fn binding(&self, index: usize) -> MaterializeResult<&PostgresBinding> {
        binding_at(&self.bindings, index)
    }

    /// Stages `keys` and returns the stored document of every key found.
    ///
    /// Keys are staged and joined in batches of at most `load_batch_size`.
    pub async fn load(&mut self, keys: Vec<LoadRequest>) -> MaterializeResult<Vec<Loaded>> {
        let Some(load_query) = self.load_query.clone() else {
            return Ok(Vec::new());
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut staged = Vec::with_capacity(keys.len());
        for request in &keys {
            let binding = self.binding(request.binding)?;
            staged.push(Pending {
                statement: binding.load_insert.clone(),
                params: key_params(&binding.binding.keys, &request.key)?,
            });
        }

        let mut loaded = Vec::new();
        for batch in staged.chunks(self.load_batch_size) {
            loaded.extend(self.load_batch(&load_query, batch).await?);
        }

        debug!(keys = keys.len(), loaded = loaded.len(), "loaded documents");

        Ok(loaded)
    }

    async fn load_batch(
        &mut self,
        load_query: &Statement,
        batch: &[Pending],
    ) -> MaterializeResult<Vec<Loaded>> {
        // Committing or rolling back this transaction truncates the staged keys.
        let transaction = self.load_client.transaction().await?;

        try_join_all(
            batch
                .iter()
                .map(|pending| transaction.execute_raw(&pending.statement, pending.params.iter())),
        )
        .await?;

        let rows = transaction.query(load_query, &[]).await?;
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let binding: i32 = row.try_get(0)?;
            let document: serde_json::Value = row.try_get(1)?;
            loaded.push(Loaded {
                binding: usize::try_from(binding).map_err(|_| {
                    materialize_error!(
                        ErrorKind::InvariantViolation,
                        "Load returned a negative binding",
                        binding
                    )
                })?,
                document,
            });
        }

        transaction.commit().await?;

        debug!(keys = batch.len(), loaded = loaded.len(), "loaded batch");

        Ok(loaded)
    }

    /// Binds `checkpoint` into the fence update of the next commit.
    pub fn prepare(&mut self, checkpoint: &Checkpoint) -> MaterializeResult<()> {
        if !self.batch.is_empty() {
            bail!(
                ErrorKind::InvariantViolation,
                "Prepare found statements left from a previous transaction",
                self.batch.len()
            );
        }

        self.fence.set_checkpoint(checkpoint.clone());

        Ok(())
    }

    /// Buffers an update for rows that exist and an insert for the others.
    pub fn store(&mut self, rows: Vec<StoreRequest>) -> MaterializeResult<()> {
        for row in rows {
            let binding = binding_at(&self.bindings, row.binding)?;
            let keys = key_params(&binding.binding.keys, &row.key)?;
            let values = value_params(&binding.binding.values, &row.values)?;
            let document = SqlParam::Json(row.document);

            let pending = if row.exists {
                let mut params = values;
                params.push(document);
                params.extend(keys);
                Pending {
                    statement: binding.store_update.clone(),
                    params,
                }
            } else {
                let mut params = keys;
                params.extend(values);
                params.push(document);
                Pending {
                    statement: binding.store_insert.clone(),
                    params,
                }
            };

            self.batch.push(pending);
        }

        Ok(())
    }

    /// Applies the buffered statements and the fence update in one transaction.
    ///
    /// A fence update matching no row means another session took over the key range:
    /// the transaction is rolled back and [`ErrorKind::FenceTakeover`] returned.
    pub async fn commit(&mut self, mut shutdown_rx: ShutdownRx) -> MaterializeResult<()> {
        let batch = std::mem::take(&mut self.batch);
        let transaction = self.store_client.transaction().await?;

        // The fence update is polled last, so it is the last statement of the pipeline.
        let statements = try_join_all(
            batch
                .iter()
                .map(|pending| transaction.execute_raw(&pending.statement, pending.params.iter())),
        );
        let fence_update = self.fence.update(&transaction);

        let fenced = tokio::select! {
            result = try_join(statements.map_err(MaterializeError::from), fence_update) => {
                let (_, fenced) = result?;
                fenced
            }
            _ = shutdown_rx.wait() => {
                bail!(ErrorKind::Canceled, "Commit was canceled by shutdown");
            }
        };

        if fenced == 0 {
            warn!(
                materialization = %self.fence.materialization,
                fence = self.fence.fence,
                "checkpoint fence was taken over by another session"
            );
            bail!(
                ErrorKind::FenceTakeover,
                "Checkpoint fence was updated by another session",
                format!(
                    "materialization {} fence {}",
                    self.fence.materialization, self.fence.fence
                )
            );
        }

        transaction.commit().await?;

        debug!(statements = batch.len(), "committed relational transaction");

        Ok(())
    }

    pub async fn destroy(self) {
        info!("closing relational connections");
    }
}

fn binding_at(bindings: &[PostgresBinding], index: usize) -> MaterializeResult<&PostgresBinding> {
    bindings.get(index).ok_or_else(|| {
        materialize_error!(
            ErrorKind::InvariantViolation,
            "Request references an unknown binding",
            index
        )
    })
}
