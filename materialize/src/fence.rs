//! Durable checkpoint fence of relational materializations.
//!
//! Every session owns one row of [`FENCE_TABLE`], identified by the materialization
//! name and its key range. Opening a session bumps the fence token of every row
//! whose range overlaps its own, so that older sessions fail their next commit.

use tokio_postgres::{Client, GenericClient};
use tracing::info;

use crate::error::{ErrorKind, MaterializeResult};
use crate::materialize_error;
use crate::types::Checkpoint;

/// Table holding the fence of every materialization session.
pub const FENCE_TABLE: &str = "flow_checkpoints_v1";

/// Creates [`FENCE_TABLE`] when it does not exist.
pub const CREATE_FENCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS flow_checkpoints_v1 (
	materialization TEXT NOT NULL,
	key_begin BIGINT NOT NULL,
	key_end BIGINT NOT NULL,
	fence BIGINT NOT NULL,
	checkpoint BYTEA NOT NULL,

	PRIMARY KEY (materialization, key_begin, key_end)
);"#;

/// Conditional update of a fence row, matching only while the token is unchanged.
pub const UPDATE_FENCE: &str = "UPDATE flow_checkpoints_v1 SET checkpoint = $1 \
     WHERE materialization = $2 AND key_begin = $3 AND key_end = $4 AND fence = $5";

const INCREMENT_OVERLAPPING: &str = "UPDATE flow_checkpoints_v1 SET fence = fence + 1 \
     WHERE materialization = $1 AND key_end >= $2 AND key_begin <= $3";

const SELECT_COVERING: &str = "SELECT key_begin, key_end, fence, checkpoint \
     FROM flow_checkpoints_v1 \
     WHERE materialization = $1 AND key_begin <= $2 AND key_end >= $3 \
     ORDER BY key_end - key_begin ASC LIMIT 1";

const INSERT_FENCE: &str = "INSERT INTO flow_checkpoints_v1 \
     (materialization, key_begin, key_end, fence, checkpoint) VALUES ($1, $2, $3, $4, $5)";

/// A session's claim on its row of [`FENCE_TABLE`].
#[derive(Debug, Clone, PartialEq)]
pub struct Fence {
    pub materialization: String,
    pub key_begin: u32,
    pub key_end: u32,
    /// Token installed by this session.
    pub fence: i64,
    /// Checkpoint written by the next commit.
    pub checkpoint: Checkpoint,
}

impl Fence {
    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = checkpoint;
    }

    /// Runs [`UPDATE_FENCE`] with this fence's token and checkpoint, returning the
    /// number of rows it matched.
    pub async fn update<C: GenericClient>(&self, client: &C) -> MaterializeResult<u64> {
        let key_begin = i64::from(self.key_begin);
        let key_end = i64::from(self.key_end);

        let rows = client
            .execute(
                UPDATE_FENCE,
                &[
                    &self.checkpoint.as_bytes(),
                    &self.materialization,
                    &key_begin,
                    &key_end,
                    &self.fence,
                ],
            )
            .await?;

        Ok(rows)
    }
}

/// Installs the fence of `(materialization, key_begin, key_end)` and returns it.
///
/// Runs in one transaction: overlapping rows get their token incremented, then the
/// narrowest row covering the range is read. An exact match is returned as-is;
/// otherwise a row is inserted inheriting the covering row's token and checkpoint,
/// or token 1 and an empty checkpoint when nothing covers the range.
pub async fn install_fence(
    client: &mut Client,
    materialization: &str,
    key_begin: u32,
    key_end: u32,
) -> MaterializeResult<Fence> {
    if key_begin > key_end {
        return Err(materialize_error!(
            ErrorKind::ConfigError,
            "Key range of the fence is inverted",
            format!("{key_begin:08x} > {key_end:08x}")
        ));
    }

    let begin = i64::from(key_begin);
    let end = i64::from(key_end);

    let transaction = client.transaction().await?;
    transaction
        .execute(INCREMENT_OVERLAPPING, &[&materialization, &begin, &end])
        .await?;

    let covering = transaction
        .query_opt(SELECT_COVERING, &[&materialization, &begin, &end])
        .await?;

    let mut fence = Fence {
        materialization: materialization.to_owned(),
        key_begin,
        key_end,
        fence: 1,
        checkpoint: Checkpoint::default(),
    };

    let exact = match covering {
        Some(row) => {
            let row_begin: i64 = row.try_get("key_begin")?;
            let row_end: i64 = row.try_get("key_end")?;
            let checkpoint: Vec<u8> = row.try_get("checkpoint")?;
            fence.fence = row.try_get("fence")?;
            fence.checkpoint = Checkpoint::from(checkpoint);

            row_begin == begin && row_end == end
        }
        None => false,
    };

    if !exact {
        transaction
            .execute(
                INSERT_FENCE,
                &[
                    &materialization,
                    &begin,
                    &end,
                    &fence.fence,
                    &fence.checkpoint.as_bytes(),
                ],
            )
            .await?;
    }

    transaction.commit().await?;

    info!(
        materialization,
        key_begin = %format!("{key_begin:08x}"),
        key_end = %format!("{key_end:08x}"),
        fence = fence.fence,
        inherited = !exact && !fence.checkpoint.is_empty(),
        "installed checkpoint fence"
    );

    Ok(fence)
}
