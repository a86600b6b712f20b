use materialize_config::shared::{EndpointConfig, PostgresEndpointConfig};
use tokio::runtime::Handle;
use tokio_postgres::{Client, NoTls};
use tracing::info;
use uuid::Uuid;

/// Port of the local Postgres the tests run against.
const TEST_POSTGRES_PORT: u16 = 5430;

/// Returns the endpoint of a database named `name` on the local test server.
pub fn local_postgres_config(name: Option<String>) -> PostgresEndpointConfig {
    PostgresEndpointConfig {
        host: "localhost".to_owned(),
        port: Some(TEST_POSTGRES_PORT),
        user: "postgres".to_owned(),
        password: "postgres".into(),
        database: name,
    }
}

/// A freshly created Postgres database, dropped with the value.
pub struct PgDatabase {
    pub config: PostgresEndpointConfig,
    pub client: Client,
}

impl PgDatabase {
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::Postgres(self.config.clone())
    }

    /// Returns the `(k1, k2)` keys stored in `table`, ordered.
    pub async fn keys(&self, table: &str) -> Vec<(i64, bool)> {
        let query = format!(
            "select k1, k2 from {} order by k1, k2",
            pg_escape::quote_identifier(table)
        );
        let rows = self.client.query(&query, &[]).await.unwrap();

        rows.iter().map(|row| (row.get(0), row.get(1))).collect()
    }

    /// Returns the stored document of `(k1, k2)` in `table`.
    pub async fn document(&self, table: &str, k1: i64, k2: bool) -> Option<serde_json::Value> {
        let query = format!(
            "select flow_document from {} where k1 = $1 and k2 = $2",
            pg_escape::quote_identifier(table)
        );
        let row = self.client.query_opt(&query, &[&k1, &k2]).await.unwrap();

        row.map(|row| row.get(0))
    }

    /// Returns the fence and checkpoint stored for `materialization`.
    pub async fn fence(&self, materialization: &str) -> Vec<(i64, Vec<u8>)> {
        let rows = self
            .client
            .query(
                "select fence, checkpoint from flow_checkpoints_v1 \
                where materialization = $1 order by key_begin, key_end",
                &[&materialization],
            )
            .await
            .unwrap();

        rows.iter().map(|row| (row.get(0), row.get(1))).collect()
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        // `block_in_place` requires the multi-threaded runtime.
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move { drop_pg_database(&self.config).await });
        });
    }
}

async fn connect(config: &PostgresEndpointConfig) -> Client {
    let (client, connection) = config
        .connect_options()
        .connect(NoTls)
        .await
        .expect("Failed to connect to Postgres");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
}

/// Creates a database with a random name on the local test server.
pub async fn spawn_database() -> PgDatabase {
    let name = Uuid::new_v4().to_string();

    let server = connect(&local_postgres_config(None)).await;
    server
        .execute(&*format!(r#"create database "{name}";"#), &[])
        .await
        .expect("Failed to create database");

    let config = local_postgres_config(Some(name));
    let client = connect(&config).await;

    PgDatabase { config, client }
}

async fn drop_pg_database(config: &PostgresEndpointConfig) {
    let Some(name) = &config.database else {
        return;
    };
    let server = connect(&local_postgres_config(None)).await;

    server
        .execute(
            "select pg_terminate_backend(pid) from pg_stat_activity \
            where datname = $1 and pid <> pg_backend_pid()",
            &[name],
        )
        .await
        .expect("Failed to terminate database connections");

    server
        .execute(&*format!(r#"drop database if exists "{name}""#), &[])
        .await
        .expect("Failed to drop database");
}
