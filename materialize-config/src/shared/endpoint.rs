use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_postgres::Config as TokioPgConnectOptions;
use url::Url;

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Port used when a Postgres endpoint omits one.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Connection target of a relational (Postgres) materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PostgresEndpointConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
    pub password: SerializableSecretString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl PostgresEndpointConfig {
    /// Checks that `host`, `user` and `password` are present, in that order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::MissingProperty("host"));
        }
        if self.user.is_empty() {
            return Err(ValidationError::MissingProperty("user"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::MissingProperty("password"));
        }

        Ok(())
    }

    /// Builds `tokio_postgres` connect options for this endpoint.
    pub fn connect_options(&self) -> TokioPgConnectOptions {
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port.unwrap_or(DEFAULT_POSTGRES_PORT))
            .user(&self.user)
            .password(self.password.expose_secret());

        if let Some(database) = &self.database {
            config.dbname(database);
        }

        config
    }
}

/// Connection target of a search-index materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ElasticsearchEndpointConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub endpoint: String,
}

impl ElasticsearchEndpointConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.endpoint_url().map(|_| ())
    }

    pub fn endpoint_url(&self) -> Result<Url, ValidationError> {
        if self.endpoint.is_empty() {
            return Err(ValidationError::MissingProperty("endpoint"));
        }

        Url::parse(&self.endpoint).map_err(|e| ValidationError::InvalidUrl {
            property: "endpoint",
            reason: e.to_string(),
        })
    }
}

/// Target of an HTTP webhook materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookEndpointConfig {
    /// Base address that binding paths are joined onto.
    pub address: String,
}

impl WebhookEndpointConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.address_url().map(|_| ())
    }

    pub fn address_url(&self) -> Result<Url, ValidationError> {
        if self.address.is_empty() {
            return Err(ValidationError::MissingProperty("address"));
        }

        Url::parse(&self.address).map_err(|e| ValidationError::InvalidUrl {
            property: "address",
            reason: e.to_string(),
        })
    }
}

/// Endpoint of a materialization, one variant per destination kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointConfig {
    Postgres(PostgresEndpointConfig),
    Elasticsearch(ElasticsearchEndpointConfig),
    Webhook(WebhookEndpointConfig),
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EndpointConfig::Postgres(config) => config.validate(),
            EndpointConfig::Elasticsearch(config) => config.validate(),
            EndpointConfig::Webhook(config) => config.validate(),
        }
    }

    /// Short name of the destination kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointConfig::Postgres(_) => "postgres",
            EndpointConfig::Elasticsearch(_) => "elasticsearch",
            EndpointConfig::Webhook(_) => "webhook",
        }
    }
}
