//! Fixtures shared by unit tests.

use materialize_config::shared::{
    BindingConfig, CollectionSpec, ElasticsearchEndpointConfig, EndpointConfig,
    PostgresEndpointConfig, WebhookEndpointConfig,
};
use serde_json::json;

use crate::binding::{Binding, validate};

/// The `acme/orders` collection: a composite `(k1 integer, k2 boolean)` key, one
/// value of each scalar type and the root document.
pub fn orders_collection() -> CollectionSpec {
    serde_json::from_value(json!({
        "name": "acme/orders",
        "key": ["/k1", "/k2"],
        "projections": [
            {"field": "k1", "ptr": "/k1", "types": ["integer"], "is_primary_key": true},
            {"field": "k2", "ptr": "/k2", "types": ["boolean"], "is_primary_key": true},
            {"field": "boolean", "ptr": "/boolean", "types": ["boolean", "null"]},
            {"field": "integer", "ptr": "/integer", "types": ["integer", "null"]},
            {"field": "number", "ptr": "/number", "types": ["number", "null"]},
            {"field": "string", "ptr": "/string", "types": ["string", "null"]},
            {"field": "flow_document", "ptr": "", "types": ["object"]}
        ],
        "schema": {
            "type": "object",
            "properties": {
                "k1": {"type": "integer"},
                "k2": {"type": "boolean"},
                "boolean": {"type": ["boolean", "null"]},
                "integer": {"type": ["integer", "null"]},
                "number": {"type": ["number", "null"]},
                "string": {"type": ["string", "null"]}
            },
            "required": ["k1", "k2"]
        }
    }))
    .expect("orders collection fixture is valid")
}

pub fn orders_binding_config(resource: serde_json::Value) -> BindingConfig {
    BindingConfig {
        resource,
        collection: orders_collection(),
        values: None,
    }
}

pub fn postgres_endpoint() -> EndpointConfig {
    EndpointConfig::Postgres(PostgresEndpointConfig {
        host: "localhost".to_owned(),
        port: Some(5430),
        user: "postgres".to_owned(),
        password: "postgres".into(),
        database: None,
    })
}

pub fn elasticsearch_endpoint() -> EndpointConfig {
    EndpointConfig::Elasticsearch(ElasticsearchEndpointConfig {
        endpoint: "http://localhost:9200".to_owned(),
    })
}

pub fn webhook_endpoint(address: &str) -> EndpointConfig {
    EndpointConfig::Webhook(WebhookEndpointConfig {
        address: address.to_owned(),
    })
}

/// Validates and builds the orders binding at `index` against `endpoint`.
pub fn orders_binding(
    endpoint: &EndpointConfig,
    index: usize,
    resource: serde_json::Value,
) -> Binding {
    let config = orders_binding_config(resource);
    let validated = validate(endpoint, &config).expect("orders binding validates");
    Binding::build(index, &config, validated).expect("orders binding builds")
}
