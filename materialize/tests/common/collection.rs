use materialize::binding::{Binding, validate};
use materialize::types::{Key, KeyValue, StoreRequest};
use materialize_config::shared::{
    BindingConfig, CollectionSpec, ElasticsearchEndpointConfig, EndpointConfig,
    WebhookEndpointConfig,
};
use serde_json::{Value, json};

/// The `acme/orders` collection keyed by `(k1 integer, k2 boolean)`, with one
/// nullable value of each scalar type.
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
    .unwrap()
}

/// Validates and builds the orders binding at `index` for `endpoint`.
pub fn orders_binding(endpoint: &EndpointConfig, index: usize, resource: Value) -> Binding {
    let config = BindingConfig {
        resource,
        collection: orders_collection(),
        values: None,
    };
    let validated = validate(endpoint, &config).unwrap();

    Binding::build(index, &config, validated).unwrap()
}

pub fn elasticsearch_endpoint(uri: &str) -> EndpointConfig {
    EndpointConfig::Elasticsearch(ElasticsearchEndpointConfig {
        endpoint: uri.to_owned(),
    })
}

pub fn webhook_endpoint(address: &str) -> EndpointConfig {
    EndpointConfig::Webhook(WebhookEndpointConfig {
        address: address.to_owned(),
    })
}

pub fn order_key(k1: i64, k2: bool) -> Key {
    Key::new(vec![KeyValue::Integer(k1), KeyValue::Bool(k2)])
}

pub fn order_document(k1: i64, k2: bool, number: f64, string: &str) -> Value {
    json!({
        "k1": k1,
        "k2": k2,
        "boolean": !k2,
        "integer": k1 * 10,
        "number": number,
        "string": string
    })
}

/// Builds a store of an order on `binding`, projecting its values.
pub fn order_store(binding: &Binding, document: Value, exists: bool) -> StoreRequest {
    let key = Key::from_document(&document, binding.key_pointers()).unwrap();
    let values = binding.extract_values(&document);

    StoreRequest {
        binding: binding.index,
        key,
        values,
        document,
        exists,
    }
}
