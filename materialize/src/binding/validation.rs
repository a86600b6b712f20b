use std::collections::BTreeMap;

use materialize_config::shared::{
    BindingConfig, CollectionSpec, EndpointConfig, IndexResource, JsonType, TableResource,
    WebhookEndpointConfig, WebhookResource,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::binding::Resource;
use crate::destination::elasticsearch::schema::build_mapping;
use crate::error::{ErrorKind, MaterializeError, MaterializeResult};
use crate::{bail, materialize_error};

/// How a destination treats a projection of the source collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Required,
    Optional,
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub reason: &'static str,
}

impl Constraint {
    fn new(kind: ConstraintKind, reason: &'static str) -> Self {
        Self { kind, reason }
    }
}

/// Outcome of validating one binding against its endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBinding {
    /// Constraint of every projection, keyed by field name.
    pub constraints: BTreeMap<String, Constraint>,
    pub resource_path: Vec<String>,
    pub delta_updates: bool,
    pub resource: Resource,
}

impl ValidatedBinding {
    pub fn constraint(&self, field: &str) -> Option<&Constraint> {
        self.constraints.get(field)
    }
}

/// Validates `binding` against `endpoint`, resolving its destination identity and
/// the constraint of each projection.
pub fn validate(
    endpoint: &EndpointConfig,
    binding: &BindingConfig,
) -> MaterializeResult<ValidatedBinding> {
    let validated = match endpoint {
        EndpointConfig::Postgres(_) => validate_table(binding)?,
        EndpointConfig::Elasticsearch(_) => validate_index(binding)?,
        EndpointConfig::Webhook(config) => validate_webhook(config, binding)?,
    };

    debug!(
        collection = %binding.collection.name,
        resource_path = ?validated.resource_path,
        delta_updates = validated.delta_updates,
        "validated binding"
    );

    Ok(validated)
}

fn parse_resource<T: DeserializeOwned>(binding: &BindingConfig) -> MaterializeResult<T> {
    serde_json::from_value(binding.resource.clone()).map_err(|err| {
        materialize_error!(
            ErrorKind::InvalidResourceConfig,
            "Resource configuration could not be parsed",
            err
        )
    })
}

fn invalid_resource(err: impl ToString) -> MaterializeError {
    materialize_error!(
        ErrorKind::InvalidResourceConfig,
        "Resource configuration is invalid",
        err
    )
}

fn require_root_document(collection: &CollectionSpec) -> MaterializeResult<()> {
    if collection.root_document().is_none() {
        bail!(
            ErrorKind::ConfigError,
            "Collection has no root document projection",
            collection.name
        );
    }

    Ok(())
}

fn validate_table(binding: &BindingConfig) -> MaterializeResult<ValidatedBinding> {
    let resource: TableResource = parse_resource(binding)?;
    resource.validate().map_err(invalid_resource)?;

    let collection = &binding.collection;
    require_root_document(collection)?;

    for (pointer, projection) in collection.key.iter().zip(collection.key_projections()) {
        let Some(projection) = projection else {
            bail!(
                ErrorKind::ConfigError,
                "Collection key has no primary key projection",
                pointer
            );
        };
        if !matches!(
            projection.scalar_type(),
            Some(JsonType::Integer | JsonType::Boolean | JsonType::String)
        ) {
            bail!(
                ErrorKind::ConfigError,
                "Key fields must be integers, booleans or strings",
                projection.field
            );
        }
    }

    let constraints = collection
        .projections
        .iter()
        .map(|projection| {
            let constraint = if projection.is_primary_key {
                Constraint::new(
                    ConstraintKind::Required,
                    "Primary key locations are required",
                )
            } else if projection.is_root_document() {
                Constraint::new(ConstraintKind::Required, "The root document is required")
            } else {
                Constraint::new(
                    ConstraintKind::Optional,
                    "Non-key fields may be materialized",
                )
            };
            (projection.field.clone(), constraint)
        })
        .collect();

    Ok(ValidatedBinding {
        constraints,
        resource_path: vec![resource.table.clone()],
        delta_updates: false,
        resource: Resource::Table {
            table: resource.table,
        },
    })
}

fn validate_index(binding: &BindingConfig) -> MaterializeResult<ValidatedBinding> {
    let resource: IndexResource = parse_resource(binding)?;
    resource.validate().map_err(invalid_resource)?;

    let collection = &binding.collection;
    require_root_document(collection)?;

    // The mapping is only built to check that the schema is supported.
    build_mapping(&collection.schema, &resource.field_overrides).map_err(invalid_resource)?;

    let constraints = collection
        .projections
        .iter()
        .map(|projection| {
            let constraint = if projection.is_root_document() {
                Constraint::new(ConstraintKind::Required, "The root document is required")
            } else {
                Constraint::new(
                    ConstraintKind::Optional,
                    "Non root document fields are not required",
                )
            };
            (projection.field.clone(), constraint)
        })
        .collect();

    Ok(ValidatedBinding {
        constraints,
        resource_path: vec![resource.index.clone()],
        delta_updates: resource.delta_updates,
        resource: Resource::Index {
            index: resource.index,
            field_overrides: resource.field_overrides,
        },
    })
}

fn validate_webhook(
    endpoint: &WebhookEndpointConfig,
    binding: &BindingConfig,
) -> MaterializeResult<ValidatedBinding> {
    let resource: WebhookResource = parse_resource(binding)?;

    let address = endpoint.address_url()?;
    let url = address.join(resource.relative_path.as_deref().unwrap_or_default())?;
    if !url.has_host() {
        bail!(
            ErrorKind::UnresolvedDestination,
            "Resolved webhook address is not absolute",
            url
        );
    }

    let collection = &binding.collection;
    require_root_document(collection)?;

    let constraints = collection
        .projections
        .iter()
        .map(|projection| {
            let constraint = if projection.is_root_document() {
                Constraint::new(
                    ConstraintKind::Required,
                    "The root document must be materialized",
                )
            } else {
                Constraint::new(
                    ConstraintKind::Forbidden,
                    "Webhooks only materialize the full document",
                )
            };
            (projection.field.clone(), constraint)
        })
        .collect();

    Ok(ValidatedBinding {
        constraints,
        resource_path: vec![url.to_string()],
        delta_updates: true,
        resource: Resource::Webhook { url },
    })
}
