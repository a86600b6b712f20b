use std::error::Error;

use bytes::BytesMut;
use serde_json::Value;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

use crate::binding::{ColumnType, Field};
use crate::error::{ErrorKind, MaterializeResult};
use crate::materialize_error;
use crate::types::{Key, KeyValue};

/// Statement parameter converted from a JSON value according to its column type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl SqlParam {
    /// Converts `value` for a column of `field`'s type.
    pub fn from_json(field: &Field, value: &Value) -> MaterializeResult<SqlParam> {
        let param = match (field.column_type, value) {
            (ColumnType::Json, value) => Some(SqlParam::Json(value.clone())),
            (_, Value::Null) => Some(SqlParam::Null),
            (ColumnType::Boolean, Value::Bool(b)) => Some(SqlParam::Bool(*b)),
            (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(SqlParam::Int),
            (ColumnType::Number, Value::Number(n)) => n.as_f64().map(SqlParam::Float),
            (ColumnType::String, Value::String(s)) => Some(SqlParam::Text(s.clone())),
            _ => None,
        };

        param.ok_or_else(|| {
            materialize_error!(
                ErrorKind::ConversionError,
                "Value does not match the column type",
                format!(
                    "field `{}` of type {:?}: {value}",
                    field.name, field.column_type
                )
            )
        })
    }

    /// Converts a key component for a key column of `field`'s type.
    pub fn from_key_value(field: &Field, value: &KeyValue) -> MaterializeResult<SqlParam> {
        let param = match (field.column_type, value) {
            (ColumnType::Json, value) => Some(SqlParam::Json(value.clone().into())),
            (ColumnType::Boolean, KeyValue::Bool(b)) => Some(SqlParam::Bool(*b)),
            (ColumnType::Integer, KeyValue::Integer(i)) => Some(SqlParam::Int(*i)),
            (ColumnType::String, KeyValue::String(s)) => Some(SqlParam::Text(s.clone())),
            _ => None,
        };

        param.ok_or_else(|| {
            materialize_error!(
                ErrorKind::ConversionError,
                "Key component does not match the column type",
                format!(
                    "key field `{}` of type {:?}: {value}",
                    field.name, field.column_type
                )
            )
        })
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlParam::Null => Ok(IsNull::Yes),
            SqlParam::Bool(b) => b.to_sql_checked(ty, out),
            SqlParam::Int(i) => i.to_sql_checked(ty, out),
            SqlParam::Float(f) => f.to_sql_checked(ty, out),
            SqlParam::Text(s) => s.to_sql_checked(ty, out),
            SqlParam::Json(v) => v.to_sql_checked(ty, out),
        }
    }

    // Each variant checks its own type in `to_sql`.
    fn accepts(ty: &Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <f64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <Value as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// Converts the components of `key` for the key columns `fields`.
pub fn key_params(fields: &[Field], key: &Key) -> MaterializeResult<Vec<SqlParam>> {
    if fields.len() != key.len() {
        return Err(materialize_error!(
            ErrorKind::KeyEncodingError,
            "Key arity does not match the binding",
            format!("expected {} components, got {}", fields.len(), key.len())
        ));
    }

    fields
        .iter()
        .zip(key.values())
        .map(|(field, value)| SqlParam::from_key_value(field, value))
        .collect()
}

/// Converts `values` for the value columns `fields`.
pub fn value_params(fields: &[Field], values: &[Value]) -> MaterializeResult<Vec<SqlParam>> {
    if fields.len() != values.len() {
        return Err(materialize_error!(
            ErrorKind::ConversionError,
            "Value count does not match the binding",
            format!("expected {} values, got {}", fields.len(), values.len())
        ));
    }

    fields
        .iter()
        .zip(values)
        .map(|(field, value)| SqlParam::from_json(field, value))
        .collect()
}
