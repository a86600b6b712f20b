use std::error;
use std::fmt;

use materialize_config::shared::ValidationError;

/// Result type of materialization operations.
pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Error raised by the transactor, its adapters and the pipeline driving them.
///
/// Carries an [`ErrorKind`] used to decide how to react, a static description and
/// optionally a dynamic detail. Several errors can be aggregated with
/// [`MaterializeError::many`].
#[derive(Debug, Clone)]
pub struct MaterializeError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<MaterializeError>),
}

/// Categories of materialization failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration Errors
    ConfigError,
    InvalidResourceConfig,
    UnresolvedDestination,

    // Key & Data Errors
    KeyEncodingError,
    ConversionError,
    SerializationError,
    DeserializationError,

    // Destination Errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationIoError,
    DestinationError,
    BulkItemFailed,

    // Fencing Errors
    FenceTakeover,

    // Protocol Errors
    InvariantViolation,
    InvalidState,

    // Lifecycle Errors
    Canceled,

    Unknown,
}

impl MaterializeError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<MaterializeError>) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns the kinds of all aggregated errors, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns `true` if the session cannot continue after this error.
    ///
    /// Everything except transient destination failures and cancellation is fatal.
    pub fn is_fatal(&self) -> bool {
        self.kinds().iter().any(|kind| {
            !matches!(
                kind,
                ErrorKind::DestinationConnectionFailed
                    | ErrorKind::DestinationIoError
                    | ErrorKind::Canceled
            )
        })
    }
}

impl PartialEq for MaterializeError {
    fn eq(&self, other: &MaterializeError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => f.write_str("Multiple errors occurred (empty)"),
                [single] => single.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for MaterializeError {}

impl From<(ErrorKind, &'static str)> for MaterializeError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for MaterializeError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for MaterializeError
where
    E: Into<MaterializeError>,
{
    fn from(errors: Vec<E>) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for MaterializeError {
    fn from(err: std::io::Error) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::DestinationIoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps JSON failures to [`ErrorKind::SerializationError`] or
/// [`ErrorKind::DeserializationError`] depending on their category.
impl From<serde_json::Error> for MaterializeError {
    fn from(err: serde_json::Error) -> MaterializeError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON I/O operation failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<url::ParseError> for MaterializeError {
    fn from(err: url::ParseError) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::UnresolvedDestination,
                "URL parsing failed",
                err.to_string(),
            ),
        }
    }
}

impl From<ValidationError> for MaterializeError {
    fn from(err: ValidationError) -> MaterializeError {
        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Configuration is invalid",
                err.to_string(),
            ),
        }
    }
}

/// Classifies HTTP client failures; connection and timeout errors are transient.
impl From<reqwest::Error> for MaterializeError {
    fn from(err: reqwest::Error) -> MaterializeError {
        let (kind, description) = if err.is_connect() || err.is_timeout() {
            (
                ErrorKind::DestinationConnectionFailed,
                "HTTP connection to destination failed",
            )
        } else if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "HTTP response decoding failed",
            )
        } else if err.is_status() {
            (
                ErrorKind::DestinationError,
                "HTTP destination returned an error status",
            )
        } else {
            (ErrorKind::DestinationIoError, "HTTP request failed")
        };

        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Maps Postgres failures by SQLSTATE class.
impl From<tokio_postgres::Error> for MaterializeError {
    fn from(err: tokio_postgres::Error) -> MaterializeError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => {
                use tokio_postgres::error::SqlState;

                match *sqlstate {
                    SqlState::CONNECTION_EXCEPTION
                    | SqlState::CONNECTION_DOES_NOT_EXIST
                    | SqlState::CONNECTION_FAILURE
                    | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                    | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                    | SqlState::TOO_MANY_CONNECTIONS
                    | SqlState::ADMIN_SHUTDOWN
                    | SqlState::CRASH_SHUTDOWN
                    | SqlState::CANNOT_CONNECT_NOW => (
                        ErrorKind::DestinationConnectionFailed,
                        "PostgreSQL connection error",
                    ),

                    SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                        ErrorKind::ConfigError,
                        "PostgreSQL authentication failed",
                    ),

                    SqlState::DATA_EXCEPTION
                    | SqlState::INVALID_TEXT_REPRESENTATION
                    | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
                    | SqlState::INVALID_JSON_TEXT => (
                        ErrorKind::ConversionError,
                        "PostgreSQL data conversion error",
                    ),

                    SqlState::TRANSACTION_ROLLBACK
                    | SqlState::T_R_SERIALIZATION_FAILURE
                    | SqlState::T_R_DEADLOCK_DETECTED
                    | SqlState::INVALID_TRANSACTION_STATE
                    | SqlState::IN_FAILED_SQL_TRANSACTION => {
                        (ErrorKind::InvalidState, "PostgreSQL transaction error")
                    }

                    SqlState::IO_ERROR | SqlState::DISK_FULL => {
                        (ErrorKind::DestinationIoError, "PostgreSQL I/O error")
                    }

                    SqlState::QUERY_CANCELED => {
                        (ErrorKind::Canceled, "PostgreSQL query canceled")
                    }

                    _ => (
                        ErrorKind::DestinationQueryFailed,
                        "PostgreSQL query failed",
                    ),
                }
            }
            // Errors without a SQLSTATE come from the connection itself.
            None => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        MaterializeError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}
