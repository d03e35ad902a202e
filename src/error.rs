//! Error types for eventsourcing-sqlx

use std::fmt;

use thiserror::Error;

/// The fixed set of categories every persistence failure is mapped into.
///
/// Ordered from most specific to least specific. [`ErrorCategory::Persistence`] is the
/// fallback for backend failures that match nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
   /// Driver/API misuse (wrong call sequence, bad argument shape)
   Interface,
   /// Malformed or out-of-range data supplied to the database
   Data,
   /// Constraint violation (uniqueness, foreign key, not-null, check)
   Integrity,
   /// Database-internal inconsistency surfaced by the driver
   Internal,
   /// Invalid SQL or statement construction
   Programming,
   /// Feature requested that the backend does not support
   NotSupported,
   /// Environment-level failure (connection lost, disk full, database locked)
   Operational,
   /// Any other database-reported failure
   Database,
   /// Any other backend failure
   Persistence,
}

impl ErrorCategory {
   /// All categories, most specific first.
   pub const ALL: [ErrorCategory; 9] = [
      ErrorCategory::Interface,
      ErrorCategory::Data,
      ErrorCategory::Integrity,
      ErrorCategory::Internal,
      ErrorCategory::Programming,
      ErrorCategory::NotSupported,
      ErrorCategory::Operational,
      ErrorCategory::Database,
      ErrorCategory::Persistence,
   ];

   /// Machine-readable code for this category.
   pub fn code(self) -> &'static str {
      match self {
         ErrorCategory::Interface => "INTERFACE_ERROR",
         ErrorCategory::Data => "DATA_ERROR",
         ErrorCategory::Integrity => "INTEGRITY_ERROR",
         ErrorCategory::Internal => "INTERNAL_ERROR",
         ErrorCategory::Programming => "PROGRAMMING_ERROR",
         ErrorCategory::NotSupported => "NOT_SUPPORTED_ERROR",
         ErrorCategory::Operational => "OPERATIONAL_ERROR",
         ErrorCategory::Database => "DATABASE_ERROR",
         ErrorCategory::Persistence => "PERSISTENCE_ERROR",
      }
   }
}

impl fmt::Display for ErrorCategory {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         ErrorCategory::Interface => "InterfaceError",
         ErrorCategory::Data => "DataError",
         ErrorCategory::Integrity => "IntegrityError",
         ErrorCategory::Internal => "InternalError",
         ErrorCategory::Programming => "ProgrammingError",
         ErrorCategory::NotSupported => "NotSupportedError",
         ErrorCategory::Operational => "OperationalError",
         ErrorCategory::Database => "DatabaseError",
         ErrorCategory::Persistence => "PersistenceError",
      };
      f.write_str(name)
   }
}

/// Errors that may occur when working with eventsourcing-sqlx
///
/// Construction-time problems ([`Error::Configuration`], [`Error::SchemaConflict`]) are
/// raised immediately. Every other variant corresponds to one [`ErrorCategory`] and
/// carries the native `sqlx` error as its source.
#[derive(Error, Debug)]
pub enum Error {
   /// The datastore was configured without a usable connection target
   #[error("configuration error: {0}")]
   Configuration(String),

   /// A table name was already bound to a record schema built from another template
   #[error(
      "table '{table}' already has a record schema from template '{existing}', cannot redefine it from template '{requested}'"
   )]
   SchemaConflict {
      table: String,
      existing: String,
      requested: String,
   },

   #[error("interface error: {0}")]
   Interface(#[source] sqlx::Error),

   #[error("data error: {0}")]
   Data(#[source] sqlx::Error),

   #[error("integrity error: {0}")]
   Integrity(#[source] sqlx::Error),

   #[error("internal error: {0}")]
   Internal(#[source] sqlx::Error),

   #[error("programming error: {0}")]
   Programming(#[source] sqlx::Error),

   #[error("not supported: {0}")]
   NotSupported(#[source] sqlx::Error),

   #[error("operational error: {0}")]
   Operational(#[source] sqlx::Error),

   #[error("database error: {0}")]
   Database(#[source] sqlx::Error),

   #[error("persistence error: {0}")]
   Persistence(#[source] sqlx::Error),
}

impl Error {
   /// Wrap a native error in the variant for `category`.
   pub fn categorized(category: ErrorCategory, cause: sqlx::Error) -> Self {
      match category {
         ErrorCategory::Interface => Error::Interface(cause),
         ErrorCategory::Data => Error::Data(cause),
         ErrorCategory::Integrity => Error::Integrity(cause),
         ErrorCategory::Internal => Error::Internal(cause),
         ErrorCategory::Programming => Error::Programming(cause),
         ErrorCategory::NotSupported => Error::NotSupported(cause),
         ErrorCategory::Operational => Error::Operational(cause),
         ErrorCategory::Database => Error::Database(cause),
         ErrorCategory::Persistence => Error::Persistence(cause),
      }
   }

   /// The persistence category of this error, if it came from the backend.
   pub fn category(&self) -> Option<ErrorCategory> {
      match self {
         Error::Configuration(_) | Error::SchemaConflict { .. } => None,
         Error::Interface(_) => Some(ErrorCategory::Interface),
         Error::Data(_) => Some(ErrorCategory::Data),
         Error::Integrity(_) => Some(ErrorCategory::Integrity),
         Error::Internal(_) => Some(ErrorCategory::Internal),
         Error::Programming(_) => Some(ErrorCategory::Programming),
         Error::NotSupported(_) => Some(ErrorCategory::NotSupported),
         Error::Operational(_) => Some(ErrorCategory::Operational),
         Error::Database(_) => Some(ErrorCategory::Database),
         Error::Persistence(_) => Some(ErrorCategory::Persistence),
      }
   }

   /// The native driver error this error was translated from.
   pub fn native(&self) -> Option<&sqlx::Error> {
      match self {
         Error::Configuration(_) | Error::SchemaConflict { .. } => None,
         Error::Interface(e)
         | Error::Data(e)
         | Error::Integrity(e)
         | Error::Internal(e)
         | Error::Programming(e)
         | Error::NotSupported(e)
         | Error::Operational(e)
         | Error::Database(e)
         | Error::Persistence(e) => Some(e),
      }
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Configuration(_) => "CONFIGURATION_ERROR".to_string(),
         Error::SchemaConflict { .. } => "SCHEMA_CONFLICT".to_string(),
         other => other
            .category()
            .map_or("PERSISTENCE_ERROR", ErrorCategory::code)
            .to_string(),
      }
   }
}
