//! Translation of native SQLx errors into the persistence error taxonomy
//!
//! Database-reported errors are dispatched on the driver that produced them: SQLite
//! errors by primary result code, PostgreSQL errors by SQLSTATE class. Constraint
//! violations are recognized through SQLx's driver-neutral [`ErrorKind`] first.

use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::postgres::PgDatabaseError;
use sqlx::sqlite::SqliteError;

use crate::error::{Error, ErrorCategory};

impl From<sqlx::Error> for Error {
   fn from(err: sqlx::Error) -> Self {
      translate(err)
   }
}

/// Translate a native error into its categorized [`Error`], keeping it as the cause.
pub fn translate(err: sqlx::Error) -> Error {
   let category = classify(&err);
   Error::categorized(category, err)
}

/// Decide which category a native error belongs to.
pub fn classify(err: &sqlx::Error) -> ErrorCategory {
   match err {
      sqlx::Error::Database(db_err) => classify_database_error(&**db_err),

      sqlx::Error::Configuration(_)
      | sqlx::Error::ColumnIndexOutOfBounds { .. }
      | sqlx::Error::ColumnNotFound(_)
      | sqlx::Error::TypeNotFound { .. } => ErrorCategory::Interface,

      sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
         ErrorCategory::Data
      }

      sqlx::Error::Protocol(_) => ErrorCategory::Internal,

      sqlx::Error::Io(_)
      | sqlx::Error::Tls(_)
      | sqlx::Error::PoolTimedOut
      | sqlx::Error::PoolClosed
      | sqlx::Error::WorkerCrashed => ErrorCategory::Operational,

      _ => ErrorCategory::Persistence,
   }
}

fn classify_database_error(db_err: &(dyn DatabaseError + 'static)) -> ErrorCategory {
   if matches!(
      db_err.kind(),
      ErrorKind::UniqueViolation
         | ErrorKind::ForeignKeyViolation
         | ErrorKind::NotNullViolation
         | ErrorKind::CheckViolation
   ) {
      return ErrorCategory::Integrity;
   }

   let code = db_err.code();

   if db_err.try_downcast_ref::<SqliteError>().is_some() {
      // SQLite reports extended result codes; the primary code is the low byte
      return code
         .and_then(|c| c.parse::<i32>().ok())
         .map_or(ErrorCategory::Database, sqlite_result_code_category);
   }

   if db_err.try_downcast_ref::<PgDatabaseError>().is_some() {
      return code.map_or(ErrorCategory::Database, |c| sqlstate_category(&c));
   }

   ErrorCategory::Database
}

/// Category for a SQLite (extended or primary) result code.
///
/// See <https://www.sqlite.org/rescode.html>.
pub fn sqlite_result_code_category(code: i32) -> ErrorCategory {
   match code & 0xff {
      1 => ErrorCategory::Programming,     // SQLITE_ERROR
      2 => ErrorCategory::Internal,        // SQLITE_INTERNAL
      3 | 4 | 5 | 6 | 7 | 8 | 9 | 10 | 13 | 14 | 15 | 17 | 23 => ErrorCategory::Operational,
      18 | 20 => ErrorCategory::Data,      // SQLITE_TOOBIG, SQLITE_MISMATCH
      19 => ErrorCategory::Integrity,      // SQLITE_CONSTRAINT
      21 | 25 => ErrorCategory::Interface, // SQLITE_MISUSE, SQLITE_RANGE
      22 => ErrorCategory::NotSupported,   // SQLITE_NOLFS
      _ => ErrorCategory::Database,
   }
}

/// Category for a PostgreSQL SQLSTATE code, decided by its two-character class.
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>.
pub fn sqlstate_category(sqlstate: &str) -> ErrorCategory {
   let Some(class) = sqlstate.get(..2) else {
      return ErrorCategory::Database;
   };

   match class {
      "22" => ErrorCategory::Data,
      "23" => ErrorCategory::Integrity,
      "0A" => ErrorCategory::NotSupported,
      "24" | "25" | "2D" | "XX" => ErrorCategory::Internal,
      "26" | "34" | "3D" | "3F" | "42" | "44" => ErrorCategory::Programming,
      "08" | "28" | "40" | "53" | "54" | "55" | "57" | "58" => ErrorCategory::Operational,
      _ => ErrorCategory::Database,
   }
}
