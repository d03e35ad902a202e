//! Scoped units of work bound to a single session

use futures::future::BoxFuture;
use sqlx::AnyConnection;
use sqlx::any::Any;
use sqlx::sqlite::SqliteError;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};

use crate::error::{Error, ErrorCategory};
use crate::translate::translate;

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
   Committed,
   RolledBack,
   Failed,
}

/// A unit of work bound to one session.
///
/// Created by [`Datastore::transaction`](crate::Datastore::transaction). The session is
/// already inside a database transaction; use [`session`](Self::session) to run queries
/// and end the scope with [`finish`](Self::finish), or let [`run`](Self::run) do both.
///
/// If a `Transaction` is dropped without being finished (for example because the
/// future driving it was cancelled), the session is rolled back and the serialization
/// lock, if any, is released.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct Transaction {
   // Field order matters: on drop the session goes back to the pool before the
   // lock is released.
   session: sqlx::Transaction<'static, Any>,
   commit: bool,
   lock: Option<OwnedMutexGuard<()>>,
}

impl Transaction {
   pub(crate) fn new(
      session: sqlx::Transaction<'static, Any>,
      commit: bool,
      lock: Option<OwnedMutexGuard<()>>,
   ) -> Self {
      Self {
         session,
         commit,
         lock,
      }
   }

   /// The connection to run this unit of work's queries on.
   pub fn session(&mut self) -> &mut AnyConnection {
      &mut *self.session
   }

   /// Whether this transaction commits when its work succeeds.
   pub fn commits(&self) -> bool {
      self.commit
   }

   /// Whether this transaction holds the datastore's serialization lock.
   pub fn holds_lock(&self) -> bool {
      self.lock.is_some()
   }

   /// Run `work` on the session, then finish the transaction with its outcome.
   ///
   /// # Example
   ///
   /// ```no_run
   /// # async fn example(datastore: &eventsourcing_sqlx::Datastore) -> eventsourcing_sqlx::Result<()> {
   /// let transaction = datastore.transaction(true).await?;
   /// transaction
   ///     .run(|conn| {
   ///         Box::pin(async move {
   ///             sqlx::query("DELETE FROM snapshots").execute(&mut *conn).await?;
   ///             Ok::<(), eventsourcing_sqlx::Error>(())
   ///         })
   ///     })
   ///     .await
   /// # }
   /// ```
   pub async fn run<F, T, E>(mut self, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let outcome = work(&mut *self.session).await;
      self.finish(outcome).await
   }

   /// End the transaction given the outcome of the caller's work.
   ///
   /// - A failed outcome rolls back and is returned unchanged.
   /// - A successful outcome commits (or rolls back, for read-only intent). Failures
   ///   are translated into the persistence taxonomy, except for operational errors
   ///   SQLite raises while the serialization lock is held, which are suppressed.
   ///
   /// The session is released and the lock dropped on every path.
   pub async fn finish<T, E>(self, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
   where
      E: From<Error>,
   {
      let Transaction {
         session,
         commit,
         lock,
      } = self;
      let lock_held = lock.is_some();
      // Held until this function returns or unwinds, whatever path is taken below
      let _lock = lock;

      let (state, result) = match outcome {
         Err(caller_error) => {
            if let Err(e) = session.rollback().await {
               error!("Rollback after failed unit of work also failed: {}", e);
            }
            (TransactionState::RolledBack, Err(caller_error))
         }
         Ok(value) => {
            let (finalized, state) = if commit {
               (session.commit().await, TransactionState::Committed)
            } else {
               (session.rollback().await, TransactionState::RolledBack)
            };

            match settle(finalized, lock_held) {
               Ok(()) => (state, Ok(value)),
               Err(err) => (TransactionState::Failed, Err(E::from(err))),
            }
         }
      };

      debug!("Transaction closed ({:?})", state);
      result
   }
}

/// Translate the result of a bare commit or rollback, dropping spurious single-writer
/// errors.
fn settle(finalized: std::result::Result<(), sqlx::Error>, lock_held: bool) -> crate::Result<()> {
   match finalized.map_err(translate) {
      Err(err) if is_spurious_single_writer_error(&err, lock_held) => {
         warn!("Suppressed operational error under serialization lock: {}", err);
         Ok(())
      }
      other => other,
   }
}

/// An operational error reported by SQLite itself for a bare commit/rollback on the
/// single shared connection has no observable effect while the serialization lock
/// excludes every other writer. Connection loss, pool failures and other engines'
/// errors are always real.
fn is_spurious_single_writer_error(err: &Error, lock_held: bool) -> bool {
   lock_held
      && err.category() == Some(ErrorCategory::Operational)
      && err
         .native()
         .and_then(|native| native.as_database_error())
         .is_some_and(|db_err| db_err.try_downcast_ref::<SqliteError>().is_some())
}

#[cfg(test)]
mod tests {
   use std::borrow::Cow;
   use std::fmt;

   use sqlx::Connection;
   use sqlx::error::{DatabaseError, ErrorKind};

   use super::*;

   /// A real SQLite error in the operational category (SQLITE_READONLY).
   async fn sqlite_operational_error() -> sqlx::Error {
      sqlx::any::install_default_drivers();
      let mut conn = AnyConnection::connect("sqlite::memory:").await.unwrap();
      sqlx::query("CREATE TABLE t (id INTEGER)")
         .execute(&mut conn)
         .await
         .unwrap();
      sqlx::query("PRAGMA query_only = ON")
         .execute(&mut conn)
         .await
         .unwrap();
      sqlx::query("INSERT INTO t (id) VALUES (1)")
         .execute(&mut conn)
         .await
         .unwrap_err()
   }

   /// Stands in for a server-side error from another engine, e.g. a PostgreSQL
   /// connection failure (SQLSTATE 08006).
   #[derive(Debug)]
   struct ServerError;

   impl fmt::Display for ServerError {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
         f.write_str("connection failure")
      }
   }

   impl std::error::Error for ServerError {}

   impl DatabaseError for ServerError {
      fn message(&self) -> &str {
         "connection failure"
      }

      fn code(&self) -> Option<Cow<'_, str>> {
         Some(Cow::Borrowed("08006"))
      }

      fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
         self
      }

      fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
         self
      }

      fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
         self
      }

      fn kind(&self) -> ErrorKind {
         ErrorKind::Other
      }
   }

   #[tokio::test]
   async fn test_sqlite_operational_error_suppressed_only_under_lock() {
      let err = translate(sqlite_operational_error().await);
      assert_eq!(err.category(), Some(ErrorCategory::Operational));

      assert!(is_spurious_single_writer_error(&err, true));
      assert!(!is_spurious_single_writer_error(&err, false));
   }

   #[tokio::test]
   async fn test_settle_surfaces_sqlite_operational_error_without_lock() {
      assert!(settle(Err(sqlite_operational_error().await), true).is_ok());

      let err = settle(Err(sqlite_operational_error().await), false).unwrap_err();
      assert_eq!(err.category(), Some(ErrorCategory::Operational));
   }

   #[test]
   fn test_connection_and_pool_failures_never_suppressed() {
      let failures = [
         sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
         )),
         sqlx::Error::PoolClosed,
         sqlx::Error::PoolTimedOut,
      ];

      for native in failures {
         let description = native.to_string();
         let err = settle(Err(native), true).unwrap_err();
         assert_eq!(
            err.category(),
            Some(ErrorCategory::Operational),
            "{description}"
         );
      }
   }

   #[test]
   fn test_other_engine_operational_errors_never_suppressed() {
      let err = Error::categorized(
         ErrorCategory::Operational,
         sqlx::Error::Database(Box::new(ServerError)),
      );
      assert!(!is_spurious_single_writer_error(&err, true));
   }

   #[test]
   fn test_other_categories_never_suppressed() {
      for category in ErrorCategory::ALL {
         if category == ErrorCategory::Operational {
            continue;
         }
         let err = Error::categorized(category, sqlx::Error::RowNotFound);
         assert!(
            !is_spurious_single_writer_error(&err, true),
            "{category} must not be suppressed"
         );
      }
   }

   #[test]
   fn test_configuration_errors_never_suppressed() {
      let err = Error::Configuration("missing".into());
      assert!(!is_spurious_single_writer_error(&err, true));
   }

   #[test]
   fn test_settle_passes_success_through() {
      assert!(settle(Ok(()), false).is_ok());
      assert!(settle(Ok(()), true).is_ok());
   }
}
