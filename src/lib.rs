//! # eventsourcing-sqlx
//!
//! Connection and transaction management for an event-sourced persistence layer,
//! built on SQLx.
//!
//! ## Core Types
//!
//! - **[`Datastore`]**: Owns the connection pool, decides whether transactions must be
//!   serialized, enables WAL for on-disk SQLite, and opens transactions
//! - **[`Transaction`]**: A scoped unit of work that commits or rolls back on exit and
//!   always releases its session and lock
//! - **[`SchemaRegistry`]**: Binds record schema templates to table names
//! - **[`Error`]**: Error type; backend failures are sorted into [`ErrorCategory`]s
//!
//! ## Architecture
//!
//! - **Single writer for in-memory SQLite**: one shared connection, and a lock that
//!   totally orders transactions
//! - **Concurrent everywhere else**: isolation is delegated to the backend
//! - **Stable errors**: SQLite result codes and PostgreSQL SQLSTATEs map to the same
//!   categories, with the native error kept as the source
//!
//! ## Usage
//!
//! ```no_run
//! use eventsourcing_sqlx::{Datastore, DatastoreConfig, Error, templates};
//!
//! #[tokio::main]
//! async fn main() -> eventsourcing_sqlx::Result<()> {
//!     let datastore = Datastore::connect(DatastoreConfig::with_url("sqlite::memory:")).await?;
//!
//!     let events = datastore.define_record_schema(
//!         "StoredEvent",
//!         templates::STORED_EVENTS_TABLE,
//!         datastore.stored_event_template(),
//!     )?;
//!     datastore.create_table(&events).await?;
//!
//!     datastore
//!         .with_transaction(true, |conn| {
//!             Box::pin(async move {
//!                 sqlx::query(
//!                     "INSERT INTO stored_events (originator_id, originator_version, topic, state) \
//!                      VALUES (?, ?, ?, ?)",
//!                 )
//!                 .bind("2b5f4c4e-0a51-4a57-9a0c-8b2d1c6a2f10")
//!                 .bind(1_i64)
//!                 .bind("example:Created")
//!                 .bind(b"{}".to_vec())
//!                 .execute(&mut *conn)
//!                 .await?;
//!                 Ok::<(), Error>(())
//!             })
//!         })
//!         .await?;
//!
//!     datastore.close().await;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod datastore;
mod error;
mod schema;
pub mod templates;
mod transaction;
mod translate;

// Re-export public types
pub use config::{DatastoreConfig, PoolClass, is_volatile_sqlite_url};
pub use datastore::Datastore;
pub use error::{Error, ErrorCategory};
pub use schema::{
   ColumnDef, ColumnType, Dialect, Index, IndexDef, RecordSchema, SchemaRegistry, SchemaTemplate,
};
pub use transaction::Transaction;
pub use translate::{classify, sqlite_result_code_category, sqlstate_category, translate};

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
