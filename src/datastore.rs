//! Datastore owning the connection pool, the serialization lock and schema bindings

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{AnyConnection, AnyPool};
use sqlx::any::AnyPoolOptions;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::config::{DatastoreConfig, PoolClass, is_volatile_sqlite_url};
use crate::error::Error;
use crate::schema::{Dialect, RecordSchema, SchemaRegistry, SchemaTemplate};
use crate::templates;
use crate::transaction::Transaction;

/// Connection pool and transaction factory for an event-sourced persistence layer.
///
/// A datastore connected to a volatile in-memory SQLite database holds a single shared
/// connection and a serialization lock: transactions against it are totally ordered.
/// Every other datastore runs transactions concurrently and leaves isolation to the
/// backend.
///
/// # Example
///
/// ```no_run
/// use eventsourcing_sqlx::{Datastore, DatastoreConfig, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let datastore = Datastore::connect(DatastoreConfig::with_url("sqlite::memory:")).await?;
/// assert!(datastore.is_embedded_single_writer());
///
/// let count: i64 = datastore
///     .with_transaction(false, |conn| {
///         Box::pin(async move {
///             let (count,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&mut *conn).await?;
///             Ok::<_, Error>(count)
///         })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Datastore {
   /// Engine handle and session factory: sessions are pooled connections
   pool: AnyPool,

   dialect: Dialect,

   /// Present when transactions must be serialized
   serialization_lock: Option<Arc<Mutex<()>>>,

   is_embedded_single_writer: bool,

   is_write_ahead_log_enabled: bool,

   stored_event_template: SchemaTemplate,
   snapshot_template: SchemaTemplate,
   notification_tracking_template: SchemaTemplate,

   registry: Arc<SchemaRegistry>,
}

impl Datastore {
   /// Connect a datastore from `config`.
   ///
   /// Needs either `config.url` or `config.session_factory`; the URL takes precedence
   /// when both are given. Fails with [`Error::Configuration`] when neither is.
   pub async fn connect(config: DatastoreConfig) -> Result<Self> {
      sqlx::any::install_default_drivers();

      let url = config.resolved_url();
      let is_embedded_single_writer = url.as_deref().is_some_and(is_volatile_sqlite_url);

      let pool = match (url.as_deref(), config.session_factory.as_ref()) {
         (Some(url), factory) => {
            if factory.is_some() {
               debug!("Both url and session factory configured, connecting with url");
            }
            Self::open_pool(url, is_embedded_single_writer, &config).await?
         }
         (None, Some(factory)) => factory.clone(),
         (None, None) => {
            return Err(Error::Configuration(
               "datastore must be created with a url or a session factory".to_string(),
            ));
         }
      };

      let dialect = {
         let conn = pool.acquire().await?;
         Dialect::from_backend_name(conn.backend_name())
      };

      let is_write_ahead_log_enabled =
         Self::enable_write_ahead_logging_if_applicable(&pool, dialect, is_embedded_single_writer)
            .await;

      let serialization_lock = (is_embedded_single_writer || config.serialize_transactions)
         .then(|| Arc::new(Mutex::new(())));

      debug!(
         "Datastore connected: dialect={:?}, single_writer={}, wal={}, serialized={}",
         dialect,
         is_embedded_single_writer,
         is_write_ahead_log_enabled,
         serialization_lock.is_some()
      );

      Ok(Self {
         pool,
         dialect,
         serialization_lock,
         is_embedded_single_writer,
         is_write_ahead_log_enabled,
         stored_event_template: config
            .stored_event_template
            .unwrap_or_else(templates::stored_event),
         snapshot_template: config.snapshot_template.unwrap_or_else(templates::snapshot),
         notification_tracking_template: config
            .notification_tracking_template
            .unwrap_or_else(templates::notification_tracking),
         registry: config.registry.unwrap_or_else(SchemaRegistry::global),
      })
   }

   async fn open_pool(url: &str, single_writer: bool, config: &DatastoreConfig) -> Result<AnyPool> {
      // Separate connections to an in-memory database never see each other's data
      let pool_class = if single_writer {
         PoolClass::Static
      } else {
         config.pool_class.unwrap_or_default()
      };

      let options = match pool_class {
         PoolClass::Static => AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None),
         PoolClass::Queue => AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs))),
      };

      Ok(options.connect(url).await?)
   }

   /// Switch an on-disk SQLite database to WAL journaling.
   ///
   /// Returns whether SQLite actually granted WAL mode. Best effort: failures are
   /// logged and reported as `false`.
   async fn enable_write_ahead_logging_if_applicable(
      pool: &AnyPool,
      dialect: Dialect,
      is_embedded_single_writer: bool,
   ) -> bool {
      if dialect != Dialect::Sqlite || is_embedded_single_writer {
         return false;
      }

      match sqlx::query_as::<_, (String,)>("PRAGMA journal_mode=WAL")
         .fetch_one(pool)
         .await
      {
         Ok((mode,)) => {
            let enabled = mode.eq_ignore_ascii_case("wal");
            debug!("journal_mode is now {}", mode);
            enabled
         }
         Err(e) => {
            warn!("Failed to enable WAL journal mode: {}", e);
            false
         }
      }
   }

   /// Open a transaction.
   ///
   /// Waits for the serialization lock first when the datastore has one. `commit`
   /// selects whether successful work is committed or rolled back.
   ///
   /// The returned future is cancel-safe: dropping it (e.g. under
   /// `tokio::time::timeout`) never leaves the lock or a session held.
   pub async fn transaction(&self, commit: bool) -> Result<Transaction> {
      let lock = match &self.serialization_lock {
         Some(lock) => Some(Arc::clone(lock).lock_owned().await),
         None => None,
      };

      // On failure the guard is dropped with this frame, releasing the lock
      let session = self.pool.begin().await?;

      Ok(Transaction::new(session, commit, lock))
   }

   /// Open a transaction, run `work` in it, and finish it with the outcome.
   pub async fn with_transaction<F, T, E>(&self, commit: bool, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let transaction = self.transaction(commit).await.map_err(E::from)?;
      transaction.run(work).await
   }

   /// Bind `template` to `table_name` through this datastore's schema registry.
   pub fn define_record_schema(
      &self,
      name: &str,
      table_name: &str,
      template: &SchemaTemplate,
   ) -> Result<Arc<RecordSchema>> {
      self.registry.define(name, table_name, template)
   }

   /// Create the table and indexes for `schema` if they don't exist yet.
   pub async fn create_table(&self, schema: &RecordSchema) -> Result<()> {
      let statements = schema.create_statements(self.dialect);

      self
         .with_transaction(true, move |conn| {
            Box::pin(async move {
               for statement in &statements {
                  sqlx::query(statement).execute(&mut *conn).await?;
               }
               Ok::<(), Error>(())
            })
         })
         .await
   }

   /// The connection pool sessions are drawn from.
   pub fn pool(&self) -> &AnyPool {
      &self.pool
   }

   /// SQL dialect of the connected backend.
   pub fn dialect(&self) -> Dialect {
      self.dialect
   }

   /// Whether the target is a volatile in-memory SQLite database served by one shared
   /// connection.
   pub fn is_embedded_single_writer(&self) -> bool {
      self.is_embedded_single_writer
   }

   /// Whether SQLite reported `wal` journaling after connecting.
   pub fn is_write_ahead_log_enabled(&self) -> bool {
      self.is_write_ahead_log_enabled
   }

   /// Whether transactions are serialized through the datastore's lock.
   pub fn has_serialization_lock(&self) -> bool {
      self.serialization_lock.is_some()
   }

   /// Template bound for stored event records.
   pub fn stored_event_template(&self) -> &SchemaTemplate {
      &self.stored_event_template
   }

   /// Template bound for snapshot records.
   pub fn snapshot_template(&self) -> &SchemaTemplate {
      &self.snapshot_template
   }

   /// Template bound for notification tracking records.
   pub fn notification_tracking_template(&self) -> &SchemaTemplate {
      &self.notification_tracking_template
   }

   /// Registry that [`define_record_schema`](Self::define_record_schema) writes to.
   pub fn registry(&self) -> &Arc<SchemaRegistry> {
      &self.registry
   }

   /// Close all pooled connections.
   ///
   /// For an in-memory database this discards its contents.
   pub async fn close(self) {
      self.pool.close().await;
   }
}
