//! Configuration for datastore connections

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::AnyPool;

use crate::schema::{SchemaRegistry, SchemaTemplate};

/// How the connection pool is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
   /// A regular pool bounded by `max_connections`
   #[default]
   Queue,
   /// Exactly one connection, opened eagerly and never expired
   Static,
}

/// Configuration for a [`Datastore`](crate::Datastore)
///
/// Exactly one connection target is needed: a `url`, or a pre-built `session_factory`
/// pool. Everything else has defaults.
///
/// # Examples
///
/// ```
/// use eventsourcing_sqlx::DatastoreConfig;
///
/// let config = DatastoreConfig {
///     url: Some("sqlite::memory:".into()),
///     ..Default::default()
/// };
/// assert_eq!(config.max_connections, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
   /// Connection string, e.g. `sqlite://events.db?mode=rwc` or `postgres://...`
   pub url: Option<String>,

   /// Pre-built pool to use instead of connecting from `url`
   #[serde(skip)]
   pub session_factory: Option<AnyPool>,

   /// Driver options appended to the URL query string.
   ///
   /// Options already present in the URL take precedence.
   pub connect_args: BTreeMap<String, String>,

   /// Pool shape override. Ignored for in-memory SQLite, which always uses
   /// [`PoolClass::Static`].
   pub pool_class: Option<PoolClass>,

   /// Maximum connections for [`PoolClass::Queue`]
   ///
   /// Default: 5
   pub max_connections: u32,

   /// Idle timeout for pooled connections (in seconds)
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// Serialize all transactions behind one lock even if the target would not need it
   pub serialize_transactions: bool,

   /// Replaces the built-in template for stored event records
   pub stored_event_template: Option<SchemaTemplate>,
   /// Replaces the built-in template for snapshot records
   pub snapshot_template: Option<SchemaTemplate>,
   /// Replaces the built-in template for notification tracking records
   pub notification_tracking_template: Option<SchemaTemplate>,

   /// Registry for record schemas. Defaults to [`SchemaRegistry::global`].
   #[serde(skip)]
   pub registry: Option<Arc<SchemaRegistry>>,
}

impl Default for DatastoreConfig {
   fn default() -> Self {
      Self {
         url: None,
         session_factory: None,
         connect_args: BTreeMap::new(),
         pool_class: None,
         max_connections: 5,
         idle_timeout_secs: 30,
         serialize_transactions: false,
         stored_event_template: None,
         snapshot_template: None,
         notification_tracking_template: None,
         registry: None,
      }
   }
}

impl DatastoreConfig {
   /// A configuration connecting to `url` with defaults for everything else.
   pub fn with_url(url: impl Into<String>) -> Self {
      Self {
         url: Some(url.into()),
         ..Default::default()
      }
   }

   /// A configuration adopting an existing pool.
   pub fn with_session_factory(pool: AnyPool) -> Self {
      Self {
         session_factory: Some(pool),
         ..Default::default()
      }
   }

   /// The URL with `connect_args` merged into its query string.
   pub fn resolved_url(&self) -> Option<String> {
      self
         .url
         .as_deref()
         .map(|url| merge_connect_args(url, &self.connect_args))
   }
}

/// True for SQLite URLs whose data lives only in the connection that opened it.
pub fn is_volatile_sqlite_url(url: &str) -> bool {
   url.starts_with("sqlite") && (url.contains(":memory:") || url.contains("mode=memory"))
}

fn merge_connect_args(url: &str, connect_args: &BTreeMap<String, String>) -> String {
   let existing: Vec<&str> = url
      .split_once('?')
      .map(|(_, query)| {
         query
            .split('&')
            .filter_map(|pair| pair.split('=').next())
            .collect()
      })
      .unwrap_or_default();

   let extra: Vec<String> = connect_args
      .iter()
      .filter(|(key, _)| !existing.contains(&key.as_str()))
      .map(|(key, value)| format!("{key}={value}"))
      .collect();

   if extra.is_empty() {
      return url.to_string();
   }

   let separator = if url.contains('?') { '&' } else { '?' };
   format!("{}{}{}", url, separator, extra.join("&"))
}
