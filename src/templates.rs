//! Built-in schema templates for event-sourced records

use crate::schema::{ColumnDef, ColumnType, IndexDef, SchemaTemplate};

/// Default table name for stored events
pub const STORED_EVENTS_TABLE: &str = "stored_events";

/// Default table name for snapshots
pub const SNAPSHOTS_TABLE: &str = "snapshots";

/// Default table name for notification tracking
pub const NOTIFICATION_TRACKING_TABLE: &str = "notification_tracking";

/// Stored domain events, one row per aggregate version.
///
/// `id` doubles as the notification id, so it auto-increments.
pub fn stored_event() -> SchemaTemplate {
   SchemaTemplate {
      name: "stored_event".to_string(),
      columns: vec![
         ColumnDef::new("id", ColumnType::BigInteger)
            .primary_key()
            .autoincrement(),
         ColumnDef::new("originator_id", ColumnType::Uuid),
         ColumnDef::new("originator_version", ColumnType::BigInteger),
         ColumnDef::new("topic", ColumnType::Text),
         ColumnDef::new("state", ColumnType::Blob),
      ],
      indexes: vec![IndexDef::new(
         "aggregate_idx",
         ["originator_id", "originator_version"],
         true,
      )],
   }
}

/// Aggregate snapshots, keyed by originator and version.
pub fn snapshot() -> SchemaTemplate {
   SchemaTemplate {
      name: "snapshot".to_string(),
      columns: vec![
         ColumnDef::new("originator_id", ColumnType::Uuid).primary_key(),
         ColumnDef::new("originator_version", ColumnType::BigInteger).primary_key(),
         ColumnDef::new("topic", ColumnType::Text),
         ColumnDef::new("state", ColumnType::Blob),
      ],
      indexes: Vec::new(),
   }
}

/// Positions of upstream notifications already processed by an application.
pub fn notification_tracking() -> SchemaTemplate {
   SchemaTemplate {
      name: "notification_tracking".to_string(),
      columns: vec![
         ColumnDef::new("application_name", ColumnType::Text).primary_key(),
         ColumnDef::new("notification_id", ColumnType::BigInteger).primary_key(),
      ],
      indexes: Vec::new(),
   }
}
