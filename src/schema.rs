//! Record schema templates and the registry that binds them to table names

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::error::Error;

static GLOBAL_REGISTRY: LazyLock<Arc<SchemaRegistry>> =
   LazyLock::new(|| Arc::new(SchemaRegistry::new()));

/// SQL dialect of the backend a datastore is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
   Sqlite,
   Postgres,
   Other,
}

impl Dialect {
   /// Map a SQLx backend name (e.g. `"SQLite"`, `"PostgreSQL"`) to a dialect.
   pub fn from_backend_name(name: &str) -> Self {
      if name.eq_ignore_ascii_case("sqlite") {
         Dialect::Sqlite
      } else if name.eq_ignore_ascii_case("postgresql") || name.eq_ignore_ascii_case("postgres")
      {
         Dialect::Postgres
      } else {
         Dialect::Other
      }
   }
}

/// Logical column type, rendered per dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
   Integer,
   BigInteger,
   Text,
   /// Stored as its hyphenated text form on every dialect, since the `Any` driver
   /// binds ids as text
   Uuid,
   Blob,
}

impl ColumnType {
   fn sql_type(self, dialect: Dialect) -> &'static str {
      match (self, dialect) {
         (ColumnType::Integer, _) => "INTEGER",
         (ColumnType::BigInteger, Dialect::Sqlite) => "INTEGER",
         (ColumnType::BigInteger, _) => "BIGINT",
         (ColumnType::Text | ColumnType::Uuid, _) => "TEXT",
         (ColumnType::Blob, Dialect::Postgres) => "BYTEA",
         (ColumnType::Blob, _) => "BLOB",
      }
   }
}

/// A column declared by a [`SchemaTemplate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
   pub name: String,
   pub column_type: ColumnType,
   #[serde(default)]
   pub nullable: bool,
   #[serde(default)]
   pub primary_key: bool,
   /// Only honoured on a single-column integer primary key
   #[serde(default)]
   pub autoincrement: bool,
}

impl ColumnDef {
   /// A non-null column of the given type.
   pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
      Self {
         name: name.into(),
         column_type,
         nullable: false,
         primary_key: false,
         autoincrement: false,
      }
   }

   pub fn primary_key(mut self) -> Self {
      self.primary_key = true;
      self
   }

   pub fn autoincrement(mut self) -> Self {
      self.autoincrement = true;
      self
   }

   pub fn nullable(mut self) -> Self {
      self.nullable = true;
      self
   }
}

/// An index declared by a template.
///
/// The concrete index name is `{table_name}_{suffix}`, so tables built from the same
/// template never share index names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
   pub suffix: String,
   pub columns: Vec<String>,
   #[serde(default)]
   pub unique: bool,
}

impl IndexDef {
   pub fn new<I, S>(suffix: impl Into<String>, columns: I, unique: bool) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      Self {
         suffix: suffix.into(),
         columns: columns.into_iter().map(Into::into).collect(),
         unique,
      }
   }
}

/// A reusable column/index layout from which table-bound schemas are derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
   pub name: String,
   pub columns: Vec<ColumnDef>,
   #[serde(default)]
   pub indexes: Vec<IndexDef>,
}

/// An index bound to a concrete table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
   pub name: String,
   pub columns: Vec<String>,
   pub unique: bool,
}

/// A concrete schema: a template bound to a table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
   name: String,
   table_name: String,
   columns: Vec<ColumnDef>,
   indexes: Vec<Index>,
   template: Arc<SchemaTemplate>,
}

impl RecordSchema {
   /// Derive a schema for `table_name` from `template`.
   pub fn build(name: &str, table_name: &str, template: Arc<SchemaTemplate>) -> Self {
      let indexes = template
         .indexes
         .iter()
         .map(|index| Index {
            name: format!("{}_{}", table_name, index.suffix),
            columns: index.columns.clone(),
            unique: index.unique,
         })
         .collect();

      Self {
         name: name.to_string(),
         table_name: table_name.to_string(),
         columns: template.columns.clone(),
         indexes,
         template,
      }
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn table_name(&self) -> &str {
      &self.table_name
   }

   pub fn columns(&self) -> &[ColumnDef] {
      &self.columns
   }

   pub fn indexes(&self) -> &[Index] {
      &self.indexes
   }

   pub fn template(&self) -> &Arc<SchemaTemplate> {
      &self.template
   }

   /// `CREATE TABLE` and `CREATE INDEX` statements for this schema, idempotent.
   pub fn create_statements(&self, dialect: Dialect) -> Vec<String> {
      let primary_keys: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.primary_key).collect();
      let inline_pk = primary_keys.len() == 1;

      let mut definitions: Vec<String> = self
         .columns
         .iter()
         .map(|column| column_definition(column, dialect, inline_pk))
         .collect();

      if primary_keys.len() > 1 {
         let names: Vec<&str> = primary_keys.iter().map(|c| c.name.as_str()).collect();
         definitions.push(format!("PRIMARY KEY ({})", names.join(", ")));
      }

      let mut statements = vec![format!(
         "CREATE TABLE IF NOT EXISTS {} ({})",
         self.table_name,
         definitions.join(", ")
      )];

      statements.extend(self.indexes.iter().map(|index| {
         format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            self.table_name,
            index.columns.join(", ")
         )
      }));

      statements
   }
}

fn column_definition(column: &ColumnDef, dialect: Dialect, inline_pk: bool) -> String {
   if inline_pk && column.primary_key && column.autoincrement {
      return match dialect {
         // SQLite only accepts AUTOINCREMENT on exactly "INTEGER PRIMARY KEY"
         Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column.name),
         _ => format!("{} BIGSERIAL PRIMARY KEY", column.name),
      };
   }

   let mut definition = format!("{} {}", column.name, column.column_type.sql_type(dialect));
   if inline_pk && column.primary_key {
      definition.push_str(" PRIMARY KEY");
   } else if !column.nullable {
      definition.push_str(" NOT NULL");
   }
   definition
}

#[derive(Debug)]
struct RegistryEntry {
   schema: Arc<RecordSchema>,
   template: Arc<SchemaTemplate>,
}

/// Maps table names to the record schemas compiled for them.
///
/// A table name can be bound to only one template. Check-then-insert happens under a
/// single lock, so concurrent first-time definitions of the same table agree on one
/// schema instance.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
   entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl SchemaRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// The process-wide registry used by datastores that are not given their own.
   pub fn global() -> Arc<SchemaRegistry> {
      Arc::clone(&GLOBAL_REGISTRY)
   }

   /// Return the schema for `table_name`, building it from `template` on first use.
   ///
   /// Fails with [`Error::SchemaConflict`] if the table was already defined from a
   /// different template.
   pub fn define(
      &self,
      name: &str,
      table_name: &str,
      template: &SchemaTemplate,
   ) -> Result<Arc<RecordSchema>> {
      let mut entries = self.entries.lock();

      if let Some(entry) = entries.get(table_name) {
         if *entry.template != *template {
            return Err(Error::SchemaConflict {
               table: table_name.to_string(),
               existing: entry.template.name.clone(),
               requested: template.name.clone(),
            });
         }
         return Ok(Arc::clone(&entry.schema));
      }

      let template = Arc::new(template.clone());
      let schema = Arc::new(RecordSchema::build(name, table_name, Arc::clone(&template)));
      entries.insert(
         table_name.to_string(),
         RegistryEntry {
            schema: Arc::clone(&schema),
            template,
         },
      );

      debug!("Defined record schema {} for table {}", name, table_name);
      Ok(schema)
   }

   /// The schema previously defined for `table_name`, if any.
   pub fn get(&self, table_name: &str) -> Option<Arc<RecordSchema>> {
      self
         .entries
         .lock()
         .get(table_name)
         .map(|entry| Arc::clone(&entry.schema))
   }

   pub fn len(&self) -> usize {
      self.entries.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.lock().is_empty()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::templates;
   use proptest::prelude::*;

   #[test]
   fn test_index_names_are_namespaced_by_table() {
      let registry = SchemaRegistry::new();
      let template = templates::stored_event();

      let a = registry.define("A", "a_events", &template).unwrap();
      let b = registry.define("B", "b_events", &template).unwrap();

      assert_eq!(a.indexes()[0].name, "a_events_aggregate_idx");
      assert_eq!(b.indexes()[0].name, "b_events_aggregate_idx");
      assert!(a.indexes()[0].unique);
      assert_eq!(a.table_name(), "a_events");
      assert_eq!(a.name(), "A");
   }

   #[test]
   fn test_redefine_with_same_template_returns_same_schema() {
      let registry = SchemaRegistry::new();
      let template = templates::stored_event();

      let first = registry.define("R", "t", &template).unwrap();
      let second = registry.define("R2", "t", &template).unwrap();

      assert!(Arc::ptr_eq(&first, &second));
      assert_eq!(second.name(), "R");
      assert_eq!(registry.len(), 1);
   }

   #[test]
   fn test_redefine_with_other_template_conflicts() {
      let registry = SchemaRegistry::new();

      registry
         .define("R", "t", &templates::stored_event())
         .unwrap();
      let err = registry
         .define("R2", "t", &templates::snapshot())
         .unwrap_err();

      match err {
         Error::SchemaConflict {
            table,
            existing,
            requested,
         } => {
            assert_eq!(table, "t");
            assert_eq!(existing, "stored_event");
            assert_eq!(requested, "snapshot");
         }
         other => panic!("expected SchemaConflict, got {other:?}"),
      }

      // The original binding is untouched
      assert_eq!(registry.get("t").unwrap().template().name, "stored_event");
   }

   #[test]
   fn test_get_unknown_table() {
      let registry = SchemaRegistry::new();
      assert!(registry.get("nothing").is_none());
      assert!(registry.is_empty());
   }

   #[test]
   fn test_global_registry_is_shared() {
      assert!(Arc::ptr_eq(
         &SchemaRegistry::global(),
         &SchemaRegistry::global()
      ));
   }

   #[test]
   fn test_sqlite_ddl() {
      let schema = RecordSchema::build(
         "StoredEvent",
         "stored_events",
         Arc::new(templates::stored_event()),
      );
      let statements = schema.create_statements(Dialect::Sqlite);

      assert_eq!(statements.len(), 2);
      assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS stored_events ("));
      assert!(statements[0].contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
      assert!(statements[0].contains("state BLOB NOT NULL"));
      assert_eq!(
         statements[1],
         "CREATE UNIQUE INDEX IF NOT EXISTS stored_events_aggregate_idx ON stored_events (originator_id, originator_version)"
      );
   }

   #[test]
   fn test_postgres_ddl_composite_key() {
      let schema = RecordSchema::build(
         "Tracking",
         "tracking",
         Arc::new(templates::notification_tracking()),
      );
      let statements = schema.create_statements(Dialect::Postgres);

      assert_eq!(
         statements,
         vec![
            "CREATE TABLE IF NOT EXISTS tracking (application_name TEXT NOT NULL, notification_id BIGINT NOT NULL, PRIMARY KEY (application_name, notification_id))"
               .to_string()
         ]
      );
   }

   #[test]
   fn test_postgres_ddl_stores_ids_as_text() {
      let schema = RecordSchema::build(
         "StoredEvent",
         "stored_events",
         Arc::new(templates::stored_event()),
      );
      let statements = schema.create_statements(Dialect::Postgres);

      assert!(statements[0].contains("id BIGSERIAL PRIMARY KEY"));
      assert!(statements[0].contains("originator_id TEXT NOT NULL"));
      assert!(!statements[0].contains("UUID"));
      assert!(statements[0].contains("state BYTEA NOT NULL"));
   }

   #[test]
   fn test_dialect_from_backend_name() {
      assert_eq!(Dialect::from_backend_name("SQLite"), Dialect::Sqlite);
      assert_eq!(Dialect::from_backend_name("PostgreSQL"), Dialect::Postgres);
      assert_eq!(Dialect::from_backend_name("MySQL"), Dialect::Other);
   }

   proptest! {
      #[test]
      fn define_is_idempotent(
         table in "[a-z][a-z0-9_]{0,15}",
         names in proptest::collection::vec("[A-Z][a-zA-Z]{0,8}", 1..6),
         template_index in 0usize..3,
      ) {
         let template = match template_index {
            0 => templates::stored_event(),
            1 => templates::snapshot(),
            _ => templates::notification_tracking(),
         };
         let registry = SchemaRegistry::new();

         let first = registry.define(&names[0], &table, &template).unwrap();
         for name in &names {
            let again = registry.define(name, &table, &template).unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));
         }
         prop_assert_eq!(registry.len(), 1);
         prop_assert_eq!(first.table_name(), table.as_str());
      }
   }
}
