//! Schema Snapshot
//!
//! Normalized, immutable view of a database's tables, columns and foreign keys.
//! A snapshot is built once per generation cycle and rebuilt on demand; nothing here
//! diffs or mutates an existing snapshot.

use crate::error::{Result, SqlBuddyError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            is_primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    /// Foreign keys form a set: adding the same reference twice is a no-op.
    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.add_foreign_key(ForeignKey {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        });
        self
    }

    fn add_foreign_key(&mut self, fk: ForeignKey) {
        if !self.foreign_keys.contains(&fk) {
            self.foreign_keys.push(fk);
        }
    }

    /// Column lookup, exact match first, then case-insensitive
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A foreign key viewed from the schema level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub database: Option<String>,
    pub total_tables: usize,
    pub total_columns: usize,
    pub total_relationships: usize,
    pub table_names: Vec<String>,
}

/// One row of column metadata as returned by information-schema introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
}

/// One row of foreign-key metadata as returned by information-schema introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRow {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    database: Option<String>,
    tables: Vec<TableInfo>,
}

impl SchemaSnapshot {
    /// Build a snapshot, rejecting duplicate table names or duplicate column names
    /// within a table.
    pub fn new(tables: Vec<TableInfo>) -> Result<Self> {
        let mut table_names = HashSet::new();
        for table in &tables {
            if !table_names.insert(table.name.as_str()) {
                return Err(SqlBuddyError::Schema(format!(
                    "Duplicate table name in snapshot: {}",
                    table.name
                )));
            }
            let mut column_names = HashSet::new();
            for column in &table.columns {
                if !column_names.insert(column.name.as_str()) {
                    return Err(SqlBuddyError::Schema(format!(
                        "Duplicate column name {} in table {}",
                        column.name, table.name
                    )));
                }
            }
        }

        Ok(Self {
            database: None,
            tables,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Assemble a snapshot from flat introspection rows.
    ///
    /// Table order follows the first appearance of each table in `columns`; column order
    /// follows row order.
    pub fn from_rows(
        columns: Vec<ColumnRow>,
        primary_keys: Vec<(String, String)>,
        foreign_keys: Vec<ForeignKeyRow>,
    ) -> Result<Self> {
        let pk_set: HashSet<(String, String)> = primary_keys.into_iter().collect();
        let mut tables: Vec<TableInfo> = Vec::new();

        for row in columns {
            let is_pk = pk_set.contains(&(row.table.clone(), row.column.clone()));
            let column = ColumnInfo {
                name: row.column,
                data_type: row.data_type,
                nullable: row.nullable && !is_pk,
                is_primary_key: is_pk,
            };
            match tables.iter_mut().find(|t| t.name == row.table) {
                Some(table) => table.columns.push(column),
                None => tables.push(TableInfo::new(row.table).with_column(column)),
            }
        }

        for fk in foreign_keys {
            if let Some(table) = tables.iter_mut().find(|t| t.name == fk.table) {
                table.add_foreign_key(ForeignKey {
                    column: fk.column,
                    referenced_table: fk.referenced_table,
                    referenced_column: fk.referenced_column,
                });
            }
        }

        Self::new(tables)
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table lookup, exact match first, then case-insensitive
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .or_else(|| self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.tables
            .iter()
            .flat_map(|t| {
                t.foreign_keys.iter().map(move |fk| Relationship {
                    from_table: t.name.clone(),
                    from_column: fk.column.clone(),
                    to_table: fk.referenced_table.clone(),
                    to_column: fk.referenced_column.clone(),
                })
            })
            .collect()
    }

    pub fn summary(&self) -> SchemaSummary {
        SchemaSummary {
            database: self.database.clone(),
            total_tables: self.tables.len(),
            total_columns: self.tables.iter().map(|t| t.columns.len()).sum(),
            total_relationships: self.tables.iter().map(|t| t.foreign_keys.len()).sum(),
            table_names: self.tables.iter().map(|t| t.name.clone()).collect(),
        }
    }

    /// Token-lean listing used inside prompts:
    /// `orders(id integer PK, user_id integer NOT NULL)` followed by `  FK` lines.
    pub fn render_compact(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut col = format!("{} {}", c.name, c.data_type);
                    if c.is_primary_key {
                        col.push_str(" PK");
                    } else if !c.nullable {
                        col.push_str(" NOT NULL");
                    }
                    col
                })
                .collect();
            out.push_str(&format!("{}({})\n", table.name, columns.join(", ")));
            for fk in &table.foreign_keys {
                out.push_str(&format!(
                    "  FK {} -> {}.{}\n",
                    fk.column, fk.referenced_table, fk.referenced_column
                ));
            }
        }
        out
    }

    /// Human-oriented listing for the `schema` command
    pub fn render_detailed(&self) -> String {
        let rule = "=".repeat(80);
        let thin = "-".repeat(40);
        let mut out = Vec::new();

        out.push(format!(
            "Database: {}",
            self.database.as_deref().unwrap_or("(unnamed)")
        ));
        out.push(rule);

        for table in &self.tables {
            out.push(String::new());
            out.push(format!("Table: {}", table.name));
            out.push(thin.clone());

            let pks = table.primary_keys();
            if !pks.is_empty() {
                out.push(format!("Primary Key(s): {}", pks.join(", ")));
            }

            out.push("Columns:".to_string());
            for c in &table.columns {
                let nullable = if c.nullable { "NULL" } else { "NOT NULL" };
                out.push(format!("  - {}: {} {}", c.name, c.data_type, nullable));
            }

            if !table.foreign_keys.is_empty() {
                out.push("Foreign Keys:".to_string());
                for fk in &table.foreign_keys {
                    out.push(format!(
                        "  - {} → {}.{}",
                        fk.column, fk.referenced_table, fk.referenced_column
                    ));
                }
            }
        }

        let relationships = self.relationships();
        if !relationships.is_empty() {
            out.push(String::new());
            out.push("Relationships Summary:".to_string());
            out.push(thin);
            for rel in relationships {
                out.push(format!(
                    "  {}.{} → {}.{}",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column
                ));
            }
        }

        out.join("\n")
    }
}
