use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// column -> data type
pub type TableSchema = BTreeMap<String, String>;

/// table -> columns
pub type Schema = BTreeMap<String, TableSchema>;

/// Last known warehouse schema for a destination namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhSchema {
    pub id: i64,
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub schema: Schema,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What has to change in the warehouse before a table can be loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchemaDiff {
    pub table_to_be_created: bool,
    pub added_columns: TableSchema,
    pub altered_columns: TableSchema,
    /// Warehouse schema of the table once the diff is applied
    pub updated_schema: TableSchema,
}

impl TableSchemaDiff {
    /// Compares the upload's view of a table against the warehouse one.
    pub fn compute(in_warehouse: &TableSchema, in_upload: &TableSchema) -> Self {
        if in_warehouse.is_empty() {
            return Self {
                table_to_be_created: !in_upload.is_empty(),
                added_columns: in_upload.clone(),
                altered_columns: TableSchema::new(),
                updated_schema: in_upload.clone(),
            };
        }

        let mut diff = Self {
            updated_schema: in_warehouse.clone(),
            ..Self::default()
        };
        for (column, data_type) in in_upload {
            match in_warehouse.get(column) {
                None => {
                    diff.added_columns.insert(column.clone(), data_type.clone());
                    diff.updated_schema.insert(column.clone(), data_type.clone());
                },
                Some(current) if current == "string" && data_type == "text" => {
                    diff.altered_columns.insert(column.clone(), data_type.clone());
                    diff.updated_schema.insert(column.clone(), data_type.clone());
                },
                Some(_) => {},
            }
        }
        diff
    }

    pub fn exists(&self) -> bool {
        self.table_to_be_created || !self.added_columns.is_empty() || !self.altered_columns.is_empty()
    }
}
