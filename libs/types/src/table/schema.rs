//! Table schemas
//!
//! A schema is an ordered list of columns; key columns always form a prefix.

use super::value::ColumnValueType;
use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub value_type: ColumnValueType,
    pub is_key: bool,
}

impl ColumnSchema {
    pub fn key(name: impl Into<String>, value_type: ColumnValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            is_key: true,
        }
    }

    pub fn value(name: impl Into<String>, value_type: ColumnValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            is_key: false,
        }
    }
}

/// Ordered column list with name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnSchema>,
    key_column_count: usize,
    unique_keys: bool,
    ids_by_name: HashMap<String, u32>,
}

impl TableSchema {
    /// Validate that key columns form a prefix and index names
    ///
    /// Duplicate names resolve to the first occurrence.
    pub fn new(columns: Vec<ColumnSchema>, unique_keys: bool) -> Result<Self> {
        let key_column_count = columns.iter().take_while(|c| c.is_key).count();
        if let Some((position, column)) = columns
            .iter()
            .enumerate()
            .skip(key_column_count)
            .find(|(_, c)| c.is_key)
        {
            return Err(TypesError::KeyColumnsNotPrefix {
                name: column.name.clone(),
                position,
            });
        }

        let mut ids_by_name = HashMap::with_capacity(columns.len());
        for (id, column) in columns.iter().enumerate() {
            ids_by_name.entry(column.name.clone()).or_insert(id as u32);
        }

        Ok(Self {
            columns,
            key_column_count,
            unique_keys,
            ids_by_name,
        })
    }

    /// Schema without key columns, which needs no prefix validation
    pub(crate) fn from_value_columns(columns: Vec<ColumnSchema>) -> Self {
        let columns: Vec<ColumnSchema> = columns
            .into_iter()
            .map(|c| ColumnSchema { is_key: false, ..c })
            .collect();
        let mut ids_by_name = HashMap::with_capacity(columns.len());
        for (id, column) in columns.iter().enumerate() {
            ids_by_name.entry(column.name.clone()).or_insert(id as u32);
        }
        Self {
            columns,
            key_column_count: 0,
            unique_keys: false,
            ids_by_name,
        }
    }

    pub fn builder() -> TableSchemaBuilder {
        TableSchemaBuilder::default()
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, id: u32) -> Option<&ColumnSchema> {
        self.columns.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn key_column_count(&self) -> usize {
        self.key_column_count
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.key_column_count]
    }

    pub fn value_columns(&self) -> &[ColumnSchema] {
        &self.columns[self.key_column_count..]
    }

    pub fn unique_keys(&self) -> bool {
        self.unique_keys
    }

    pub fn find_column(&self, name: &str) -> Option<u32> {
        self.ids_by_name.get(name).copied()
    }

    pub fn column_id(&self, name: &str) -> Result<u32> {
        self.find_column(name).ok_or_else(|| TypesError::UnknownColumn {
            name: name.to_string(),
        })
    }
}

/// Incremental schema construction
#[derive(Debug, Clone, Default)]
pub struct TableSchemaBuilder {
    columns: Vec<ColumnSchema>,
    unique_keys: bool,
}

impl TableSchemaBuilder {
    pub fn add_key(mut self, name: impl Into<String>, value_type: ColumnValueType) -> Self {
        self.columns.push(ColumnSchema::key(name, value_type));
        self
    }

    pub fn add_value(mut self, name: impl Into<String>, value_type: ColumnValueType) -> Self {
        self.columns.push(ColumnSchema::value(name, value_type));
        self
    }

    pub fn unique_keys(mut self, unique_keys: bool) -> Self {
        self.unique_keys = unique_keys;
        self
    }

    pub fn build(self) -> Result<TableSchema> {
        TableSchema::new(self.columns, self.unique_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix_and_lookup() {
        let schema = TableSchema::builder()
            .add_key("host", ColumnValueType::String)
            .add_key("ts", ColumnValueType::Uint64)
            .add_value("load", ColumnValueType::Double)
            .unique_keys(true)
            .build()
            .unwrap();

        assert_eq!(schema.key_column_count(), 2);
        assert_eq!(schema.value_columns().len(), 1);
        assert_eq!(schema.find_column("load"), Some(2));
        assert_eq!(schema.find_column("missing"), None);
        assert!(schema.column_id("missing").is_err());
        assert!(schema.unique_keys());
    }

    #[test]
    fn test_key_after_value_rejected() {
        let result = TableSchema::builder()
            .add_key("a", ColumnValueType::Int64)
            .add_value("b", ColumnValueType::Int64)
            .add_key("c", ColumnValueType::Int64)
            .build();

        assert_eq!(
            result.unwrap_err(),
            TypesError::KeyColumnsNotPrefix {
                name: "c".to_string(),
                position: 2
            }
        );
    }

    #[test]
    fn test_duplicate_names_resolve_to_first() {
        let schema = TableSchema::builder()
            .add_value("x", ColumnValueType::Int64)
            .add_value("x", ColumnValueType::String)
            .build()
            .unwrap();
        assert_eq!(schema.find_column("x"), Some(0));
        assert_eq!(schema.len(), 2);
    }
}
