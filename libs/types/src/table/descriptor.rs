//! Rowset descriptors sent alongside rowset attachments
//!
//! Version and kind are kept as raw integers so a peer speaking a different
//! dialect is reported precisely instead of failing generic deserialization.

use super::schema::{ColumnSchema, TableSchema};
use super::value::ColumnValueType;
use crate::error::{Result, TypesError};
use crate::protocol::WIRE_FORMAT_VERSION;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
pub enum RowsetKind {
    Unversioned = 0,
    Versioned = 1,
}

impl RowsetKind {
    pub fn from_value(value: u32) -> Result<Self> {
        Self::try_from(value).map_err(|_| TypesError::UnknownRowsetKind { value })
    }
}

/// Name and type of one rowset column; both may be absent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: Option<String>,
    pub value_type: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsetDescriptor {
    pub wire_format_version: u32,
    pub rowset_kind: u32,
    pub columns: Vec<ColumnDescriptor>,
}

impl RowsetDescriptor {
    /// Descriptor for `schema` at the current wire format version
    pub fn for_schema(schema: &TableSchema, kind: RowsetKind) -> Self {
        Self {
            wire_format_version: WIRE_FORMAT_VERSION,
            rowset_kind: kind.into(),
            columns: schema
                .columns()
                .iter()
                .map(|column| ColumnDescriptor {
                    name: Some(column.name.clone()),
                    value_type: Some(column.value_type.value() as u32),
                })
                .collect(),
        }
    }

    /// Schema with every column as a value column
    ///
    /// Missing names become empty strings and missing or unknown types
    /// become `Null`, matching what proxies send for computed columns.
    pub fn to_schema(&self) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let value_type = column
                    .value_type
                    .and_then(|t| ColumnValueType::from_value(t).ok())
                    .unwrap_or(ColumnValueType::Null);
                ColumnSchema::value(column.name.clone().unwrap_or_default(), value_type)
            })
            .collect();

        TableSchema::from_value_columns(columns)
    }
}
