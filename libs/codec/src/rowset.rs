//! # Rowset Serialization
//!
//! ## Purpose
//!
//! Turns typed rows into rowset attachments plus a descriptor, and streams
//! received attachments back into rows through a pluggable consumer.
//!
//! ## Integration Points
//!
//! - **Descriptor**: travels in the response body, validated here for wire
//!   format version and rowset kind before any byte is interpreted
//! - **Attachments**: parts 2+ of the response message
//! - **Consumers**: collectors ([`UnversionedRowset`], [`VersionedRowset`]),
//!   closures, or [`MappedRowConsumer`] for caller-defined row types
//!
//! Building rows from loose values goes through [`convert_key_columns`] and
//! [`convert_value_columns`], which apply the coercion table of
//! [`Value::convert_to`].

use crate::error::{CodecError, CodecResult};
use crate::wire::{WireRowsetReader, WireRowsetWriter};
use bytes::Bytes;
use rpc_types::{
    RowsetDescriptor, RowsetKind, TableSchema, UnversionedRow, UnversionedValue, Value,
    VersionedRow, WIRE_FORMAT_VERSION,
};
use std::marker::PhantomData;
use tracing::trace;

/// Receives rows as they are decoded
pub trait RowConsumer<R> {
    /// Called once with the schema derived from the descriptor, before any row
    fn on_schema(&mut self, _schema: &TableSchema) -> CodecResult<()> {
        Ok(())
    }

    fn on_row(&mut self, row: R) -> CodecResult<()>;
}

impl<R, F> RowConsumer<R> for F
where
    F: FnMut(R) -> CodecResult<()>,
{
    fn on_row(&mut self, row: R) -> CodecResult<()> {
        self(row)
    }
}

/// Maps decoded rows onto a caller-defined type
pub trait FromUnversionedRow: Sized {
    fn from_row(schema: &TableSchema, row: &UnversionedRow) -> CodecResult<Self>;
}

/// Adapter that maps each row with [`FromUnversionedRow`] and hands the
/// result to `sink`
pub struct MappedRowConsumer<T, F> {
    schema: Option<TableSchema>,
    sink: F,
    _row: PhantomData<fn() -> T>,
}

impl<T, F> MappedRowConsumer<T, F>
where
    T: FromUnversionedRow,
    F: FnMut(T),
{
    pub fn new(sink: F) -> Self {
        Self {
            schema: None,
            sink,
            _row: PhantomData,
        }
    }
}

impl<T, F> RowConsumer<UnversionedRow> for MappedRowConsumer<T, F>
where
    T: FromUnversionedRow,
    F: FnMut(T),
{
    fn on_schema(&mut self, schema: &TableSchema) -> CodecResult<()> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn on_row(&mut self, row: UnversionedRow) -> CodecResult<()> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| CodecError::schema_mismatch("row received before schema"))?;
        let mapped = T::from_row(schema, &row)?;
        (self.sink)(mapped);
        Ok(())
    }
}

/// Collected unversioned rows with the schema they were decoded against
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnversionedRowset {
    schema: Option<TableSchema>,
    rows: Vec<UnversionedRow>,
}

impl UnversionedRowset {
    pub fn from_wire(descriptor: &RowsetDescriptor, attachments: &[Bytes]) -> CodecResult<Self> {
        let mut rowset = Self::default();
        deserialize_unversioned_rowset(descriptor, attachments, &mut rowset)?;
        Ok(rowset)
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    pub fn rows(&self) -> &[UnversionedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<UnversionedRow> {
        self.rows
    }
}

impl RowConsumer<UnversionedRow> for UnversionedRowset {
    fn on_schema(&mut self, schema: &TableSchema) -> CodecResult<()> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn on_row(&mut self, row: UnversionedRow) -> CodecResult<()> {
        self.rows.push(row);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionedRowset {
    schema: Option<TableSchema>,
    rows: Vec<VersionedRow>,
}

impl VersionedRowset {
    pub fn from_wire(descriptor: &RowsetDescriptor, attachments: &[Bytes]) -> CodecResult<Self> {
        let mut rowset = Self::default();
        deserialize_versioned_rowset(descriptor, attachments, &mut rowset)?;
        Ok(rowset)
    }

    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    pub fn rows(&self) -> &[VersionedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<VersionedRow> {
        self.rows
    }
}

impl RowConsumer<VersionedRow> for VersionedRowset {
    fn on_schema(&mut self, schema: &TableSchema) -> CodecResult<()> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn on_row(&mut self, row: VersionedRow) -> CodecResult<()> {
        self.rows.push(row);
        Ok(())
    }
}

/// Descriptor for an unversioned rowset over `schema`
pub fn make_rowset_descriptor(schema: &TableSchema) -> RowsetDescriptor {
    RowsetDescriptor::for_schema(schema, RowsetKind::Unversioned)
}

pub fn deserialize_rowset_schema(descriptor: &RowsetDescriptor) -> TableSchema {
    descriptor.to_schema()
}

/// Reject descriptors this client cannot interpret
pub fn validate_descriptor(descriptor: &RowsetDescriptor, expected: RowsetKind) -> CodecResult<()> {
    if descriptor.wire_format_version != WIRE_FORMAT_VERSION {
        return Err(CodecError::UnsupportedWireFormat {
            expected: WIRE_FORMAT_VERSION,
            actual: descriptor.wire_format_version,
        });
    }
    if descriptor.rowset_kind != u32::from(expected) {
        return Err(CodecError::WrongRowsetKind {
            expected,
            actual: descriptor.rowset_kind,
        });
    }
    Ok(())
}

fn check_cell_ids<'a>(
    schema: &TableSchema,
    cells: impl IntoIterator<Item = &'a UnversionedValue>,
) -> CodecResult<()> {
    for cell in cells {
        if schema.column(cell.id()).is_none() {
            return Err(CodecError::schema_mismatch(format!(
                "column id {} outside schema of {} columns",
                cell.id(),
                schema.len()
            )));
        }
    }
    Ok(())
}

/// Cells must be null or match their column's declared type
fn check_cell_types<'a>(
    schema: &TableSchema,
    cells: impl IntoIterator<Item = &'a UnversionedValue>,
) -> CodecResult<()> {
    for cell in cells {
        let column = schema.column(cell.id()).ok_or_else(|| {
            CodecError::schema_mismatch(format!(
                "column id {} outside schema of {} columns",
                cell.id(),
                schema.len()
            ))
        })?;
        if !cell.value().is_null() && cell.value_type() != column.value_type {
            return Err(CodecError::ValueConversion {
                column: column.name.clone(),
                expected: column.value_type,
                actual: cell.value_type(),
            });
        }
    }
    Ok(())
}

pub fn deserialize_unversioned_rowset<C>(
    descriptor: &RowsetDescriptor,
    attachments: &[Bytes],
    consumer: &mut C,
) -> CodecResult<TableSchema>
where
    C: RowConsumer<UnversionedRow> + ?Sized,
{
    validate_descriptor(descriptor, RowsetKind::Unversioned)?;
    let schema = descriptor.to_schema();
    consumer.on_schema(&schema)?;

    let mut reader = WireRowsetReader::new(attachments);
    let count = reader.read_row_count()?;
    for _ in 0..count {
        let row = reader.read_unversioned_row()?;
        check_cell_ids(&schema, row.values())?;
        consumer.on_row(row)?;
    }
    trace!(rows = count, columns = schema.len(), "Decoded unversioned rowset");
    Ok(schema)
}

pub fn deserialize_versioned_rowset<C>(
    descriptor: &RowsetDescriptor,
    attachments: &[Bytes],
    consumer: &mut C,
) -> CodecResult<TableSchema>
where
    C: RowConsumer<VersionedRow> + ?Sized,
{
    validate_descriptor(descriptor, RowsetKind::Versioned)?;
    let schema = descriptor.to_schema();
    consumer.on_schema(&schema)?;

    let mut reader = WireRowsetReader::new(attachments);
    let count = reader.read_row_count()?;
    for _ in 0..count {
        let row = reader.read_versioned_row()?;
        check_cell_ids(&schema, row.keys())?;
        check_cell_ids(&schema, row.values().iter().map(|v| v.as_unversioned()))?;
        consumer.on_row(row)?;
    }
    trace!(rows = count, columns = schema.len(), "Decoded versioned rowset");
    Ok(schema)
}

pub fn serialize_unversioned_rowset(
    schema: &TableSchema,
    rows: &[UnversionedRow],
) -> CodecResult<(RowsetDescriptor, Vec<Bytes>)> {
    let mut writer = WireRowsetWriter::new();
    writer.write_row_count(rows.len());
    for row in rows {
        check_cell_types(schema, row.values())?;
        writer.write_unversioned_row(row);
    }
    Ok((
        RowsetDescriptor::for_schema(schema, RowsetKind::Unversioned),
        writer.finish(),
    ))
}

pub fn serialize_versioned_rowset(
    schema: &TableSchema,
    rows: &[VersionedRow],
) -> CodecResult<(RowsetDescriptor, Vec<Bytes>)> {
    let mut writer = WireRowsetWriter::new();
    writer.write_row_count(rows.len());
    for row in rows {
        check_cell_types(schema, row.keys())?;
        check_cell_types(schema, row.values().iter().map(|v| v.as_unversioned()))?;
        writer.write_versioned_row(row);
    }
    Ok((
        RowsetDescriptor::for_schema(schema, RowsetKind::Versioned),
        writer.finish(),
    ))
}

/// How loose values are turned into typed cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Leave null value columns out of the row instead of writing null cells
    pub skip_missing_values: bool,
    /// Mark value cells as aggregate
    pub aggregate: bool,
    /// Write typed nulls for absent or unconvertible values instead of failing
    pub accept_missing_values: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            skip_missing_values: false,
            aggregate: false,
            accept_missing_values: true,
        }
    }
}

fn convert_cell(
    schema: &TableSchema,
    id: u32,
    input: Option<&Value>,
    aggregate: bool,
    options: &ConvertOptions,
) -> CodecResult<UnversionedValue> {
    let column = schema
        .column(id)
        .ok_or_else(|| CodecError::schema_mismatch(format!("no column with id {}", id)))?;

    let input = match input {
        Some(value) => value,
        None if options.accept_missing_values => return Ok(UnversionedValue::null(id)),
        None => {
            return Err(CodecError::schema_mismatch(format!(
                "missing value for column '{}'",
                column.name
            )))
        }
    };

    match input.convert_to(column.value_type) {
        Some(value) => Ok(UnversionedValue::new(id, aggregate, value)),
        None if input.is_null() || options.accept_missing_values => {
            Ok(UnversionedValue::new(id, aggregate, Value::Null))
        }
        None => Err(CodecError::ValueConversion {
            column: column.name.clone(),
            expected: column.value_type,
            actual: input.value_type(),
        }),
    }
}

/// Append the key prefix of `values` to `row`, positionally
pub fn convert_key_columns(
    row: &mut Vec<UnversionedValue>,
    schema: &TableSchema,
    values: &[Value],
    options: &ConvertOptions,
) -> CodecResult<()> {
    for id in 0..schema.key_column_count() {
        row.push(convert_cell(schema, id as u32, values.get(id), false, options)?);
    }
    Ok(())
}

/// Append the value columns of `values` to `row`
///
/// Values past the end of `values` are left out of the row.
pub fn convert_value_columns(
    row: &mut Vec<UnversionedValue>,
    schema: &TableSchema,
    values: &[Value],
    options: &ConvertOptions,
) -> CodecResult<()> {
    let end = schema.len().min(values.len());
    for id in schema.key_column_count()..end {
        let input = &values[id];
        if input.is_null() && options.skip_missing_values {
            continue;
        }
        row.push(convert_cell(
            schema,
            id as u32,
            Some(input),
            options.aggregate,
            options,
        )?);
    }
    Ok(())
}

/// Build a full row from positional values
pub fn build_unversioned_row(
    schema: &TableSchema,
    values: &[Value],
    options: &ConvertOptions,
) -> CodecResult<UnversionedRow> {
    let mut row = Vec::with_capacity(schema.len());
    convert_key_columns(&mut row, schema, values, options)?;
    convert_value_columns(&mut row, schema, values, options)?;
    Ok(UnversionedRow::new(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_types::{ColumnValueType, VersionedValue};

    fn schema() -> TableSchema {
        TableSchema::builder()
            .add_key("host", ColumnValueType::String)
            .add_value("load", ColumnValueType::Double)
            .add_value("cores", ColumnValueType::Uint64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_unversioned_round_trip() {
        let schema = schema();
        let rows = vec![
            build_unversioned_row(
                &schema,
                &[Value::from("n1"), Value::Double(0.5), Value::Int64(8)],
                &ConvertOptions::default(),
            )
            .unwrap(),
            build_unversioned_row(
                &schema,
                &[Value::from("n2"), Value::Null, Value::Null],
                &ConvertOptions::default(),
            )
            .unwrap(),
        ];

        let (descriptor, attachments) = serialize_unversioned_rowset(&schema, &rows).unwrap();
        let rowset = UnversionedRowset::from_wire(&descriptor, &attachments).unwrap();

        assert_eq!(rowset.rows(), &rows[..]);
        assert_eq!(rowset.rows()[0].get(2), Some(&Value::Uint64(8)));
        assert_eq!(rowset.schema().map(|s| s.len()), Some(3));
    }

    #[test]
    fn test_versioned_round_trip() {
        let schema = schema();
        let rows = vec![VersionedRow::new(
            vec![100, 200],
            vec![150],
            vec![UnversionedValue::new(0, false, Value::from("n1"))],
            vec![
                VersionedValue::new(1, false, Value::Double(0.1), 100),
                VersionedValue::new(1, true, Value::Double(0.2), 200),
            ],
        )];

        let (descriptor, attachments) = serialize_versioned_rowset(&schema, &rows).unwrap();
        assert_eq!(descriptor.rowset_kind, u32::from(RowsetKind::Versioned));
        let rowset = VersionedRowset::from_wire(&descriptor, &attachments).unwrap();
        assert_eq!(rowset.into_rows(), rows);
    }

    #[test]
    fn test_descriptor_validation() {
        let schema = schema();
        let (mut descriptor, attachments) = serialize_unversioned_rowset(&schema, &[]).unwrap();

        assert!(matches!(
            VersionedRowset::from_wire(&descriptor, &attachments),
            Err(CodecError::WrongRowsetKind {
                expected: RowsetKind::Versioned,
                actual: 0
            })
        ));

        descriptor.wire_format_version = WIRE_FORMAT_VERSION + 1;
        assert_eq!(
            UnversionedRowset::from_wire(&descriptor, &attachments).unwrap_err(),
            CodecError::UnsupportedWireFormat {
                expected: WIRE_FORMAT_VERSION,
                actual: WIRE_FORMAT_VERSION + 1
            }
        );
    }

    #[test]
    fn test_serialize_rejects_mistyped_cells() {
        let schema = schema();
        let row = UnversionedRow::new(vec![UnversionedValue::new(1, false, Value::from("x"))]);
        assert!(matches!(
            serialize_unversioned_rowset(&schema, &[row]),
            Err(CodecError::ValueConversion { .. })
        ));

        let row = UnversionedRow::new(vec![UnversionedValue::null(9)]);
        assert!(matches!(
            serialize_unversioned_rowset(&schema, &[row]),
            Err(CodecError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_missing_value_tolerance() {
        let schema = schema();
        let values = [Value::from("n1"), Value::from("not a number")];

        let row = build_unversioned_row(&schema, &values, &ConvertOptions::default()).unwrap();
        assert_eq!(row.get(1), Some(&Value::Null));
        assert_eq!(row.values()[1].value_type(), ColumnValueType::Null);
        assert_eq!(row.len(), 2);

        let strict = ConvertOptions {
            accept_missing_values: false,
            ..ConvertOptions::default()
        };
        assert!(matches!(
            build_unversioned_row(&schema, &values, &strict),
            Err(CodecError::ValueConversion { .. })
        ));
        assert!(matches!(
            build_unversioned_row(&schema, &[], &strict),
            Err(CodecError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_skip_missing_and_aggregate() {
        let schema = schema();
        let options = ConvertOptions {
            skip_missing_values: true,
            aggregate: true,
            ..ConvertOptions::default()
        };
        let row = build_unversioned_row(
            &schema,
            &[Value::from("n1"), Value::Null, Value::Uint64(4)],
            &options,
        )
        .unwrap();

        assert_eq!(row.len(), 2);
        assert!(!row.values()[0].is_aggregate());
        assert!(row.values()[1].is_aggregate());
        assert_eq!(row.values()[1].id(), 2);
    }

    #[test]
    fn test_mapped_consumer() {
        struct Host {
            name: String,
            load: Option<f64>,
        }

        impl FromUnversionedRow for Host {
            fn from_row(schema: &TableSchema, row: &UnversionedRow) -> CodecResult<Self> {
                let name = match row.get(schema.column_id("host")?) {
                    Some(Value::String(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                    _ => return Err(CodecError::schema_mismatch("host is not a string")),
                };
                let load = match row.get(schema.column_id("load")?) {
                    Some(Value::Double(v)) => Some(*v),
                    _ => None,
                };
                Ok(Host { name, load })
            }
        }

        let schema = schema();
        let rows = vec![build_unversioned_row(
            &schema,
            &[Value::from("n7"), Value::Double(1.5)],
            &ConvertOptions::default(),
        )
        .unwrap()];
        let (descriptor, attachments) = serialize_unversioned_rowset(&schema, &rows).unwrap();

        let mut hosts = Vec::new();
        let mut consumer = MappedRowConsumer::new(|host: Host| hosts.push(host));
        deserialize_unversioned_rowset(&descriptor, &attachments, &mut consumer).unwrap();
        drop(consumer);

        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "n7");
        assert_eq!(hosts[0].load, Some(1.5));
    }

    #[test]
    fn test_closure_consumer_stops_on_error() {
        let schema = schema();
        let rows: Vec<UnversionedRow> = (0..3)
            .map(|i| {
                build_unversioned_row(
                    &schema,
                    &[Value::from(format!("n{}", i))],
                    &ConvertOptions::default(),
                )
                .unwrap()
            })
            .collect();
        let (descriptor, attachments) = serialize_unversioned_rowset(&schema, &rows).unwrap();

        let mut seen = 0;
        let mut consumer = |_row: UnversionedRow| -> CodecResult<()> {
            seen += 1;
            if seen == 2 {
                return Err(CodecError::schema_mismatch("stop"));
            }
            Ok(())
        };
        assert!(deserialize_unversioned_rowset(&descriptor, &attachments, &mut consumer).is_err());
        assert_eq!(seen, 2);
    }
}
