//! Rowset round-trip and descriptor validation properties

use bytes::Bytes;
use proptest::prelude::*;
use rpc_codec::{
    serialize_unversioned_rowset, serialize_versioned_rowset, CodecError, UnversionedRowset,
    VersionedRowset,
};
use rpc_types::{
    ColumnSchema, ColumnValueType, TableSchema, UnversionedRow, UnversionedValue, Value,
    VersionedRow, VersionedValue, WIRE_FORMAT_VERSION,
};

fn value_type() -> impl Strategy<Value = ColumnValueType> {
    prop_oneof![
        Just(ColumnValueType::Int64),
        Just(ColumnValueType::Uint64),
        Just(ColumnValueType::Double),
        Just(ColumnValueType::Boolean),
        Just(ColumnValueType::String),
        Just(ColumnValueType::Any),
    ]
}

fn schema() -> impl Strategy<Value = TableSchema> {
    (prop::collection::vec(value_type(), 1..8), 0usize..4).prop_map(|(types, keys)| {
        let keys = keys.min(types.len());
        let columns = types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| {
                if i < keys {
                    ColumnSchema::key(format!("k{}", i), ty)
                } else {
                    ColumnSchema::value(format!("v{}", i), ty)
                }
            })
            .collect();
        TableSchema::new(columns, false).unwrap()
    })
}

/// Payload of `ty`, or null
fn value_of(ty: ColumnValueType) -> BoxedStrategy<Value> {
    let typed = match ty {
        ColumnValueType::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        ColumnValueType::Uint64 => any::<u64>().prop_map(Value::Uint64).boxed(),
        ColumnValueType::Double => (-1e12f64..1e12).prop_map(Value::Double).boxed(),
        ColumnValueType::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        ColumnValueType::String => ".{0,12}".prop_map(Value::from).boxed(),
        ColumnValueType::Any => prop::collection::vec(any::<u8>(), 0..16)
            .prop_map(|b| Value::Any(Bytes::from(b)))
            .boxed(),
        ColumnValueType::Null => Just(Value::Null).boxed(),
    };
    prop_oneof![1 => Just(Value::Null), 4 => typed].boxed()
}

fn row_for(schema: &TableSchema) -> BoxedStrategy<UnversionedRow> {
    let cells: Vec<BoxedStrategy<UnversionedValue>> = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(id, column)| {
            let is_key = column.is_key;
            (value_of(column.value_type), any::<bool>())
                .prop_map(move |(value, aggregate)| {
                    UnversionedValue::new(id as u32, aggregate && !is_key, value)
                })
                .boxed()
        })
        .collect();
    cells.prop_map(UnversionedRow::new).boxed()
}

fn schema_and_rows() -> impl Strategy<Value = (TableSchema, Vec<UnversionedRow>)> {
    schema().prop_flat_map(|schema| {
        let rows = prop::collection::vec(row_for(&schema), 0..6);
        (Just(schema), rows)
    })
}

proptest! {
    #[test]
    fn unversioned_rowset_round_trips((schema, rows) in schema_and_rows()) {
        let (descriptor, attachments) = serialize_unversioned_rowset(&schema, &rows).unwrap();
        let decoded = UnversionedRowset::from_wire(&descriptor, &attachments).unwrap();
        prop_assert_eq!(decoded.rows(), &rows[..]);
    }

    #[test]
    fn versioned_rowset_round_trips(
        (schema, rows) in schema_and_rows(),
        timestamps in prop::collection::vec(any::<u64>(), 0..4),
    ) {
        let key_count = schema.key_column_count();
        let versioned: Vec<VersionedRow> = rows
            .into_iter()
            .map(|row| {
                let (keys, values): (Vec<_>, Vec<_>) = row
                    .into_values()
                    .into_iter()
                    .partition(|cell| (cell.id() as usize) < key_count);
                let values = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let aggregate = cell.is_aggregate();
                        VersionedValue::new(cell.id(), aggregate, cell.into_value(), i as u64 * 10)
                    })
                    .collect();
                VersionedRow::new(timestamps.clone(), Vec::new(), keys, values)
            })
            .collect();

        let (descriptor, attachments) = serialize_versioned_rowset(&schema, &versioned).unwrap();
        let decoded = VersionedRowset::from_wire(&descriptor, &attachments).unwrap();
        prop_assert_eq!(decoded.into_rows(), versioned);
    }

    #[test]
    fn foreign_wire_version_is_rejected(
        (schema, rows) in schema_and_rows(),
        version in any::<u32>().prop_filter("current version", |v| *v != WIRE_FORMAT_VERSION),
    ) {
        let (mut descriptor, attachments) = serialize_unversioned_rowset(&schema, &rows).unwrap();
        descriptor.wire_format_version = version;
        let result = UnversionedRowset::from_wire(&descriptor, &attachments);
        prop_assert_eq!(
            result.unwrap_err(),
            CodecError::UnsupportedWireFormat { expected: WIRE_FORMAT_VERSION, actual: version }
        );
    }
}
