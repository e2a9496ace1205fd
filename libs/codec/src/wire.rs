//! Low-level rowset wire reader and writer
//!
//! ```text
//! rowset   := varint(row count) row*
//! row      := varint(cell count) cell*                       (unversioned)
//!           | varint(n) u64* varint(n) u64*                   (write / delete timestamps)
//!             varint(n) cell* varint(n) (cell u64)*           (keys, timestamped values)
//! cell     := varint(column id) u8(type | 0x80 if aggregate) varint(len) payload
//! ```
//!
//! Integers and doubles are 8 bytes little-endian, booleans one byte, nulls
//! carry no payload; strings and any-values are raw bytes.

use crate::error::{CodecError, CodecResult};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use rpc_types::{
    ColumnValueType, UnversionedRow, UnversionedValue, Value, VersionedRow, VersionedValue,
};

const AGGREGATE_FLAG: u8 = 0x80;
const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Default)]
pub struct WireRowsetWriter {
    buf: Vec<u8>,
}

impl WireRowsetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn write_u64(&mut self, value: u64) {
        let mut raw = [0u8; 8];
        LittleEndian::write_u64(&mut raw, value);
        self.buf.extend_from_slice(&raw);
    }

    pub fn write_row_count(&mut self, count: usize) {
        self.write_varint(count as u64);
    }

    pub fn write_value(&mut self, value: &UnversionedValue) {
        self.write_varint(value.id() as u64);
        let mut tag = value.value_type().value();
        if value.is_aggregate() {
            tag |= AGGREGATE_FLAG;
        }
        self.buf.push(tag);

        match value.value() {
            Value::Null => self.write_varint(0),
            Value::Int64(v) => {
                self.write_varint(8);
                self.write_u64(*v as u64);
            }
            Value::Uint64(v) => {
                self.write_varint(8);
                self.write_u64(*v);
            }
            Value::Double(v) => {
                self.write_varint(8);
                self.write_u64(v.to_bits());
            }
            Value::Boolean(v) => {
                self.write_varint(1);
                self.buf.push(u8::from(*v));
            }
            Value::String(bytes) | Value::Any(bytes) => {
                self.write_varint(bytes.len() as u64);
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    pub fn write_unversioned_row(&mut self, row: &UnversionedRow) {
        self.write_varint(row.len() as u64);
        for value in row.values() {
            self.write_value(value);
        }
    }

    pub fn write_versioned_row(&mut self, row: &VersionedRow) {
        for timestamps in [row.write_timestamps(), row.delete_timestamps()] {
            self.write_varint(timestamps.len() as u64);
            for ts in timestamps {
                self.write_u64(*ts);
            }
        }
        self.write_varint(row.keys().len() as u64);
        for key in row.keys() {
            self.write_value(key);
        }
        self.write_varint(row.values().len() as u64);
        for value in row.values() {
            self.write_value(value.as_unversioned());
            self.write_u64(value.timestamp());
        }
    }

    /// Encoded rowset as attachments
    pub fn finish(self) -> Vec<Bytes> {
        vec![Bytes::from(self.buf)]
    }
}

/// Cursor over rowset bytes; attachments are read as one stream
#[derive(Debug)]
pub struct WireRowsetReader {
    data: Bytes,
    pos: usize,
}

impl WireRowsetReader {
    pub fn new(attachments: &[Bytes]) -> Self {
        let data = match attachments {
            [single] => single.clone(),
            many => Bytes::from(many.concat()),
        };
        Self { data, pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize, context: &str) -> CodecResult<Bytes> {
        if self.remaining() < len {
            return Err(CodecError::truncated(len, self.remaining(), context));
        }
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    pub fn read_varint(&mut self) -> CodecResult<u64> {
        let mut result = 0u64;
        for index in 0..MAX_VARINT_BYTES {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| CodecError::truncated(1, 0, "varint"))?;
            self.pos += 1;
            result |= u64::from(byte & 0x7f) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::schema_mismatch("varint longer than 10 bytes"))
    }

    fn read_len(&mut self, context: &str) -> CodecResult<usize> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| CodecError::schema_mismatch(format!("{} length {} too large", context, len)))?;
        if len > self.remaining() {
            // Each counted item takes at least one byte
            return Err(CodecError::truncated(len, self.remaining(), context));
        }
        Ok(len)
    }

    fn read_u64(&mut self, context: &str) -> CodecResult<u64> {
        let raw = self.take(8, context)?;
        Ok(LittleEndian::read_u64(&raw))
    }

    pub fn read_row_count(&mut self) -> CodecResult<usize> {
        self.read_len("row count")
    }

    pub fn read_value(&mut self) -> CodecResult<UnversionedValue> {
        let id = u32::try_from(self.read_varint()?)
            .map_err(|_| CodecError::schema_mismatch("column id exceeds u32"))?;
        let tag = *self
            .take(1, "cell type tag")?
            .first()
            .ok_or_else(|| CodecError::truncated(1, 0, "cell type tag"))?;
        let aggregate = tag & AGGREGATE_FLAG != 0;
        let value_type = ColumnValueType::from_value(u32::from(tag & !AGGREGATE_FLAG))?;

        let len = self.read_len("cell payload")?;
        if let Some(width) = value_type.fixed_width() {
            if width != len {
                return Err(CodecError::schema_mismatch(format!(
                    "{:?} cell for column {} has payload length {}, expected {}",
                    value_type, id, len, width
                )));
            }
        }
        let payload = self.take(len, "cell payload")?;

        let value = match value_type {
            ColumnValueType::Null => Value::Null,
            ColumnValueType::Int64 => Value::Int64(LittleEndian::read_i64(&payload)),
            ColumnValueType::Uint64 => Value::Uint64(LittleEndian::read_u64(&payload)),
            ColumnValueType::Double => Value::Double(LittleEndian::read_f64(&payload)),
            ColumnValueType::Boolean => Value::Boolean(payload[0] != 0),
            ColumnValueType::String => Value::String(payload),
            ColumnValueType::Any => Value::Any(payload),
        };
        Ok(UnversionedValue::new(id, aggregate, value))
    }

    pub fn read_unversioned_row(&mut self) -> CodecResult<UnversionedRow> {
        let count = self.read_len("row cell count")?;
        (0..count).map(|_| self.read_value()).collect()
    }

    pub fn read_versioned_row(&mut self) -> CodecResult<VersionedRow> {
        let write_timestamps = self.read_timestamps("write timestamps")?;
        let delete_timestamps = self.read_timestamps("delete timestamps")?;

        let key_count = self.read_len("key count")?;
        let keys = (0..key_count)
            .map(|_| self.read_value())
            .collect::<CodecResult<Vec<_>>>()?;

        let value_count = self.read_len("value count")?;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let cell = self.read_value()?;
            let timestamp = self.read_u64("value timestamp")?;
            let aggregate = cell.is_aggregate();
            values.push(VersionedValue::new(
                cell.id(),
                aggregate,
                cell.into_value(),
                timestamp,
            ));
        }

        Ok(VersionedRow::new(write_timestamps, delete_timestamps, keys, values))
    }

    fn read_timestamps(&mut self, context: &str) -> CodecResult<Vec<u64>> {
        let count = self.read_len(context)?;
        (0..count).map(|_| self.read_u64(context)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_encoding() {
        let mut writer = WireRowsetWriter::new();
        writer.write_varint(0);
        writer.write_varint(127);
        writer.write_varint(300);
        writer.write_varint(u64::MAX);
        let parts = writer.finish();
        assert_eq!(&parts[0][..4], &[0x00, 0x7f, 0xac, 0x02]);

        let mut reader = WireRowsetReader::new(&parts);
        assert_eq!(reader.read_varint().unwrap(), 0);
        assert_eq!(reader.read_varint().unwrap(), 127);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_varint().unwrap(), u64::MAX);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_cell_layout() {
        let mut writer = WireRowsetWriter::new();
        writer.write_value(&UnversionedValue::new(2, true, Value::Int64(-1)));
        let parts = writer.finish();
        assert_eq!(
            &parts[0][..],
            &[0x02, 0x83, 0x08, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );

        let cell = WireRowsetReader::new(&parts).read_value().unwrap();
        assert!(cell.is_aggregate());
        assert_eq!(cell.value(), &Value::Int64(-1));
    }

    #[test]
    fn test_attachments_read_as_one_stream() {
        let mut writer = WireRowsetWriter::new();
        writer.write_unversioned_row(
            &vec![
                UnversionedValue::new(0, false, Value::from("key")),
                UnversionedValue::null(1),
            ]
            .into_iter()
            .collect(),
        );
        let whole = writer.finish().remove(0);
        let split = vec![whole.slice(..3), whole.slice(3..)];

        let row = WireRowsetReader::new(&split).read_unversioned_row().unwrap();
        assert_eq!(row.get(0), Some(&Value::from("key")));
        assert_eq!(row.get(1), Some(&Value::Null));
    }

    #[test]
    fn test_truncated_and_malformed_cells() {
        let truncated = vec![Bytes::from_static(&[0x00, 0x03, 0x08, 0x01])];
        assert!(matches!(
            WireRowsetReader::new(&truncated).read_value(),
            Err(CodecError::Truncated { .. })
        ));

        let bad_width = vec![Bytes::from_static(&[0x00, 0x06, 0x02, 0x01, 0x01])];
        assert!(matches!(
            WireRowsetReader::new(&bad_width).read_value(),
            Err(CodecError::SchemaMismatch(_))
        ));

        let bad_type = vec![Bytes::from_static(&[0x00, 0x7e, 0x00])];
        assert!(matches!(
            WireRowsetReader::new(&bad_type).read_value(),
            Err(CodecError::Types(_))
        ));
    }
}
