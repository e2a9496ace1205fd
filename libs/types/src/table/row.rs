//! Unversioned and versioned rows

use super::value::{UnversionedValue, Value, VersionedValue};
use serde::{Deserialize, Serialize};

/// Ordered cells: key columns first, then value columns
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnversionedRow {
    values: Vec<UnversionedValue>,
}

impl UnversionedRow {
    pub fn new(values: Vec<UnversionedValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[UnversionedValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First cell carrying column `id`
    pub fn get(&self, id: u32) -> Option<&Value> {
        self.values.iter().find(|v| v.id() == id).map(|v| v.value())
    }

    pub fn into_values(self) -> Vec<UnversionedValue> {
        self.values
    }
}

impl FromIterator<UnversionedValue> for UnversionedRow {
    fn from_iter<I: IntoIterator<Item = UnversionedValue>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Row with per-value timestamps plus write and delete timestamp lists
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionedRow {
    write_timestamps: Vec<u64>,
    delete_timestamps: Vec<u64>,
    keys: Vec<UnversionedValue>,
    values: Vec<VersionedValue>,
}

impl VersionedRow {
    pub fn new(
        write_timestamps: Vec<u64>,
        delete_timestamps: Vec<u64>,
        keys: Vec<UnversionedValue>,
        values: Vec<VersionedValue>,
    ) -> Self {
        Self {
            write_timestamps,
            delete_timestamps,
            keys,
            values,
        }
    }

    pub fn write_timestamps(&self) -> &[u64] {
        &self.write_timestamps
    }

    pub fn delete_timestamps(&self) -> &[u64] {
        &self.delete_timestamps
    }

    pub fn keys(&self) -> &[UnversionedValue] {
        &self.keys
    }

    pub fn values(&self) -> &[VersionedValue] {
        &self.values
    }

    /// Latest version of column `id`, if any
    pub fn latest(&self, id: u32) -> Option<&VersionedValue> {
        self.values
            .iter()
            .filter(|v| v.id() == id)
            .max_by_key(|v| v.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unversioned_lookup() {
        let row: UnversionedRow = vec![
            UnversionedValue::new(0, false, Value::Int64(1)),
            UnversionedValue::new(2, false, Value::from("v")),
        ]
        .into_iter()
        .collect();

        assert_eq!(row.get(0), Some(&Value::Int64(1)));
        assert_eq!(row.get(1), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_versioned_latest() {
        let row = VersionedRow::new(
            vec![10, 20],
            vec![],
            vec![UnversionedValue::new(0, false, Value::Int64(1))],
            vec![
                VersionedValue::new(1, false, Value::Int64(5), 10),
                VersionedValue::new(1, false, Value::Int64(6), 20),
            ],
        );

        assert_eq!(row.latest(1).map(|v| v.value()), Some(&Value::Int64(6)));
        assert!(row.latest(3).is_none());
        assert_eq!(row.write_timestamps(), &[10, 20]);
    }
}
