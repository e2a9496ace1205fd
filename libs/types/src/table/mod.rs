//! Table data model: schemas, typed values, rows and rowset descriptors
//!
//! All values and rows are immutable once constructed; builders produce
//! schemas, and the codec produces rows.

pub mod descriptor;
pub mod row;
pub mod schema;
pub mod value;

pub use descriptor::{ColumnDescriptor, RowsetDescriptor, RowsetKind};
pub use row::{UnversionedRow, VersionedRow};
pub use schema::{ColumnSchema, TableSchema, TableSchemaBuilder};
pub use value::{ColumnValueType, UnversionedValue, Value, VersionedValue};
