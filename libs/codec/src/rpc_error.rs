//! Remote application errors carried in response headers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error tree decoded from a proxy response
///
/// The remote side reports failures as a code plus message with nested
/// causes; the structure is kept intact so callers can search it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
    pub inner_errors: Vec<RpcError>,
}

impl RpcError {
    pub const GENERIC: i32 = 1;
    pub const NO_SUCH_SERVICE: i32 = 102;
    pub const NO_SUCH_METHOD: i32 = 103;
    pub const UNAVAILABLE: i32 = 105;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            attributes: BTreeMap::new(),
            inner_errors: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_inner(mut self, inner: RpcError) -> Self {
        self.inner_errors.push(inner);
        self
    }

    /// Depth-first search of the tree for an error with `code`
    pub fn find_code(&self, code: i32) -> Option<&RpcError> {
        if self.code == code {
            return Some(self);
        }
        self.inner_errors.iter().find_map(|inner| inner.find_code(code))
    }

    pub fn contains_code(&self, code: i32) -> bool {
        self.find_code(code).is_some()
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        for inner in &self.inner_errors {
            write!(f, "; caused by: {}", inner)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
