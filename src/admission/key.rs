//! Cell key generation and handling.

use serde::{Deserialize, Serialize};

/// Classification of a request used to select a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
}

impl OperationClass {
    /// Derive the operation class from an HTTP method name.
    ///
    /// `GET` is a read; every other method counts as a write.
    pub fn from_method(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") {
            OperationClass::Read
        } else {
            OperationClass::Write
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that uniquely identifies one admission cell.
///
/// Each (client, operation class) pair owns its own token bucket and
/// concurrency counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    /// The calling client
    pub client_id: String,
    /// Read or write
    pub operation: OperationClass,
}

impl CellKey {
    /// Create a new cell key.
    pub fn new(client_id: &str, operation: OperationClass) -> Self {
        Self {
            client_id: client_id.to_string(),
            operation,
        }
    }
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client_id, self.operation)
    }
}
