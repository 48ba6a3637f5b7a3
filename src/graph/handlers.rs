//! Data handler capability table.
//!
//! A type association that carries payload semantics registers a
//! [`DataHandler`]. Setting data on an association looks the handler up along
//! its type chain; no handler means the association cannot hold data.

use std::fmt;

use crate::types::{AssocId, Data, DataKind, GraphError};

/// Payload capability attached to a type association
pub trait DataHandler: Send + Sync {
    /// Kind of payload accepted
    fn kind(&self) -> DataKind;

    /// Check a payload before it is stored on `id`
    fn check(&self, id: &AssocId, data: &Data) -> Result<(), GraphError> {
        if data.kind() == self.kind() {
            Ok(())
        } else {
            Err(GraphError::PayloadKind {
                id: id.clone(),
                expected: self.kind(),
                received: data.kind(),
            })
        }
    }

    /// Whether `data_add` / `data_delete` / `data_clear` are available
    fn supports_items(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn DataHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataHandler({})", self.kind())
    }
}

/// Handler for the `String`, `Number` and `Function` built-ins
#[derive(Debug, Clone, Copy)]
pub struct ScalarHandler(pub DataKind);

impl DataHandler for ScalarHandler {
    fn kind(&self) -> DataKind {
        self.0
    }
}

/// Handler for the `Array` built-in: an ordered list of scalars
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayHandler;

impl DataHandler for ArrayHandler {
    fn kind(&self) -> DataKind {
        DataKind::Array
    }

    fn check(&self, id: &AssocId, data: &Data) -> Result<(), GraphError> {
        let received = data.kind();
        match data {
            Data::Array(items) if items.iter().all(|item| item.kind() != DataKind::Array) => Ok(()),
            _ => Err(GraphError::PayloadKind { id: id.clone(), expected: DataKind::Array, received }),
        }
    }

    fn supports_items(&self) -> bool {
        true
    }
}
