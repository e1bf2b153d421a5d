// Copyright 2026 Basalt Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use super::ColumnCatalog;
use crate::types::DataType;

/// The schema a block is laid out against: ordered column definitions,
/// the index of the primary-key column, and the row capacity of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Arc<[ColumnCatalog]>,
    primary_key: usize,
    block_max_rows: u32,
}

impl Schema {
    pub fn new(columns: Vec<ColumnCatalog>, block_max_rows: u32) -> Self {
        assert!(!columns.is_empty(), "schema must have at least one column");
        let primary_key = columns
            .iter()
            .position(|c| c.is_primary())
            .expect("schema must have a primary-key column");
        Self {
            columns: columns.into(),
            primary_key,
            block_max_rows,
        }
    }

    pub fn columns(&self) -> &[ColumnCatalog] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the primary-key column.
    pub fn primary_key(&self) -> usize {
        self.primary_key
    }

    pub fn block_max_rows(&self) -> u32 {
        self.block_max_rows
    }

    pub fn column_type(&self, idx: usize) -> DataType {
        self.columns[idx].datatype()
    }

    /// Find a column index by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataTypeExt, DataTypeKind};

    #[test]
    fn test_schema() {
        let schema = Schema::new(
            vec![
                ColumnCatalog::new(0, "pk".into(), DataTypeKind::Int32.not_null().to_column_primary_key()),
                ColumnCatalog::new(1, "v".into(), DataTypeKind::Int32.not_null().to_column()),
            ],
            4,
        );
        assert_eq!(schema.primary_key(), 0);
        assert_eq!(schema.block_max_rows(), 4);
        assert_eq!(schema.column_index("v"), Some(1));
        assert_eq!(schema.column_index("w"), None);
    }

    #[test]
    #[should_panic]
    fn test_schema_without_pk() {
        Schema::new(
            vec![ColumnCatalog::new(0, "v".into(), DataTypeKind::Int32.not_null().to_column())],
            4,
        );
    }
}
