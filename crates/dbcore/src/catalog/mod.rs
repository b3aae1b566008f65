//! Module: catalog
//! Responsibility: `DbMeta`/`TabMeta` in-memory catalog plus the
//! whitespace-delimited stream grammar used to persist and reload it.
//! Does not own table storage (`storage::HeapFile`) or index
//! storage (`storage::BTreeIndex`) — only the metadata describing them.

pub mod stream;

use dbcore_types::col::{ColMeta, IndexMeta};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use std::collections::HashMap;

fn catalog_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Catalog, message)
}

#[derive(Clone, Debug, PartialEq)]
pub struct TabMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TabMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, cols: Vec<ColMeta>) -> Self {
        Self {
            name: name.into(),
            cols,
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn record_size(&self) -> usize {
        self.cols.iter().map(ColMeta::width).sum()
    }

    #[must_use]
    pub fn col(&self, name: &str) -> Option<&ColMeta> {
        self.cols.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn is_col(&self, name: &str) -> bool {
        self.col(name).is_some()
    }

    #[must_use]
    pub fn index_covering(&self, col_name: &str) -> Option<&IndexMeta> {
        self.indexes
            .iter()
            .find(|ix| ix.cols.first().is_some_and(|c| c.name == col_name))
    }

    #[must_use]
    pub fn index_exact(&self, col_names: &[String]) -> Option<&IndexMeta> {
        self.indexes.iter().find(|ix| {
            ix.cols.len() == col_names.len()
                && ix
                    .cols
                    .iter()
                    .zip(col_names)
                    .all(|(c, name)| &c.name == name)
        })
    }
}

/// Database-wide catalog: every table's metadata keyed by name.
#[derive(Clone, Debug, Default)]
pub struct DbMeta {
    pub name: String,
    pub tables: HashMap<String, TabMeta>,
}

impl DbMeta {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: HashMap::new(),
        }
    }

    pub fn create_table(&mut self, tab: TabMeta) -> Result<(), DbError> {
        if self.tables.contains_key(&tab.name) {
            return Err(catalog_err(
                ErrorKind::Internal,
                format!("table {} already exists", tab.name),
            ));
        }
        self.tables.insert(tab.name.clone(), tab);
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<TabMeta, DbError> {
        self.tables
            .remove(name)
            .ok_or_else(|| catalog_err(ErrorKind::TableNotFound, format!("table {name} not found")))
    }

    pub fn get_table(&self, name: &str) -> Result<&TabMeta, DbError> {
        self.tables
            .get(name)
            .ok_or_else(|| catalog_err(ErrorKind::TableNotFound, format!("table {name} not found")))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut TabMeta, DbError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| catalog_err(ErrorKind::TableNotFound, format!("table {name} not found")))
    }

    pub fn is_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names in a stable order, used by `SHOW TABLES`.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create_index(&mut self, tab_name: &str, index: IndexMeta) -> Result<(), DbError> {
        let tab = self.get_table_mut(tab_name)?;
        let col_names: Vec<String> = index.cols.iter().map(|c| c.name.clone()).collect();
        if tab.index_exact(&col_names).is_some() {
            return Err(catalog_err(
                ErrorKind::IndexExists,
                format!("index on {tab_name}({}) already exists", col_names.join(",")),
            ));
        }
        tab.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&mut self, tab_name: &str, col_names: &[String]) -> Result<IndexMeta, DbError> {
        let tab = self.get_table_mut(tab_name)?;
        let pos = tab
            .indexes
            .iter()
            .position(|ix| {
                ix.cols.len() == col_names.len()
                    && ix.cols.iter().zip(col_names).all(|(c, n)| &c.name == n)
            })
            .ok_or_else(|| {
                catalog_err(
                    ErrorKind::IndexNotFound,
                    format!("no index on {tab_name}({})", col_names.join(",")),
                )
            })?;
        Ok(tab.indexes.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::value::ColType;

    fn tab() -> TabMeta {
        TabMeta::new(
            "t",
            vec![
                ColMeta::new("t", "id", ColType::Int, 4, 0),
                ColMeta::new("t", "name", ColType::Str, 16, 4),
            ],
        )
    }

    #[test]
    fn create_then_get_table() {
        let mut db = DbMeta::new("db");
        db.create_table(tab()).unwrap();
        assert!(db.is_table("t"));
        assert_eq!(db.get_table("t").unwrap().record_size(), 20);
    }

    #[test]
    fn duplicate_create_table_errors() {
        let mut db = DbMeta::new("db");
        db.create_table(tab()).unwrap();
        assert!(db.create_table(tab()).is_err());
    }

    #[test]
    fn drop_index_requires_exact_column_match() {
        let mut db = DbMeta::new("db");
        db.create_table(tab()).unwrap();
        let ix = IndexMeta::new("t", vec![ColMeta::new("t", "id", ColType::Int, 4, 0)]);
        db.create_index("t", ix).unwrap();
        assert!(db.drop_index("t", &["name".to_string()]).is_err());
        assert!(db.drop_index("t", &["id".to_string()]).is_ok());
    }
}
