//! Module: catalog::stream
//! Responsibility: the whitespace-delimited read/write grammar for
//! `DbMeta`, mirroring the overloaded stream-operator shape the
//! grammar was originally specified against. A thin tokenizer stands in
//! for `istream::operator>>` whitespace-splitting.

use crate::catalog::{DbMeta, TabMeta};
use dbcore_types::col::{ColMeta, IndexMeta};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::value::ColType;
use std::fmt::Write as _;

fn parse_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Catalog, message)
}

struct Tokens<'a> {
    rest: std::iter::Peekable<std::str::SplitWhitespace<'a>>,
}

impl<'a> Tokens<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            rest: input.split_whitespace().peekable(),
        }
    }

    fn next(&mut self) -> Result<&'a str, DbError> {
        self.rest.next().ok_or_else(|| parse_err("unexpected end of catalog stream"))
    }

    fn next_usize(&mut self) -> Result<usize, DbError> {
        self.next()?
            .parse()
            .map_err(|_| parse_err("expected integer in catalog stream"))
    }

    fn next_col_type(&mut self) -> Result<ColType, DbError> {
        match self.next()? {
            "INT" => Ok(ColType::Int),
            "FLOAT" => Ok(ColType::Float),
            "STRING" => Ok(ColType::Str),
            other => Err(parse_err(format!("unknown column type {other}"))),
        }
    }
}

fn write_col_meta(out: &mut String, col: &ColMeta) {
    let _ = write!(out, "{} {} {} {} {} ", col.tab_name, col.name, col.ty, col.len, col.offset);
}

fn read_col_meta(tok: &mut Tokens<'_>) -> Result<ColMeta, DbError> {
    let tab_name = tok.next()?.to_string();
    let name = tok.next()?.to_string();
    let ty = tok.next_col_type()?;
    let len = tok.next_usize()?;
    let offset = tok.next_usize()?;
    Ok(ColMeta::new(tab_name, name, ty, len, offset))
}

fn write_index_meta(out: &mut String, index: &IndexMeta) {
    let _ = write!(out, "{} {} {} ", index.tab_name, index.col_tot_len(), index.col_num());
    for col in &index.cols {
        write_col_meta(out, col);
    }
}

fn read_index_meta(tok: &mut Tokens<'_>) -> Result<IndexMeta, DbError> {
    let tab_name = tok.next()?.to_string();
    let _tot_len = tok.next_usize()?;
    let num_cols = tok.next_usize()?;
    let mut cols = Vec::with_capacity(num_cols);
    for _ in 0..num_cols {
        cols.push(read_col_meta(tok)?);
    }
    Ok(IndexMeta::new(tab_name, cols))
}

fn write_tab_meta(out: &mut String, tab: &TabMeta) {
    let _ = writeln!(out, "{} {}", tab.name, tab.cols.len());
    for col in &tab.cols {
        write_col_meta(out, col);
        out.push('\n');
    }
    let _ = writeln!(out, "{}", tab.indexes.len());
    for index in &tab.indexes {
        let _ = write!(out, "{} ", index.index_name());
        write_index_meta(out, index);
        out.push('\n');
    }
}

fn read_tab_meta(tok: &mut Tokens<'_>) -> Result<TabMeta, DbError> {
    let name = tok.next()?.to_string();
    let num_cols = tok.next_usize()?;
    let mut cols = Vec::with_capacity(num_cols);
    for _ in 0..num_cols {
        cols.push(read_col_meta(tok)?);
    }
    let num_indexes = tok.next_usize()?;
    let mut indexes = Vec::with_capacity(num_indexes);
    for _ in 0..num_indexes {
        let _index_name = tok.next()?;
        indexes.push(read_index_meta(tok)?);
    }
    Ok(TabMeta { name, cols, indexes })
}

/// Serialize `DbMeta` as `name N { TabMeta }xN`, matching the grammar `parse_db` reads back.
#[must_use]
pub fn write_db_meta(db: &DbMeta) -> String {
    let mut out = String::new();
    let names = db.table_names();
    let _ = writeln!(out, "{} {}", db.name, names.len());
    for name in names {
        write_tab_meta(&mut out, &db.tables[&name]);
    }
    out
}

pub fn read_db_meta(input: &str) -> Result<DbMeta, DbError> {
    let mut tok = Tokens::new(input);
    let name = tok.next()?.to_string();
    let num_tables = tok.next_usize()?;
    let mut db = DbMeta::new(name);
    for _ in 0..num_tables {
        let tab = read_tab_meta(&mut tok)?;
        db.tables.insert(tab.name.clone(), tab);
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbMeta {
        let mut db = DbMeta::new("mydb");
        let mut tab = TabMeta::new(
            "warehouse",
            vec![
                ColMeta::new("warehouse", "w_id", ColType::Int, 4, 0),
                ColMeta::new("warehouse", "w_name", ColType::Str, 10, 4),
            ],
        );
        tab.indexes.push(IndexMeta::new(
            "warehouse",
            vec![ColMeta::new("warehouse", "w_id", ColType::Int, 4, 0)],
        ));
        db.tables.insert(tab.name.clone(), tab);
        db
    }

    #[test]
    fn round_trips_through_the_stream_grammar() {
        let db = sample();
        let text = write_db_meta(&db);
        let back = read_db_meta(&text).unwrap();
        assert_eq!(back.name, db.name);
        let orig = &db.tables["warehouse"];
        let got = &back.tables["warehouse"];
        assert_eq!(orig.cols, got.cols);
        assert_eq!(orig.indexes, got.indexes);
    }

    #[test]
    fn rejects_truncated_stream() {
        assert!(read_db_meta("mydb 1 warehouse").is_err());
    }
}
