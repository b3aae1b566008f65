//! Module: exec::sort
//! Responsibility: `Sort`, the external sort operator — runs
//! of the child's output are sorted in memory and spilled to temp
//! files once they reach `RUN_SIZE`, then merged back via a k-way
//! merge over lazily-read run files.

use crate::exec::{exec_err, Operator};
use dbcore_types::col::ColMeta;
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use dbcore_types::tabcol::TabCol;
use dbcore_types::value::Value;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Write};
use std::path::PathBuf;

const RUN_SIZE: usize = 1000;

fn sort_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Executor, message)
}

fn key_cmp(a: &Record, b: &Record, cols: &[ColMeta], key_idx: &[usize]) -> Ordering {
    for &idx in key_idx {
        let col = &cols[idx];
        let (va, vb) = (a.field(col), b.field(col));
        let ord = match (&va, &vb) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn write_tuple(writer: &mut BufWriter<File>, rid: Rid, record: &Record) -> Result<(), DbError> {
    writer
        .write_all(&rid.to_bytes())
        .and_then(|()| writer.write_all(&(record.data.len() as u32).to_le_bytes()))
        .and_then(|()| writer.write_all(&record.data))
        .map_err(|e| sort_err(format!("spill write failed: {e}")))
}

fn read_tuple(reader: &mut BufReader<File>) -> Result<Option<(Rid, Record)>, DbError> {
    let mut rid_buf = [0u8; 8];
    match reader.read_exact(&mut rid_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(sort_err(format!("spill read failed: {e}"))),
    }
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(|e| sort_err(format!("spill read failed: {e}")))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(|e| sort_err(format!("spill read failed: {e}")))?;
    Ok(Some((Rid::from_bytes(&rid_buf), Record::new(data))))
}

struct SpillRun {
    path: PathBuf,
    reader: BufReader<File>,
    peeked: Option<(Rid, Record)>,
}

impl SpillRun {
    fn open(path: PathBuf) -> Result<Self, DbError> {
        let file = File::open(&path).map_err(|e| sort_err(format!("cannot reopen spill file: {e}")))?;
        let mut reader = BufReader::new(file);
        let peeked = read_tuple(&mut reader)?;
        Ok(Self { path, reader, peeked })
    }

    fn advance(&mut self) -> Result<Option<(Rid, Record)>, DbError> {
        let current = self.peeked.take();
        self.peeked = read_tuple(&mut self.reader)?;
        Ok(current)
    }
}

impl Drop for SpillRun {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Sorts a child operator's output on one or more columns, spilling
/// sorted runs to disk rather than holding the whole input in memory.
pub struct Sort {
    cols: Vec<ColMeta>,
    key_idx: Vec<usize>,
    descending: bool,
    runs: Vec<SpillRun>,
    current: Option<(Rid, Record)>,
}

impl Sort {
    pub fn build(mut child: Box<dyn Operator>, keys: &[TabCol], descending: bool) -> Result<Self, DbError> {
        let cols = child.cols().to_vec();
        let key_idx: Result<Vec<usize>, DbError> = keys
            .iter()
            .map(|k| {
                cols.iter()
                    .position(|c| c.name == k.col_name)
                    .ok_or_else(|| exec_err(ErrorKind::ColumnNotFound, format!("unknown sort column {k}")))
            })
            .collect();
        let key_idx = key_idx?;

        let mut runs = Vec::new();
        let mut buffer: Vec<(Rid, Record)> = Vec::with_capacity(RUN_SIZE);
        child.begin_tuple()?;
        let mut spill_id = 0u64;
        while !child.is_end() {
            buffer.push((child.rid().unwrap_or_default(), child.current().clone()));
            child.next_tuple()?;
            if buffer.len() >= RUN_SIZE {
                runs.push(Self::spill(&mut buffer, &cols, &key_idx, descending, &mut spill_id)?);
            }
        }
        if !buffer.is_empty() {
            runs.push(Self::spill(&mut buffer, &cols, &key_idx, descending, &mut spill_id)?);
        }

        Ok(Self {
            cols,
            key_idx,
            descending,
            runs,
            current: None,
        })
    }

    fn spill(
        buffer: &mut Vec<(Rid, Record)>,
        cols: &[ColMeta],
        key_idx: &[usize],
        descending: bool,
        spill_id: &mut u64,
    ) -> Result<SpillRun, DbError> {
        buffer.sort_by(|(_, a), (_, b)| {
            let ord = key_cmp(a, b, cols, key_idx);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        let mut path = std::env::temp_dir();
        path.push(format!("rmdb-sort-{}-{}.spill", std::process::id(), *spill_id));
        *spill_id += 1;
        let file = File::create(&path).map_err(|e| sort_err(format!("cannot create spill file: {e}")))?;
        let mut writer = BufWriter::new(file);
        for (rid, record) in buffer.drain(..) {
            write_tuple(&mut writer, rid, &record)?;
        }
        writer.flush().map_err(|e| sort_err(format!("spill flush failed: {e}")))?;
        SpillRun::open(path)
    }

    fn pick_winner(&self) -> Option<usize> {
        let mut winner: Option<usize> = None;
        for (i, run) in self.runs.iter().enumerate() {
            let Some((_, record)) = run.peeked.as_ref() else { continue };
            let better = match winner {
                None => true,
                Some(w) => {
                    let (_, wrec) = self.runs[w].peeked.as_ref().unwrap();
                    let ord = key_cmp(record, wrec, &self.cols, &self.key_idx);
                    if self.descending {
                        ord == Ordering::Greater
                    } else {
                        ord == Ordering::Less
                    }
                }
            };
            if better {
                winner = Some(i);
            }
        }
        winner
    }

    fn advance(&mut self) -> Result<(), DbError> {
        match self.pick_winner() {
            None => {
                self.current = None;
                Ok(())
            }
            Some(i) => {
                self.current = self.runs[i].advance()?;
                Ok(())
            }
        }
    }
}

impl Operator for Sort {
    fn begin_tuple(&mut self) -> Result<(), DbError> {
        self.advance()
    }

    fn next_tuple(&mut self) -> Result<(), DbError> {
        self.advance()
    }

    fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> &Record {
        &self.current.as_ref().expect("current() called at end").1
    }

    fn rid(&self) -> Option<Rid> {
        self.current.as_ref().map(|(rid, _)| *rid)
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::value::ColType;

    struct VecOp {
        cols: Vec<ColMeta>,
        rows: Vec<Record>,
        pos: Option<usize>,
    }

    impl Operator for VecOp {
        fn begin_tuple(&mut self) -> Result<(), DbError> {
            self.pos = if self.rows.is_empty() { None } else { Some(0) };
            Ok(())
        }
        fn next_tuple(&mut self) -> Result<(), DbError> {
            if let Some(p) = self.pos {
                self.pos = if p + 1 < self.rows.len() { Some(p + 1) } else { None };
            }
            Ok(())
        }
        fn is_end(&self) -> bool {
            self.pos.is_none()
        }
        fn current(&self) -> &Record {
            &self.rows[self.pos.unwrap()]
        }
        fn cols(&self) -> &[ColMeta] {
            &self.cols
        }
    }

    fn unsorted(values: Vec<i32>) -> Box<VecOp> {
        Box::new(VecOp {
            cols: vec![ColMeta::new("t", "k", ColType::Int, 4, 0)],
            rows: values.into_iter().map(|v| Record::new(v.to_le_bytes().to_vec())).collect(),
            pos: None,
        })
    }

    #[test]
    fn sorts_ascending_across_multiple_spilled_runs() {
        let mut sort = Sort::build(unsorted(vec![5, 1, 4, 2, 3]), &[TabCol::new("t", "k")], false).unwrap();
        sort.begin_tuple().unwrap();
        let mut out = Vec::new();
        while !sort.is_end() {
            out.push(i32::from_le_bytes(sort.current().data.clone().try_into().unwrap()));
            sort.next_tuple().unwrap();
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn descending_reverses_order() {
        let mut sort = Sort::build(unsorted(vec![1, 3, 2]), &[TabCol::new("t", "k")], true).unwrap();
        sort.begin_tuple().unwrap();
        let mut out = Vec::new();
        while !sort.is_end() {
            out.push(i32::from_le_bytes(sort.current().data.clone().try_into().unwrap()));
            sort.next_tuple().unwrap();
        }
        assert_eq!(out, vec![3, 2, 1]);
    }
}
