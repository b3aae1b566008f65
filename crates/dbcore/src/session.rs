//! Module: session
//! Responsibility: `Database`, the process-wide handle sharing one
//! catalog, lock manager, log manager, and transaction manager across
//! every connected `Session`; and `Session` itself, which parses a line,
//! dispatches DDL/transaction-control/`SET`/`HELP` statements directly
//! and routes DML/SELECT through the analyzer and planner, auto-beginning
//! and auto-committing a transaction when the caller has none open.
//! Does not own: the REPL loop, process flags, or log routing — those
//! are `dbcore-cli`.

use crate::analyzer::{self, PlanOptions};
use crate::catalog::{stream, DbMeta, TabMeta};
use crate::exec::ExecContext;
use crate::lock::{LockManager, TxnId};
use crate::parser::{self, ast};
use crate::plan::{self, Plan, PlanOutput};
use crate::storage::btree::{BTreeIndex, BTreeMapIndex, KeyLayout};
use crate::storage::{FilePageStore, HeapFile, InMemoryPageStore, PageStore};
use crate::txn::TxnManager;
use crate::wal::{recovery, LogBody, LogManager, LogRecord, LogType, INVALID_LSN};
use dbcore_types::col::{ColMeta, IndexMeta};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::value::{ColType, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use ulid::Ulid;

const DEFAULT_PAGE_SIZE: usize = 4096;
const CATALOG_FILE: &str = "catalog.db";
const LOG_FILE: &str = "wal.log";

fn session_err(kind: ErrorKind, message: impl Into<String>) -> DbError {
    DbError::new(kind, ErrorOrigin::Session, message)
}

fn index_layout(index: &IndexMeta) -> KeyLayout {
    index.cols.iter().map(|c| (c.ty, c.len)).collect()
}

fn index_key(index: &IndexMeta, record: &Record) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.col_tot_len());
    for col in &index.cols {
        key.extend_from_slice(&record.field(col).init_raw(col.len));
    }
    key
}

/// A session's identity, used only for log lines; carries no privilege
/// or ownership semantics.
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
pub struct SessionId(Ulid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// What running one line produced, left for the caller (the CLI's REPL)
/// to render.
#[derive(Debug)]
pub enum SessionOutput {
    Rows { cols: Vec<ColMeta>, rows: Vec<Record> },
    Affected(usize),
    Message(String),
}

/// Render a result set as the fixed, space-padded text grid: a header
/// row of column names, then one row per record, columns separated by
/// two spaces and left-aligned to the widest value in that column.
#[must_use]
pub fn render_grid(cols: &[ColMeta], rows: &[Record]) -> String {
    let headers: Vec<String> = cols.iter().map(|c| c.name.clone()).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|r| cols.iter().map(|c| r.field(c).to_string()).collect())
        .collect();
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in &body {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }
    let mut out = String::new();
    for (i, h) in headers.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        let _ = write!(out, "{h:width$}", width = widths[i]);
    }
    out.push('\n');
    for row in &body {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            let _ = write!(out, "{cell:width$}", width = widths[i]);
        }
        out.push('\n');
    }
    out
}

const HELP_TEXT: &str = "\
Statements: CREATE/DROP TABLE, CREATE/DROP INDEX, DESC, SHOW TABLES, SHOW INDEX FROM t,
INSERT INTO, DELETE FROM ... WHERE, UPDATE ... SET ... WHERE,
SELECT [agg|col|*] FROM t [JOIN ...] [WHERE] [GROUP BY] [HAVING] [ORDER BY c ASC|DESC] [LIMIT n],
BEGIN/COMMIT/ABORT/ROLLBACK, CREATE STATIC_CHECKPOINT, LOAD <file> INTO <table>,
SET enable_nestloop|enable_sortmerge|enable_output_file = {true|false}.";

fn parse_literal(ty: ColType, token: &str) -> Result<Value, DbError> {
    match ty {
        ColType::Int => token
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| session_err(ErrorKind::IncompatibleType, format!("expected INT, got '{token}'"))),
        ColType::Float => token
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|_| session_err(ErrorKind::IncompatibleType, format!("expected FLOAT, got '{token}'"))),
        ColType::Str => Ok(Value::Str(token.to_string())),
    }
}

/// Process-wide handle shared by every `Session`: the catalog, lock
/// manager, log manager, transaction manager, and every table's open
/// heap and indexes. `data_dir: None` is an ephemeral in-memory database.
pub struct Database {
    data_dir: Option<PathBuf>,
    page_size: usize,
    catalog: RwLock<DbMeta>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    txn_manager: Arc<TxnManager>,
    heaps: Mutex<HashMap<String, Arc<HeapFile>>>,
    indexes: Mutex<HashMap<String, Arc<dyn BTreeIndex>>>,
}

impl Database {
    /// Open (or initialize) a database under `data_dir`, or an ephemeral
    /// in-memory one when `data_dir` is `None`. Replays the persisted
    /// log through `recovery::recover` whenever `recover` is set or the
    /// log on disk is non-empty, then rebuilds every index from a fresh
    /// heap scan.
    pub fn open(data_dir: Option<PathBuf>, flush_interval: Duration, recover: bool) -> Result<Arc<Self>, DbError> {
        let lock_manager = Arc::new(LockManager::new());
        let log_manager = LogManager::new(flush_interval);
        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&lock_manager), Arc::clone(&log_manager)));

        if let Some(dir) = &data_dir {
            fs::create_dir_all(dir).map_err(|e| session_err(ErrorKind::IoError, format!("create {}: {e}", dir.display())))?;
        }

        let catalog = match &data_dir {
            Some(dir) => {
                let path = dir.join(CATALOG_FILE);
                if path.exists() {
                    let text = fs::read_to_string(&path).map_err(|e| session_err(ErrorKind::IoError, e.to_string()))?;
                    stream::read_db_meta(&text)?
                } else {
                    DbMeta::new("db")
                }
            }
            None => DbMeta::new("db"),
        };

        let mut heaps = HashMap::new();
        for (name, tab) in &catalog.tables {
            let store: Arc<dyn PageStore> = match &data_dir {
                Some(dir) => Arc::new(FilePageStore::open(dir.join(format!("{name}.heap")), DEFAULT_PAGE_SIZE)?),
                None => Arc::new(InMemoryPageStore::new(DEFAULT_PAGE_SIZE)),
            };
            heaps.insert(name.clone(), Arc::new(HeapFile::new(store, tab.record_size())));
        }

        let log_bytes = match &data_dir {
            Some(dir) => {
                let path = dir.join(LOG_FILE);
                if path.exists() {
                    fs::read(&path).map_err(|e| session_err(ErrorKind::IoError, e.to_string()))?
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };
        let records = recovery::parse_log(&log_bytes)?;
        let next_lsn = recovery::next_lsn_after(&records);
        log_manager.load_persisted(log_bytes, next_lsn);
        if (recover || !records.is_empty()) && !records.is_empty() {
            let summary = recovery::recover(&records, &heaps)?;
            log::info!(
                "recovery replayed {} records: {} redone, {} undone, {} transactions aborted",
                summary.analyzed,
                summary.redone,
                summary.undone,
                summary.aborted_txns.len()
            );
        }

        let mut indexes: HashMap<String, Arc<dyn BTreeIndex>> = HashMap::new();
        for (name, tab) in &catalog.tables {
            let heap = &heaps[name];
            let rows = heap.scan()?;
            for index_meta in &tab.indexes {
                let btree = BTreeMapIndex::new(index_layout(index_meta));
                for (rid, record) in &rows {
                    btree.insert(index_key(index_meta, record), *rid);
                }
                indexes.insert(index_meta.index_name(), Arc::new(btree) as Arc<dyn BTreeIndex>);
            }
        }

        Ok(Arc::new(Self {
            data_dir,
            page_size: DEFAULT_PAGE_SIZE,
            catalog: RwLock::new(catalog),
            lock_manager,
            log_manager,
            txn_manager,
            heaps: Mutex::new(heaps),
            indexes: Mutex::new(indexes),
        }))
    }

    #[must_use]
    pub fn catalog_snapshot(&self) -> DbMeta {
        self.catalog.read().unwrap().clone()
    }

    #[must_use]
    pub fn sorted_results_path(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from(".")).join("sorted_results.txt")
    }

    fn persist_catalog(&self) -> Result<(), DbError> {
        if let Some(dir) = &self.data_dir {
            let text = stream::write_db_meta(&self.catalog.read().unwrap());
            fs::write(dir.join(CATALOG_FILE), text).map_err(|e| session_err(ErrorKind::IoError, e.to_string()))?;
        }
        Ok(())
    }

    fn sync_log_to_disk(&self) -> Result<(), DbError> {
        if let Some(dir) = &self.data_dir {
            fs::write(dir.join(LOG_FILE), self.log_manager.persisted_bytes())
                .map_err(|e| session_err(ErrorKind::IoError, format!("write wal.log: {e}")))?;
        }
        Ok(())
    }

    pub fn create_table(&self, table: &str, col_defs: Vec<ast::ColDef>) -> Result<(), DbError> {
        let mut cols = Vec::with_capacity(col_defs.len());
        let mut offset = 0usize;
        for def in col_defs {
            let col = ColMeta::new(table, def.name, def.ty, def.len, offset);
            offset += col.width();
            cols.push(col);
        }
        let tab = TabMeta::new(table, cols);
        let record_size = tab.record_size();
        {
            let mut catalog = self.catalog.write().unwrap();
            catalog.create_table(tab)?;
        }
        let store: Arc<dyn PageStore> = match &self.data_dir {
            Some(dir) => Arc::new(FilePageStore::open(dir.join(format!("{table}.heap")), self.page_size)?),
            None => Arc::new(InMemoryPageStore::new(self.page_size)),
        };
        self.heaps.lock().unwrap().insert(table.to_string(), Arc::new(HeapFile::new(store, record_size)));
        self.persist_catalog()
    }

    pub fn drop_table(&self, table: &str) -> Result<(), DbError> {
        let dropped = {
            let mut catalog = self.catalog.write().unwrap();
            catalog.drop_table(table)?
        };
        self.heaps.lock().unwrap().remove(table);
        {
            let mut indexes = self.indexes.lock().unwrap();
            for index_meta in &dropped.indexes {
                indexes.remove(&index_meta.index_name());
            }
        }
        if let Some(dir) = &self.data_dir {
            let _ = fs::remove_file(dir.join(format!("{table}.heap")));
        }
        self.persist_catalog()
    }

    pub fn create_index(&self, table: &str, col_names: &[String]) -> Result<String, DbError> {
        let index_meta = {
            let mut catalog = self.catalog.write().unwrap();
            let tab = catalog.get_table(table)?;
            let mut cols = Vec::with_capacity(col_names.len());
            for name in col_names {
                let col = tab
                    .col(name)
                    .ok_or_else(|| session_err(ErrorKind::ColumnNotFound, format!("unknown column {table}.{name}")))?;
                cols.push(col.clone());
            }
            let index_meta = IndexMeta::new(table, cols);
            catalog.create_index(table, index_meta.clone())?;
            index_meta
        };
        let heap = self
            .heaps
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| session_err(ErrorKind::TableNotFound, format!("table {table} not found")))?;
        let btree = BTreeMapIndex::new(index_layout(&index_meta));
        for (rid, record) in heap.scan()? {
            btree.insert(index_key(&index_meta, &record), rid);
        }
        let name = index_meta.index_name();
        self.indexes.lock().unwrap().insert(name.clone(), Arc::new(btree));
        self.persist_catalog()?;
        Ok(name)
    }

    pub fn drop_index(&self, table: &str, col_names: &[String]) -> Result<String, DbError> {
        let index_meta = {
            let mut catalog = self.catalog.write().unwrap();
            catalog.drop_index(table, col_names)?
        };
        let name = index_meta.index_name();
        self.indexes.lock().unwrap().remove(&name);
        self.persist_catalog()?;
        Ok(name)
    }

    fn exec_context(&self, txn_id: TxnId, opts: PlanOptions) -> ExecContext {
        let heaps = self.heaps.lock().unwrap().clone();
        let indexes = self.indexes.lock().unwrap().clone();
        let mut ctx = ExecContext::new(txn_id, Arc::clone(&self.lock_manager), Arc::clone(&self.txn_manager), heaps, indexes);
        ctx.enable_nestloop = opts.enable_nestloop;
        ctx.enable_sortmerge = opts.enable_sortmerge;
        ctx
    }

    fn begin_txn(&self) -> TxnId {
        self.txn_manager.begin()
    }

    fn commit_txn(&self, id: TxnId) -> Result<(), DbError> {
        self.txn_manager.commit(id)?;
        self.sync_log_to_disk()
    }

    fn abort_txn(&self, id: TxnId, reason: &str) -> Result<(), DbError> {
        let heaps = self.heaps.lock().unwrap().clone();
        self.txn_manager.abort(id, &heaps, reason)?;
        self.sync_log_to_disk()
    }

    /// Hash the serialized catalog and append a non-transactional
    /// `StaticCheckpoint` log record (txn id 0 is never assigned to a
    /// real transaction). Returns the hex-encoded digest so the caller
    /// can cross-check a checkpoint against a prior one.
    fn checkpoint(&self) -> Result<String, DbError> {
        let catalog_bytes = stream::write_db_meta(&self.catalog.read().unwrap());
        let mut hasher = Sha256::new();
        hasher.update(catalog_bytes.as_bytes());
        let digest = hasher.finalize();
        let fingerprint = digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
        self.log_manager.append_and_force(LogRecord {
            log_type: LogType::StaticCheckpoint,
            lsn: INVALID_LSN,
            txn_id: 0,
            prev_lsn: INVALID_LSN,
            body: LogBody::StaticCheckpoint,
        });
        self.sync_log_to_disk()?;
        Ok(fingerprint)
    }
}

/// One connected client: its identity, the transaction it may have open,
/// and its session-local planner/output flags.
pub struct Session {
    id: SessionId,
    db: Arc<Database>,
    txn_id: Option<TxnId>,
    plan_opts: PlanOptions,
    output_file: bool,
}

impl Session {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            id: SessionId::new(),
            db,
            txn_id: None,
            plan_opts: PlanOptions::default(),
            output_file: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn has_open_transaction(&self) -> bool {
        self.txn_id.is_some()
    }

    /// Parse and run one statement line to completion.
    pub fn execute(&mut self, line: &str) -> Result<SessionOutput, DbError> {
        let stmt = parser::parse(line)?;
        self.run_statement(stmt)
    }

    fn run_statement(&mut self, stmt: ast::Statement) -> Result<SessionOutput, DbError> {
        match stmt {
            ast::Statement::CreateTable { table, cols } => {
                self.db.create_table(&table, cols)?;
                Ok(SessionOutput::Message(format!("table {table} created")))
            }
            ast::Statement::DropTable(table) => {
                self.db.drop_table(&table)?;
                Ok(SessionOutput::Message(format!("table {table} dropped")))
            }
            ast::Statement::DescTable(table) => self.desc_table(&table),
            ast::Statement::CreateIndex { table, cols } => {
                let name = self.db.create_index(&table, &cols)?;
                Ok(SessionOutput::Message(format!("index {name} created")))
            }
            ast::Statement::DropIndex { table, cols } => {
                let name = self.db.drop_index(&table, &cols)?;
                Ok(SessionOutput::Message(format!("index {name} dropped")))
            }
            ast::Statement::ShowTables => {
                let names = self.db.catalog_snapshot().table_names();
                Ok(SessionOutput::Message(names.join("\n")))
            }
            ast::Statement::ShowIndex(table) => self.show_index(&table),
            ast::Statement::CreateStaticCheckpoint => {
                let fingerprint = self.db.checkpoint()?;
                Ok(SessionOutput::Message(format!("checkpoint {fingerprint}")))
            }
            ast::Statement::Load { file, table } => self.run_load(&file, &table),
            ast::Statement::Begin => {
                if self.txn_id.is_some() {
                    return Err(session_err(ErrorKind::Internal, "a transaction is already open on this session"));
                }
                self.txn_id = Some(self.db.begin_txn());
                Ok(SessionOutput::Message("transaction started".to_string()))
            }
            ast::Statement::Commit => {
                let id = self.take_open_txn()?;
                self.db.commit_txn(id)?;
                Ok(SessionOutput::Message("commit".to_string()))
            }
            ast::Statement::Abort | ast::Statement::Rollback => {
                let id = self.take_open_txn()?;
                self.db.abort_txn(id, "explicit rollback")?;
                Ok(SessionOutput::Message("rollback".to_string()))
            }
            ast::Statement::Set { knob, value } => {
                match knob {
                    ast::SetKnob::NestLoop => self.plan_opts.enable_nestloop = value,
                    ast::SetKnob::SortMerge => self.plan_opts.enable_sortmerge = value,
                    ast::SetKnob::OutputFile => self.output_file = value,
                }
                Ok(SessionOutput::Message("ok".to_string()))
            }
            ast::Statement::Help => Ok(SessionOutput::Message(HELP_TEXT.to_string())),
            dml @ (ast::Statement::Select(_) | ast::Statement::Insert { .. } | ast::Statement::Delete { .. } | ast::Statement::Update { .. }) => {
                self.run_dml(dml)
            }
        }
    }

    fn take_open_txn(&mut self) -> Result<TxnId, DbError> {
        self.txn_id
            .take()
            .ok_or_else(|| session_err(ErrorKind::Internal, "no transaction is open on this session"))
    }

    fn run_dml(&mut self, stmt: ast::Statement) -> Result<SessionOutput, DbError> {
        let catalog = self.db.catalog_snapshot();
        let plan = analyzer::analyze(stmt, &catalog, self.plan_opts)?;
        match self.run_plan(plan)? {
            PlanOutput::Rows { cols, rows } => {
                if self.output_file {
                    self.mirror_to_sorted_results(&cols, &rows)?;
                }
                Ok(SessionOutput::Rows { cols, rows })
            }
            PlanOutput::Affected(n) => Ok(SessionOutput::Affected(n)),
        }
    }

    fn run_load(&mut self, file: &str, table: &str) -> Result<SessionOutput, DbError> {
        let catalog = self.db.catalog_snapshot();
        let tab = catalog.get_table(table)?;
        let text = fs::read_to_string(file).map_err(|e| session_err(ErrorKind::IoError, format!("open {file}: {e}")))?;
        let mut rows = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != tab.cols.len() {
                return Err(session_err(
                    ErrorKind::IncompatibleType,
                    format!("row '{line}' has {} fields, table {table} has {}", tokens.len(), tab.cols.len()),
                ));
            }
            let values: Result<Vec<Value>, DbError> = tokens
                .iter()
                .zip(&tab.cols)
                .map(|(tok, col)| parse_literal(col.ty, tok))
                .collect();
            rows.push(Record::from_values(&tab.cols, &values?));
        }
        let n = rows.len();
        let plan = Plan::Insert {
            table: table.to_string(),
            cols: tab.cols.clone(),
            rows,
            indexes: tab.indexes.clone(),
        };
        self.run_plan(plan)?;
        Ok(SessionOutput::Message(format!("loaded {n} rows into {table}")))
    }

    /// Run `plan` to completion: reuse the session's open transaction if
    /// one exists, otherwise begin one and commit or abort it around
    /// this single statement.
    fn run_plan(&mut self, plan: Plan) -> Result<PlanOutput, DbError> {
        let auto_commit = self.txn_id.is_none();
        let txn_id = match self.txn_id {
            Some(id) => id,
            None => {
                let id = self.db.begin_txn();
                self.txn_id = Some(id);
                id
            }
        };
        let ctx = self.db.exec_context(txn_id, self.plan_opts);
        let result = (|| {
            let mut plan = plan;
            plan::resolve_subqueries(&mut plan, &ctx)?;
            plan::execute(&plan, &ctx)
        })();
        match result {
            Ok(output) => {
                if auto_commit {
                    self.db.commit_txn(txn_id)?;
                    self.txn_id = None;
                }
                Ok(output)
            }
            Err(err) => {
                let _ = self.db.abort_txn(txn_id, &err.message);
                self.txn_id = None;
                Err(err)
            }
        }
    }

    fn mirror_to_sorted_results(&self, cols: &[ColMeta], rows: &[Record]) -> Result<(), DbError> {
        let path = self.db.sorted_results_path();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| session_err(ErrorKind::IoError, format!("open {}: {e}", path.display())))?;
        for row in rows {
            let fields: Vec<String> = cols.iter().map(|c| row.field(c).to_string()).collect();
            writeln!(file, "{}", fields.join(" ")).map_err(|e| session_err(ErrorKind::IoError, e.to_string()))?;
        }
        Ok(())
    }

    fn desc_table(&self, table: &str) -> Result<SessionOutput, DbError> {
        let catalog = self.db.catalog_snapshot();
        let tab = catalog.get_table(table)?;
        let mut out = String::new();
        for col in &tab.cols {
            let _ = writeln!(out, "{:<16} {:<8} {}", col.name, col.ty, col.len);
        }
        Ok(SessionOutput::Message(out.trim_end().to_string()))
    }

    fn show_index(&self, table: &str) -> Result<SessionOutput, DbError> {
        let catalog = self.db.catalog_snapshot();
        let tab = catalog.get_table(table)?;
        let names: Vec<String> = tab.indexes.iter().map(IndexMeta::index_name).collect();
        Ok(SessionOutput::Message(names.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcore_types::value::ColType;

    fn fresh_db() -> Arc<Database> {
        Database::open(None, Duration::from_secs(3600), false).unwrap()
    }

    #[test]
    fn create_table_insert_and_select_round_trips() {
        let db = fresh_db();
        let mut session = Session::new(db);
        session.execute("CREATE TABLE g (id INT, score FLOAT)").unwrap();
        session.execute("INSERT INTO g VALUES (1, 90.0)").unwrap();
        session.execute("INSERT INTO g VALUES (2, 85.0)").unwrap();
        let SessionOutput::Rows { rows, .. } = session.execute("SELECT id FROM g WHERE score = 85.0").unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn explicit_begin_then_abort_undoes_the_insert() {
        let db = fresh_db();
        let mut session = Session::new(db);
        session.execute("CREATE TABLE g (id INT)").unwrap();
        session.execute("BEGIN").unwrap();
        session.execute("INSERT INTO g VALUES (1)").unwrap();
        session.execute("ABORT").unwrap();
        let SessionOutput::Rows { rows, .. } = session.execute("SELECT id FROM g").unwrap() else {
            panic!("expected rows");
        };
        assert!(rows.is_empty());
    }

    #[test]
    fn commit_without_open_transaction_errors() {
        let db = fresh_db();
        let mut session = Session::new(db);
        assert!(session.execute("COMMIT").is_err());
    }

    #[test]
    fn set_toggles_session_local_planner_flags() {
        let db = fresh_db();
        let mut session = Session::new(db);
        assert!(session.plan_opts.enable_nestloop);
        session.execute("SET enable_nestloop = false").unwrap();
        assert!(!session.plan_opts.enable_nestloop);
    }

    #[test]
    fn checkpoint_returns_a_stable_hex_digest_for_unchanged_catalog() {
        let db = fresh_db();
        let mut session = Session::new(db);
        session.execute("CREATE TABLE g (id INT)").unwrap();
        let SessionOutput::Message(a) = session.execute("CREATE STATIC_CHECKPOINT").unwrap() else {
            panic!("expected message");
        };
        let SessionOutput::Message(b) = session.execute("CREATE STATIC_CHECKPOINT").unwrap() else {
            panic!("expected message");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn render_grid_pads_columns_to_widest_value() {
        let cols = vec![ColMeta::new("t", "name", ColType::Str, 8, 0)];
        let rows = vec![Record::from_values(&cols, &[Value::Str("ab".to_string())])];
        let grid = render_grid(&cols, &rows);
        assert!(grid.starts_with("name"));
    }
}
