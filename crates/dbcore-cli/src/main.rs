//! Binary: rmdb
//! Responsibility: process entry point — parse startup flags, open or
//! initialize a database under `--data-dir`, run recovery when asked
//! or needed, then drive a line-oriented REPL against one `Session`.
//! Does not own any engine logic; every statement runs through
//! `dbcore::session`.

use clap::Parser;
use dbcore::session::{render_grid, Database, Session, SessionOutput};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rmdb", about = "A single-node relational database engine")]
struct Cli {
    /// Directory holding the catalog, heap files, and write-ahead log.
    /// Omit for an ephemeral in-memory database.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// How often the background log-flush thread forces buffered log
    /// records to the durable buffer, in milliseconds.
    #[arg(long, default_value_t = 200)]
    flush_interval_ms: u64,

    /// Force recovery to run even if the log on disk is empty.
    #[arg(long, default_value_t = false)]
    recover: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    let _ = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(level)
        .chain(std::io::stderr())
        .apply();
}

fn render_output(output: SessionOutput) -> String {
    match output {
        SessionOutput::Rows { cols, rows } => {
            if rows.is_empty() {
                "(0 rows)".to_string()
            } else {
                render_grid(&cols, &rows)
            }
        }
        SessionOutput::Affected(n) => format!("({n} rows affected)"),
        SessionOutput::Message(msg) => msg,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let db = match Database::open(
        cli.data_dir.clone(),
        Duration::from_millis(cli.flush_interval_ms),
        cli.recover,
    ) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("failed to open database: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = Session::new(db);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("failed to start line editor: {err}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        let prompt = if session.has_open_transaction() { "rmdb*> " } else { "rmdb> " };
        match editor.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }
                match session.execute(line) {
                    Ok(output) => println!("{}", render_output(output)),
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("read error: {err}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
