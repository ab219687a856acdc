///
/// litebind shell - Main Entry Point
///
/// Runs SQL statements against a database and prints their results:
/// - litebind-shell --database app.db "select * from item"
/// - litebind-shell --config litebind.toml --json "select ..." "update ..."
///
/// Flags override the values loaded from `--config`.
///

mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use litebind::{Connection, ConnectionConfig, Result, Value};
use tracing::debug;

#[derive(Parser)]
#[command(name = "litebind-shell")]
#[command(author, version, about = "Run SQL statements through litebind", long_about = None)]
struct Cli {
    /// TOML file describing the connection
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database location (empty for in-memory, `file:` URIs allowed)
    #[arg(long)]
    database: Option<String>,

    /// Open the database read-only
    #[arg(long)]
    read_only: bool,

    /// Print results column by column
    #[arg(long)]
    columns: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log every statement the engine runs
    #[arg(long)]
    trace: bool,

    /// SQL statements, run in order
    #[arg(required = true)]
    sql: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn connection_config(cli: &Cli) -> Result<ConnectionConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::from_path(path)?,
        None => ConnectionConfig::in_memory(),
    };
    if let Some(location) = &cli.database {
        config.location = location.clone();
    }
    config.read_only |= cli.read_only;
    config.trace |= cli.trace;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = connection_config(cli)?;
    let conn = Connection::open_with(&config)?;
    debug!(location = %config.location, statements = cli.sql.len(), "shell connected");

    for sql in &cli.sql {
        run_statement(&conn, sql, cli)?;
    }
    Ok(())
}

fn run_statement(conn: &Connection, sql: &str, cli: &Cli) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() == 0 {
        let before = conn.total_changes();
        stmt.execute()?;
        let changes = conn.total_changes().saturating_sub(before);
        if cli.json {
            println!("{}", serde_json::json!({ "changes": changes }));
        } else {
            println!("ok ({} rows affected)", changes);
        }
        return Ok(());
    }

    let names = stmt.column_names().to_vec();
    if cli.columns {
        let columns = stmt.column_major_results()?;
        if cli.json {
            println!("{}", output::columns_json(&names, &columns));
        } else {
            println!("{}", output::columns_text(&names, &columns));
        }
    } else {
        let count = names.len();
        let rows: Vec<Vec<Value<'static>>> =
            stmt.map_rows(|row| (0..count).map(|index| row.value(index)).collect())?;
        if cli.json {
            println!("{}", output::rows_json(&names, &rows));
        } else {
            println!("{}", output::rows_text(&names, &rows));
        }
    }
    Ok(())
}
