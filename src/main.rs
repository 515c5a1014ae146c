use clap::{Parser, Subcommand};
use route_sheet_scanner_lib::commands;
use route_sheet_scanner_lib::config::{self, ExtractionConfig};
use route_sheet_scanner_lib::db::{Db, RecordFilter};
use route_sheet_scanner_lib::logging::init_logging;
use route_sheet_scanner_lib::Result;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "route-sheet-scanner", version, about = "Digitize scanned route sheets")]
struct Cli {
    /// SQLite database (default: ROUTE_SHEET_DB or the app data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a scan to the extraction service, validate and store it
    Scan { file: PathBuf },
    /// Validate and store a saved extraction JSON file
    Import { file: PathBuf },
    /// Validate an extraction JSON file without storing anything
    Validate { file: PathBuf },
    /// List stored rows
    List {
        #[arg(long)]
        tournee: Option<String>,
        #[arg(long)]
        employe: Option<String>,
        #[arg(long)]
        vehicule: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Correct one field of a stored row (empty value clears it)
    Edit {
        id: i64,
        column: String,
        value: String,
    },
    /// Delete a stored row
    Delete { id: i64 },
    /// Show recent scans
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show whether the extraction service is configured
    Status,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_db(cli_path: Option<PathBuf>) -> Result<Db> {
    let path = match cli_path {
        Some(p) => p,
        None => config::database_path()?,
    };
    Db::new(path)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Scan { file } => {
            let extraction = ExtractionConfig::from_env()?;
            let db = open_db(cli.db)?;
            print_json(&commands::scan_route_sheet(&db, &extraction, &file)?)
        }
        Command::Import { file } => {
            let text = fs::read_to_string(&file)?;
            let db = open_db(cli.db)?;
            print_json(&commands::import_extraction(&db, &commands::source_name(&file), &text)?)
        }
        Command::Validate { file } => {
            let text = fs::read_to_string(&file)?;
            print_json(&commands::validate_extraction(&text)?)
        }
        Command::List {
            tournee,
            employe,
            vehicule,
            search,
            limit,
        } => {
            let db = open_db(cli.db)?;
            let filter = RecordFilter {
                tournee,
                id_employe: employe,
                vehicule,
                search,
                scan_id: None,
                limit,
            };
            print_json(&commands::list_records(&db, &filter)?)
        }
        Command::Edit { id, column, value } => {
            let db = open_db(cli.db)?;
            print_json(&commands::update_record_field(&db, id, &column, &value)?)
        }
        Command::Delete { id } => {
            let db = open_db(cli.db)?;
            commands::delete_record(&db, id)
        }
        Command::History { limit } => {
            let db = open_db(cli.db)?;
            print_json(&commands::get_history(&db, limit)?)
        }
        Command::Status => {
            println!("{}", ExtractionConfig::status());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    config::load_env();
    init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
