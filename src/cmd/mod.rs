mod regions;
mod rows;

use crate::config::Config;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-regions")]
#[command(version)]
#[command(about = "Plan parallel imports of mydumper-style dump directories", long_about = None)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cut every table of a dump directory into regions and assign engines
    Regions {
        /// Dump directory (overrides mydumper.source_dir from the config file)
        dir: Option<PathBuf>,

        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only plan specific tables (comma-separated, `table` or `db.table`)
        #[arg(short, long)]
        tables: Option<String>,

        /// Minimum region size in bytes
        #[arg(long)]
        min_region_size: Option<u64>,

        /// Engine batch size in bytes
        #[arg(long)]
        batch_size: Option<u64>,

        /// Growth factor of the first engines of a table
        #[arg(long)]
        batch_import_ratio: Option<f64>,

        /// Maximum number of growing engines per table
        #[arg(long)]
        table_concurrency: Option<usize>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Show progress while scanning tables
        #[arg(short, long)]
        progress: bool,
    },

    /// Print the row tuples of one byte range of a data file
    Rows {
        /// Data file (`.sql` or `.csv`)
        file: PathBuf,

        /// YAML configuration file (CSV dialect, read block size)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Region start offset in bytes
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Region size in bytes (default: to end of file)
        #[arg(long)]
        size: Option<u64>,

        /// Row id of the region's first row
        #[arg(long, default_value = "1")]
        row_id_min: u64,

        /// Stop after this many rows
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print raw statements/lines instead of normalized tuples
        #[arg(long)]
        raw: bool,

        /// Treat the first line of a CSV file as a header
        #[arg(long)]
        csv_header: bool,

        /// CSV field separator
        #[arg(long)]
        separator: Option<String>,

        /// CSV quote delimiter (empty disables quoting)
        #[arg(long)]
        delimiter: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Log to stderr so JSON on stdout stays clean.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Regions {
            dir,
            config,
            tables,
            min_region_size,
            batch_size,
            batch_import_ratio,
            table_concurrency,
            json,
            progress,
        } => regions::run(regions::RegionsArgs {
            dir,
            config,
            tables,
            min_region_size,
            batch_size,
            batch_import_ratio,
            table_concurrency,
            json,
            progress,
        }),
        Commands::Rows {
            file,
            config,
            offset,
            size,
            row_id_min,
            limit,
            raw,
            csv_header,
            separator,
            delimiter,
        } => rows::run(rows::RowsArgs {
            file,
            config,
            offset,
            size,
            row_id_min,
            limit,
            raw,
            csv_header,
            separator,
            delimiter,
        }),
        Commands::Completions { shell } => {
            generate(
                shell,
                &mut Cli::command(),
                "sql-regions",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}
