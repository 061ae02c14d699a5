use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use galaxy_etl::extract::{self, WorkerConfig};
use galaxy_etl::partition::WorkUnit;
use galaxy_etl::pipeline::{self, Launcher, PipelineConfig, PipelineSummary};
use galaxy_etl::registry::NameRegistry;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "galaxy-etl")]
#[command(about = "Import a galaxy dump into SQLite with stable name-to-id keys")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform the dump in parallel and load it into the store
    Import(ImportArgs),
    /// Process one stripe of the dump (spawned by `import`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// Path to the newline-delimited galaxy dump
    #[arg(short = 'i', long)]
    dump: PathBuf,

    /// SQLite database file
    #[arg(long, default_value = "galaxy.sqlite")]
    db: PathBuf,

    /// Directory holding the system/faction/station id maps
    #[arg(long, default_value = "registry")]
    registry_dir: PathBuf,

    /// Directory for intermediate files (defaults to the dump's directory)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Number of workers
    #[arg(short, long, default_value_t = galaxy_etl::config::default_jobs())]
    jobs: usize,

    /// Extend the id registry with every name in the dump before transforming
    #[arg(long)]
    ids: bool,

    /// Refresh the commodity and module catalog from the dump
    #[arg(long)]
    caches: bool,

    /// Also import commodity prices and module sales
    #[arg(long)]
    market: bool,

    /// Drop and recreate every table before importing
    #[arg(short, long)]
    recreate_tables: bool,

    /// Skip the parse and load steps
    #[arg(short = 'k', long)]
    skip: bool,

    /// Keep intermediate files after the run
    #[arg(long)]
    no_cleanup: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Adopt ids already present in the store into the registry
    #[arg(long)]
    seed_registry: bool,

    /// Run workers as threads of this process instead of child processes
    #[arg(long)]
    threads: bool,
}

#[derive(Args)]
struct WorkerArgs {
    #[arg(long)]
    dump: PathBuf,

    #[arg(long)]
    db: PathBuf,

    #[arg(long)]
    registry_dir: PathBuf,

    #[arg(long)]
    scratch_dir: PathBuf,

    #[arg(long)]
    worker_id: u32,

    #[arg(long)]
    total_workers: u32,

    #[arg(long)]
    market: bool,
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Any run that drops tables asks first, `--skip` included. A plain `--skip` only touches the registry.
fn needs_confirmation(args: &ImportArgs) -> bool {
    !args.yes && (args.recreate_tables || !args.skip)
}

fn run_import(args: ImportArgs, verbosity: u8) -> Result<()> {
    if !args.dump.is_file() {
        bail!("Dump not found: {:?}", args.dump);
    }

    let scratch_dir = match args.scratch_dir.clone() {
        Some(dir) => dir,
        None => args
            .dump
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    };

    let mut refresh_ids = args.ids;
    if !refresh_ids && !NameRegistry::files_present(&args.registry_dir) {
        warn!(dir = ?args.registry_dir, "Registry files missing, running id maintenance");
        refresh_ids = true;
    }

    if needs_confirmation(&args) {
        let action = if args.recreate_tables {
            "drop and recreate every table"
        } else {
            "replace all systems, factions and stations"
        };
        if !confirm(&format!("This will {action} in {:?}. Continue?", args.db))? {
            bail!("Aborted by user");
        }
    }

    let launcher = if args.threads {
        Launcher::Threads
    } else {
        Launcher::Processes {
            exe: std::env::current_exe().context("Failed to locate own executable")?,
            verbosity,
        }
    };

    let config = PipelineConfig {
        dump: args.dump,
        db: args.db,
        registry_dir: args.registry_dir,
        scratch_dir,
        jobs: args.jobs,
        refresh_ids,
        refresh_caches: args.caches,
        include_market: args.market,
        recreate_tables: args.recreate_tables,
        skip_load: args.skip,
        cleanup: !args.no_cleanup,
        seed_registry: args.seed_registry,
        launcher,
    };

    let summary = pipeline::run(&config)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &PipelineSummary) {
    let times = &summary.times;
    println!();
    println!("=== Summary ===");
    println!("Maintenance time:   {:.2}s", times.maintenance.as_secs_f64());
    println!("Transform time:     {:.2}s", times.transform.as_secs_f64());
    println!("Merge time:         {:.2}s", times.merge.as_secs_f64());
    println!("Load time:          {:.2}s", times.load.as_secs_f64());
    println!();

    for r in summary.seeded.iter().chain(&summary.registry) {
        println!(
            "Registry {:<9} {} known, {} added",
            format!("{}:", r.category),
            r.known,
            r.added
        );
    }
    if let Some(catalog) = &summary.catalog {
        println!(
            "Catalog:            {} commodities, {} modules",
            catalog.commodities, catalog.modules
        );
    }

    if summary.workers > 0 {
        let c = &summary.counts;
        println!("Workers:            {}", summary.workers);
        println!("Lines read:         {}", c.lines_read);
        println!("Systems:            {}", c.systems);
        println!("Faction rows:       {}", c.factions);
        println!("Stations:           {}", c.stations);
        println!("Stub factions:      {}", c.stubs);
        println!("Malformed lines:    {}", c.malformed_lines);
        println!("Missing ids:        {}", c.missing_ids);
        println!("Skipped factions:   {}", c.skipped_factions);
        println!("Skipped stations:   {}", c.skipped_stations);
        println!("Skipped market rows: {}", c.skipped_market_rows);
    }
    if let Some(merge) = &summary.merge {
        println!(
            "Unique factions:    {} ({} duplicates dropped)",
            merge.factions.written, merge.factions.duplicates
        );
    }
    for (step, rows) in &summary.loaded {
        println!("Loaded {:<19} {}", format!("{step}:"), rows);
    }
    if summary.overridden > 0 {
        println!("Overridden factions: {}", summary.overridden);
    }
}

fn run_worker(args: WorkerArgs) -> Result<()> {
    let config = WorkerConfig {
        dump: args.dump,
        db: args.db,
        registry_dir: args.registry_dir,
        scratch_dir: args.scratch_dir,
        unit: WorkUnit::new(args.worker_id, args.total_workers)?,
        include_market: args.market,
    };
    extract::run_worker(&config)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Import(args) => run_import(args, cli.verbose),
        Commands::Worker(args) => run_worker(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_args(extra: &[&str]) -> ImportArgs {
        let argv = ["galaxy-etl", "import", "-i", "galaxy.json"]
            .into_iter()
            .chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Import(args) => args,
            Commands::Worker(_) => panic!("expected import"),
        }
    }

    #[test]
    fn recreate_with_skip_still_asks() {
        assert!(needs_confirmation(&import_args(&["-r", "-k"])));
        assert!(!needs_confirmation(&import_args(&["-r", "-k", "-y"])));
    }

    #[test]
    fn skip_alone_does_not_ask() {
        assert!(!needs_confirmation(&import_args(&["-k"])));
    }

    #[test]
    fn plain_import_asks() {
        assert!(needs_confirmation(&import_args(&[])));
        assert!(!needs_confirmation(&import_args(&["--yes"])));
    }
}
