use camino::Utf8PathBuf;
use clap::Parser;
use dbsync::{IntrospectOptions, Schema, descriptor, reconcile};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

mod config;

/// Additive schema reconciliation for SQL Server.
#[derive(Parser, Debug)]
#[command(name = "dbsync", version)]
struct Cli {
    /// Log every step, including the statements that run
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Parse a descriptor and summarize what it describes
    Check {
        /// Descriptor to read (defaults to `descriptor` in .config/dbsync.toml)
        #[arg(long)]
        descriptor: Option<Utf8PathBuf>,
    },
    /// Print the script that would build the described schema on an empty database
    Script {
        /// Descriptor to read (defaults to `descriptor` in .config/dbsync.toml)
        #[arg(long)]
        descriptor: Option<Utf8PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "dbsync=debug" } else { "dbsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = config::load_or_default()?;

    match cli.command {
        Commands::Check { descriptor } => {
            let path = descriptor_path(descriptor, &loaded)?;
            let schema = load_descriptor(&path)?;
            print_summary(&path, &schema);
            warn_excluded(&schema, &loaded.config.introspect);
        }
        Commands::Script { descriptor } => {
            let path = descriptor_path(descriptor, &loaded)?;
            let schema = load_descriptor(&path)?;
            print_script(&schema);
        }
    }
    Ok(())
}

/// The `--descriptor` flag wins over the config file.
fn descriptor_path(
    flag: Option<Utf8PathBuf>,
    loaded: &config::Loaded,
) -> Result<Utf8PathBuf, String> {
    flag.or_else(|| loaded.descriptor()).ok_or_else(|| {
        "no descriptor given; pass --descriptor or set `descriptor` in .config/dbsync.toml"
            .to_string()
    })
}

fn load_descriptor(path: &Utf8PathBuf) -> Result<Schema, Box<dyn std::error::Error>> {
    tracing::debug!(%path, "reading descriptor");
    let file = std::fs::File::open(path).map_err(|e| format!("{}: {}", path, e))?;
    Ok(descriptor::read(std::io::BufReader::new(file))?)
}

fn print_summary(path: &Utf8PathBuf, schema: &Schema) {
    println!(
        "{} {} ({} tables)",
        "ok".green().bold(),
        path,
        schema.len()
    );
    for table in schema.tables() {
        println!("  {}", table.to_string().bold());
        for col in table.columns() {
            println!("    {}", col.dimmed());
        }
        for idx in table.indexes() {
            let names: Vec<&str> = idx.columns().iter().map(|c| c.name.as_str()).collect();
            println!(
                "    {} {} ({})",
                "index".cyan(),
                idx.name,
                names.join(", ")
            );
        }
        for fk in table.foreign_keys() {
            println!(
                "    {} {} -> {}.{}",
                "foreign key".cyan(),
                fk.name,
                fk.references_table,
                fk.references_column
            );
        }
        if !table.seed_records().is_empty() {
            println!(
                "    {} {}",
                table.seed_records().len().yellow(),
                "seed records".yellow()
            );
        }
    }
}

/// Tables the descriptor wants but capture is configured to skip. A pass
/// never sees them live, so it tries to create them every time.
fn excluded_tables<'a>(schema: &'a Schema, options: &IntrospectOptions) -> Vec<&'a str> {
    schema
        .tables()
        .map(|t| t.name())
        .filter(|name| options.is_excluded(name))
        .collect()
}

fn warn_excluded(schema: &Schema, options: &IntrospectOptions) {
    for name in excluded_tables(schema, options) {
        eprintln!(
            "{} table {} is listed in introspect.excluded_tables; every pass will try to create it",
            "warning:".yellow().bold(),
            name
        );
    }
}

/// Every statement a pass against an empty database would run, as a script
/// with `GO` batch separators.
fn print_script(schema: &Schema) {
    let actions = reconcile::plan(schema, &Schema::new(), true);
    for action in &actions {
        println!("-- {}", action);
        for stmt in action.statements() {
            println!("{}", stmt.to_script());
            println!("GO");
        }
        println!();
    }
}
