//! ldbm Tool Binary
//!
//! Operates on a backend data directory from the command line.

use clap::{Parser, Subcommand, ValueEnum};
use ldbm::index::IndexType;
use ldbm::{Backend, Config, Entry, Filter, Scope, SearchOptions, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// ldbm Tool
#[derive(Parser, Debug)]
#[command(name = "ldbm-tool")]
#[command(about = "Inspect and edit an ldbm directory backend")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ldbm_data")]
    data_dir: String,

    /// Naming-context suffix
    #[arg(short, long, default_value = "")]
    suffix: String,

    /// Index directive `attr:type,type` (types: pres, eq, approx, sub)
    #[arg(short, long = "index", value_name = "ATTR:TYPES")]
    indexes: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add an entry
    Add {
        /// DN of the new entry
        dn: String,

        /// Attribute value `attr=value` (repeatable)
        #[arg(short, long = "attr", value_name = "ATTR=VALUE")]
        attrs: Vec<String>,
    },

    /// Delete a leaf entry
    Delete {
        dn: String,
    },

    /// Search entries
    Search {
        /// Search base DN
        #[arg(short, long, default_value = "")]
        base: String,

        /// Search scope
        #[arg(long, value_enum, default_value = "sub")]
        scope: ScopeArg,

        /// Stop after this many entries (0 = unlimited)
        #[arg(short = 'z', long, default_value = "0")]
        size_limit: usize,

        /// Filter, e.g. `(&(objectclass=person)(cn=a*))`
        #[arg(default_value = "(objectclass=*)")]
        filter: String,
    },

    /// Print backend counters
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    Base,
    One,
    Sub,
}

impl From<ScopeArg> for Scope {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::Base => Scope::Base,
            ScopeArg::One => Scope::OneLevel,
            ScopeArg::Sub => Scope::Subtree,
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ldbm=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("ldbm-tool v{}", ldbm::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Bad arguments: {}", e);
            std::process::exit(2);
        }
    };

    let backend = match Backend::open(config) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to open backend: {}", e);
            std::process::exit(exit_code(&e));
        }
    };

    let outcome = run(&backend, args.command);
    let closed = backend.close();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        std::process::exit(exit_code(&e));
    }
}

/// 3 when the data files themselves failed, 1 for any other error
fn exit_code(e: &ldbm::LdbmError) -> i32 {
    if e.is_storage() {
        3
    } else {
        1
    }
}

fn build_config(args: &Args) -> Result<Config, String> {
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .suffix(&args.suffix)
        .sync_strategy(SyncStrategy::EveryWrite);

    for directive in &args.indexes {
        let (attr, types) = directive
            .split_once(':')
            .ok_or_else(|| format!("index directive {:?} lacks ':'", directive))?;
        let types = types
            .split(',')
            .map(|t| IndexType::parse(t).ok_or_else(|| format!("unknown index type {:?}", t)))
            .collect::<Result<Vec<_>, _>>()?;
        builder = builder.index(attr, &types);
    }

    Ok(builder.build())
}

fn run(backend: &Backend, command: Command) -> ldbm::Result<()> {
    match command {
        Command::Add { dn, attrs } => {
            let mut entry = Entry::new(&dn);
            for pair in &attrs {
                let (attr, value) = pair.split_once('=').ok_or_else(|| {
                    ldbm::LdbmError::Config(format!("attribute {:?} lacks '='", pair))
                })?;
                entry.add_values(attr.trim(), [value.trim().to_string()]);
            }
            let id = backend.add(entry)?;
            println!("added {} as id {}", ldbm::dn::normalize(&dn), id);
        }

        Command::Delete { dn } => {
            backend.delete(&dn)?;
            println!("deleted {}", ldbm::dn::normalize(&dn));
        }

        Command::Search {
            base,
            scope,
            size_limit,
            filter,
        } => {
            let filter = Filter::parse(&filter)?;
            let opts = SearchOptions {
                size_limit,
                abandon: None,
            };
            let result = backend.search(&base, scope.into(), &filter, &opts)?;
            for entry in &result.entries {
                println!("dn: {}", entry.dn);
                for (attr, values) in entry.attrs() {
                    for v in values {
                        println!("{}: {}", attr, v);
                    }
                }
                println!();
            }
            println!(
                "# {} entries{}",
                result.entries.len(),
                if result.truncated { " (size limit reached)" } else { "" }
            );
        }

        Command::Stats => {
            let stats = backend.stats();
            println!("next id:          {}", stats.next_id);
            println!("cache entries:    {}", stats.cache.entries);
            println!("cache hits:       {}", stats.cache.hits);
            println!("cache misses:     {}", stats.cache.misses);
            println!("cache evictions:  {}", stats.cache.evictions);
            println!("open containers:  {}", stats.pool.open);
            println!("container opens:  {}", stats.pool.opens);
            println!("handle evictions: {}", stats.pool.evictions);
            println!("pool waits:       {}", stats.pool.waits);
        }
    }
    Ok(())
}
