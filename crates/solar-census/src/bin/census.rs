//! Census operator CLI
//!
//! Run with: cargo run -p solar-census --bin census -- <command>

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solar_census::sources::{SourceAdapter, StaticSource};
use solar_census::storage::{AnomalyFilter, BodyFilter};
use solar_census::{
    AnomalySubtype, BodyCategory, CensusConfig, Pipeline, ResultStore, SourceKind, SystemClock,
};

/// Solar-system census: fuse catalogs, cluster populations, flag anomalies
#[derive(Parser)]
#[command(name = "census")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the result store path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every source, fuse, analyze and commit a snapshot
    Run {
        /// Ignore fresh cache entries
        #[arg(short, long)]
        force: bool,

        /// Serve sources from `<kind>.json` files in this directory instead of HTTP
        #[arg(long)]
        offline_dir: Option<PathBuf>,
    },

    /// List cache entries with their age and freshness
    CacheStatus,

    /// Invalidate every cache entry of a source
    Refresh {
        /// facts, elements, ephemeris or near_approach
        source: String,
    },

    /// List bodies of the current snapshot
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        category: Option<String>,

        /// Only anomalous (true) or only regular (false) bodies
        #[arg(long)]
        anomaly: Option<bool>,

        #[arg(long)]
        min_radius: Option<f64>,

        #[arg(long)]
        max_radius: Option<f64>,

        /// Free-text search over name, id, category and keywords
        #[arg(short, long)]
        search: Option<String>,

        #[arg(short, long, default_value = "1")]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Show one body with its analysis annotations and provenance
    Show {
        /// Canonical body id
        id: String,
    },

    /// Anomaly catalog, rarest first
    Anomalies {
        /// comet-like, retrograde, near-sun-grazer, scattered-disk or hybrid
        #[arg(long)]
        subtype: Option<String>,

        #[arg(short, long, default_value = "1")]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Projected points and cluster profiles
    Clusters {
        /// Print only the profiles
        #[arg(long)]
        profiles_only: bool,
    },

    /// Dashboard totals and filter ranges
    Stats,

    /// Committed snapshot versions
    Snapshots {
        /// Print the canonical snapshot JSON of this version
        #[arg(long)]
        dump: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fallback = if cli.verbose { "solar_census=debug" } else { "solar_census=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &cli.config {
        Some(path) => CensusConfig::from_file(path)?,
        None => CensusConfig::default(),
    };
    if let Some(path) = cli.database {
        config.storage.database_path = path;
    }

    match cli.command {
        Commands::Run { force, offline_dir } => run(config, force, offline_dir).await,
        Commands::CacheStatus => {
            let pipeline = offline_pipeline(config)?;
            print_json(&pipeline.cache().status()?)
        }
        Commands::Refresh { source } => {
            let kind = SourceKind::parse(&source)
                .ok_or_else(|| anyhow::anyhow!("unknown source '{}'", source))?;
            let pipeline = offline_pipeline(config)?;
            let removed = pipeline.refresh(kind)?;
            println!("{} {} cache entries for {}", style("Invalidated").green(), removed, kind);
            Ok(())
        }
        Commands::List { category, anomaly, min_radius, max_radius, search, page, page_size } => {
            let category = category
                .map(|c| BodyCategory::parse(&c).ok_or_else(|| anyhow::anyhow!("unknown category '{}'", c)))
                .transpose()?;
            let store = ResultStore::from_config(&config.storage)?;
            print_json(&store.list_bodies(&BodyFilter {
                category,
                anomaly,
                min_radius_km: min_radius,
                max_radius_km: max_radius,
                text: search,
                page,
                page_size,
            })?)
        }
        Commands::Show { id } => {
            let store = ResultStore::from_config(&config.storage)?;
            match store.body_detail(&id)? {
                Some(detail) => print_json(&detail),
                None => anyhow::bail!("no body '{}' in the current snapshot", id),
            }
        }
        Commands::Anomalies { subtype, page, page_size } => {
            let subtype = subtype
                .map(|s| AnomalySubtype::parse(&s).ok_or_else(|| anyhow::anyhow!("unknown subtype '{}'", s)))
                .transpose()?;
            let store = ResultStore::from_config(&config.storage)?;
            print_json(&store.anomaly_view(&AnomalyFilter { subtype, page, page_size })?)
        }
        Commands::Clusters { profiles_only } => {
            let store = ResultStore::from_config(&config.storage)?;
            if profiles_only {
                print_json(&store.cluster_profiles()?)
            } else {
                print_json(&store.clustering_view()?)
            }
        }
        Commands::Stats => {
            #[derive(Serialize)]
            struct Stats {
                dashboard: solar_census::storage::DashboardStats,
                ranges: solar_census::storage::FilterRanges,
            }
            let store = ResultStore::from_config(&config.storage)?;
            print_json(&Stats {
                dashboard: store.dashboard_stats()?,
                ranges: store.filter_ranges()?,
            })
        }
        Commands::Snapshots { dump } => {
            let store = ResultStore::from_config(&config.storage)?;
            match dump {
                Some(version) => match store.snapshot_json(version)? {
                    Some(json) => {
                        println!("{}", json);
                        Ok(())
                    }
                    None => anyhow::bail!("no snapshot version {}", version),
                },
                None => print_json(&store.list_runs()?),
            }
        }
    }
}

async fn run(config: CensusConfig, force: bool, offline_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let pipeline = match offline_dir {
        Some(dir) => {
            let sources = StaticSource::from_dir(&dir)?;
            if sources.is_empty() {
                anyhow::bail!("no <source>.json payload files in {}", dir.display());
            }
            sources
                .into_iter()
                .fold(offline_pipeline(config)?, |p, s| p.with_source(Arc::new(s) as Arc<dyn SourceAdapter>))
        }
        None => Pipeline::from_config(config)?,
    };

    println!("{}", style("Running census...").bold().cyan());
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed_precise}]")?,
    );
    spinner.set_message("fetching, fusing and analyzing");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = pipeline.run(force).await;
    spinner.finish_and_clear();
    let report = result?;

    for source in &report.sources {
        let status = if source.is_degraded() {
            style("degraded").yellow()
        } else {
            style("ok").green()
        };
        println!(
            "  {:<28} {:>8} records  {} cached / {} fetched / {} stale  [{}]",
            source.name, source.records, source.cache_hits, source.network_fetches, source.stale_served, status
        );
        for failure in &source.failures {
            println!("    {} {}", style("!").red(), failure);
        }
    }
    let run = &report.run;
    println!(
        "{} snapshot v{}: {} bodies, {} clustered (k={}), {} anomalies, {} identity conflicts",
        style("Committed").green().bold(),
        run.version,
        run.body_count,
        run.clustered_count,
        run.metadata.chosen_k.map(|k| k.to_string()).unwrap_or_else(|| "-".into()),
        run.anomaly_count,
        report.conflicts.len()
    );
    println!("  content hash {}", style(&run.content_hash).dim());
    Ok(())
}

/// Pipeline over the configured store without network sources
fn offline_pipeline(config: CensusConfig) -> anyhow::Result<Pipeline> {
    let store = Arc::new(ResultStore::from_config(&config.storage)?);
    Ok(Pipeline::new(config, store, Arc::new(SystemClock))?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
