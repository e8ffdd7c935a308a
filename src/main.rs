use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use autodj_engine::config::EngineConfig;
use autodj_engine::db::Database;
use autodj_engine::labeler::LabelerAdapter;
use autodj_engine::pipeline::{self, ProgressEvent};

#[derive(Parser)]
#[command(name = "autodj", version, about = "Automatic DJ engine: descriptor extraction, cue planning, mix sequencing")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover audio files and hash them, without analyzing
    Scan {
        /// Directories or files to scan
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Scan, analyze and cue-plan every track under the given paths
    Analyze {
        /// Directories or files to analyze
        #[arg(required = true)]
        paths: Vec<String>,

        /// Number of parallel analysis workers (0 = hardware parallelism)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Enable the LLM labeler adapter against this endpoint
        #[arg(long)]
        labeler_endpoint: Option<String>,
    },

    /// Print the stored descriptor for a track, by content hash
    Show {
        hash: String,
    },

    /// Print the stored cue plan for a track, by content hash
    Plan {
        hash: String,
    },

    /// Plan a DJ session over every analyzed track in the database
    Sequence {
        /// Content hash of the track to start from (defaults to the first analyzed track)
        #[arg(long)]
        start: Option<String>,

        /// Target session length in tracks (defaults to "use every analyzed track")
        #[arg(long)]
        length: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let db_path = cli.db_path.unwrap_or_else(autodj_engine::config::default_db_path);
    log::info!("database: {}", db_path.display());
    let db = Database::open(&db_path).context("failed to open database")?;

    let config_path = cli.config.unwrap_or_else(autodj_engine::config::default_config_path);
    let mut config = EngineConfig::load(&config_path).context("failed to load config")?;

    match cli.command {
        Commands::Scan { paths } => {
            let result = autodj_engine::scanner::scan(&db, &paths).context("scan failed")?;
            println!("scan complete: {} scanned, {} discovered, {} errors", result.scanned, result.tracks.len(), result.errors);
        }

        Commands::Analyze { paths, jobs, labeler_endpoint } => {
            if jobs > 0 {
                config.jobs = jobs;
            }
            let endpoint = labeler_endpoint.or_else(|| config.labeler_endpoint.clone());
            let labeler = match endpoint {
                Some(endpoint) => LabelerAdapter::enabled(endpoint, 2.0, 5.0),
                None => LabelerAdapter::disabled(),
            };

            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}").unwrap());

            let results = pipeline::process_library(&db, &paths, &config, &labeler, |event: ProgressEvent| {
                bar.set_message(format!("job {} {} ({}%): {}", event.job_id, event.phase.as_str(), event.progress, event.message));
                bar.tick();
            })
            .context("analysis pipeline failed")?;

            let failed = results.iter().filter(|r| r.failure.is_some()).count();
            bar.finish_with_message(format!("{} tracks processed, {} failed", results.len(), failed));

            for result in &results {
                if let Some(failure) = &result.failure {
                    eprintln!("FAILED {}: [{}] {}", result.hash, failure.kind.as_str(), failure.message);
                }
            }
        }

        Commands::Show { hash } => {
            let descriptor = autodj_engine::db::queries::get_descriptor(&db, &hash).context("query failed")?;
            match descriptor {
                Some(d) => println!("{}", serde_json::to_string_pretty(&d)?),
                None => println!("no descriptor stored for {}", hash),
            }
        }

        Commands::Plan { hash } => {
            let plan = autodj_engine::db::queries::get_mix_plan(&db, &hash).context("query failed")?;
            match plan {
                Some(p) => println!("{}", serde_json::to_string_pretty(&p)?),
                None => println!("no mix plan stored for {}", hash),
            }
        }

        Commands::Sequence { start, length } => {
            let session = pipeline::sequence_session(&db, start.as_ref(), length).context("sequencing failed")?;
            match session {
                Some(s) => println!("{}", serde_json::to_string_pretty(&s)?),
                None => println!("no feasible sequence: fewer than two analyzed tracks"),
            }
        }
    }

    Ok(())
}
