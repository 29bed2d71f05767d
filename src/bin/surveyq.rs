//! surveyq CLI: operator interface to the assignment engine.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use surveyq::config::Config;
use surveyq::db::Db;
use surveyq::engine::{BackgroundJobs, Engine, FsRecordingSink, HttpRecordingFetcher};
use surveyq::model::{Domain, WorkItemId};
use surveyq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "surveyq", about = "Work leasing for QC review and CATI calling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the expiry sweep, view rebuild and upload retry until Ctrl-C
    Serve,
    /// Run one expiry sweep
    Sweep,
    /// Available-assignment view
    View {
        #[command(subcommand)]
        action: ViewAction,
    },
    /// Worker partition (AC) assignments
    Partitions {
        #[command(subcommand)]
        action: PartitionAction,
    },
    /// Lease operations on behalf of a worker
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },
    /// Recording uploads
    Uploads {
        #[command(subcommand)]
        action: UploadAction,
    },
}

#[derive(Subcommand)]
enum ViewAction {
    /// Regenerate the view from source records
    Rebuild {
        #[arg(long)]
        domain: Domain,
        #[arg(long)]
        survey: Option<String>,
    },
    /// Count open items by eligibility
    Report {
        #[arg(long)]
        domain: Domain,
        #[arg(long)]
        survey: Option<String>,
    },
}

#[derive(Subcommand)]
enum PartitionAction {
    /// Replace a worker's ACs
    Set {
        worker: String,
        survey: String,
        #[arg(long)]
        domain: Domain,
        /// AC name (repeatable)
        #[arg(long = "ac")]
        acs: Vec<String>,
    },
    /// Remove one AC
    Remove {
        worker: String,
        survey: String,
        ac: String,
        #[arg(long)]
        domain: Domain,
    },
    /// Remove the worker from the domain entirely
    Drop {
        worker: String,
        survey: String,
        #[arg(long)]
        domain: Domain,
    },
    /// Show a worker's ACs
    Show {
        worker: String,
        survey: String,
        #[arg(long)]
        domain: Domain,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    /// Lease the next item to a worker
    Request {
        worker: String,
        survey: String,
        #[arg(long)]
        domain: Domain,
    },
    /// Release a worker's lease
    Release {
        id: WorkItemId,
        worker: String,
        #[arg(long)]
        domain: Domain,
    },
}

#[derive(Subcommand)]
enum UploadAction {
    /// Run one upload pass
    Retry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let engine = Arc::new(open_engine(&config).await?);

    match cli.command {
        Command::Serve => cmd_serve(engine, &config).await,
        Command::Sweep => {
            let report = engine.reclaim_expired().await?;
            println!(
                "Reclaimed {} lease(s); {} view row(s) flagged expired",
                report.reclaimed.len(),
                report.view_rows_expired
            );
            Ok(())
        }
        Command::View { action } => match action {
            ViewAction::Rebuild { domain, survey } => {
                let rows = engine.rebuild_view(domain, survey.as_deref()).await?;
                println!("Rebuilt {domain} view: {rows} row(s)");
                Ok(())
            }
            ViewAction::Report { domain, survey } => {
                let report = engine.eligibility_report(domain, survey.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
        },
        Command::Partitions { action } => cmd_partitions(&engine, action).await,
        Command::Work { action } => cmd_work(&engine, action).await,
        Command::Uploads {
            action: UploadAction::Retry,
        } => {
            let fetcher = HttpRecordingFetcher::new(Duration::from_secs(60))?;
            let sink = FsRecordingSink::new(&config.recording_dir);
            let report = engine.process_recording_uploads(&fetcher, &sink).await?;
            println!(
                "Uploaded {}, failed {}, deleted {}, skipped {}",
                report.uploaded, report.failed, report.deleted, report.skipped
            );
            Ok(())
        }
    }
}

async fn open_engine(config: &Config) -> anyhow::Result<Engine> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let engine = Engine::new(Arc::new(db), config.load_policy()?)
        .with_priorities(config.load_priorities()?);
    Ok(engine)
}

async fn cmd_serve(engine: Arc<Engine>, config: &Config) -> anyhow::Result<()> {
    let jobs = BackgroundJobs::new(
        engine,
        Arc::new(HttpRecordingFetcher::new(Duration::from_secs(60))?),
        Arc::new(FsRecordingSink::new(&config.recording_dir)),
    );

    let handle = jobs.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    jobs.run().await?;
    Ok(())
}

async fn cmd_partitions(engine: &Engine, action: PartitionAction) -> anyhow::Result<()> {
    match action {
        PartitionAction::Set {
            worker,
            survey,
            domain,
            acs,
        } => {
            let assignment = engine.set_partitions(&worker, &survey, domain, &acs).await?;
            println!(
                "{worker} on {survey}/{domain}: {}",
                format_acs(assignment.partitions.iter())
            );
        }
        PartitionAction::Remove {
            worker,
            survey,
            ac,
            domain,
        } => {
            if engine.remove_partition(&worker, &survey, domain, &ac).await? {
                println!("Removed {ac} from {worker}");
            } else {
                println!("{worker} does not have {ac}");
            }
        }
        PartitionAction::Drop {
            worker,
            survey,
            domain,
        } => {
            if engine
                .remove_worker_from_domain(&worker, &survey, domain)
                .await?
            {
                println!("Removed {worker} from {survey}/{domain}");
            } else {
                println!("{worker} has no assignment on {survey}/{domain}");
            }
        }
        PartitionAction::Show {
            worker,
            survey,
            domain,
        } => match engine.partitions_for(&worker, &survey, domain).await? {
            Some(a) => println!(
                "{worker} on {survey}/{domain} ({}): {}",
                a.status.as_str(),
                format_acs(a.partitions.iter())
            ),
            None => println!("{worker} has no assignment on {survey}/{domain}"),
        },
    }
    Ok(())
}

async fn cmd_work(engine: &Engine, action: WorkAction) -> anyhow::Result<()> {
    match action {
        WorkAction::Request {
            worker,
            survey,
            domain,
        } => match engine.request_work(&worker, domain, &survey).await? {
            Some(grant) => println!(
                "Leased {} to {} until {}",
                grant.work_item_id,
                grant.worker_id,
                grant.expires_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("No work available; try again shortly."),
        },
        WorkAction::Release { id, worker, domain } => {
            if engine.release_lease(domain, id, &worker).await? {
                println!("Released {id}");
            } else {
                println!("{worker} does not hold {id}; nothing released");
            }
        }
    }
    Ok(())
}

fn format_acs<'a>(acs: impl Iterator<Item = &'a String>) -> String {
    let list: Vec<&str> = acs.map(String::as_str).collect();
    if list.is_empty() {
        "(no ACs)".to_string()
    } else {
        list.join(", ")
    }
}
