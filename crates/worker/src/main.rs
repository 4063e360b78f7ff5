//! `tona`: run one processing job from the command line.
//!
//! Uploads two directories of images as the first and second group, starts a
//! job, follows it to completion and saves the results as PNG files.

mod config;
mod images;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tona_client::TonaApi;
use tona_core::job::OrchestrationState;
use tona_core::types::GroupSlot;
use tona_core::wire::ProcessingOptions;
use tona_events::{SessionEvent, SessionEventKind};
use tona_pipeline::{JobOrchestrator, ResultMaterializer, ResultSet, SessionStore, UploadPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "tona", version, about = "Process two image groups with the Tona service")]
struct Args {
    /// Directory holding the first group's images.
    first_dir: PathBuf,

    /// Directory holding the second group's images.
    second_dir: PathBuf,

    /// Where result images are written.
    #[arg(long, default_value = "results")]
    out: PathBuf,

    /// Quality preset forwarded to the service.
    #[arg(long)]
    quality: Option<String>,

    /// Output format forwarded to the service.
    #[arg(long)]
    format: Option<String>,
}

impl Args {
    fn options(&self) -> Option<ProcessingOptions> {
        if self.quality.is_none() && self.format.is_none() {
            return None;
        }
        Some(ProcessingOptions {
            quality: self.quality.clone(),
            format: self.format.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = AppConfig::from_env().context("loading configuration")?;
    tracing::info!(api_url = %config.api_url, "Tona client starting");

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("building HTTP client")?;
    let transport = Arc::new(TonaApi::with_client(http, config.api_url.clone()));
    let session = Arc::new(SessionStore::new());
    let pipeline = config.pipeline();

    let uploads = UploadPipeline::new(transport.clone(), session.clone(), pipeline.upload.clone());
    let results = ResultMaterializer::new(
        transport.clone(),
        session.clone(),
        pipeline.download_concurrency,
    );
    let orchestrator = JobOrchestrator::new(
        transport.clone(),
        session.clone(),
        results.clone(),
        pipeline.poll.clone(),
    );

    let mut events = session.subscribe();

    for (slot, dir) in [(GroupSlot::First, &args.first_dir), (GroupSlot::Second, &args.second_dir)] {
        let batch = images::load_batch(dir)?;
        let group_id = uploads
            .upload(slot, &batch)
            .await
            .with_context(|| format!("uploading {slot} group from {}", dir.display()))?;
        tracing::info!(slot = %slot, group_id = %group_id, "Group ready");
    }

    let job_id = orchestrator
        .start_processing(args.options())
        .await
        .context("starting job")?;

    let outcome = tokio::select! {
        outcome = wait_for_results(&session, &mut events) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(job_id = %job_id, "Interrupted; cancelling job");
            if let Err(e) = orchestrator.cancel().await {
                tracing::error!(job_id = %job_id, error = %e, "Cancel failed");
            }
            Err(anyhow::anyhow!("interrupted"))
        }
    };
    orchestrator.shutdown().await;

    let set = outcome?;
    if set.failed > 0 {
        tracing::warn!(job_id = %job_id, failed = set.failed, "Some results could not be downloaded");
    }
    let paths = results
        .save_results(&args.out)
        .await
        .with_context(|| format!("saving results to {}", args.out.display()))?;

    for path in &paths {
        println!("{}", path.display());
    }
    tracing::info!(job_id = %job_id, saved = paths.len(), "Done");
    Ok(())
}

/// Follow session events until the job's results are ready or the job ends
/// without them.
async fn wait_for_results(
    session: &SessionStore,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> anyhow::Result<ResultSet> {
    loop {
        let kind = match events.recv().await {
            Ok(event) => event.kind,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => bail!("session closed"),
        };

        if let SessionEventKind::JobProgress { progress, message, .. } = &kind {
            tracing::info!(
                progress = format_args!("{:.0}%", progress * 100.0),
                message = message.as_deref().unwrap_or(""),
                "Processing",
            );
        }

        let snapshot = session.snapshot().await;
        if let Some(set) = snapshot.results.filter(|r| !r.is_loading) {
            return Ok(set);
        }
        match snapshot.state {
            OrchestrationState::Failed { error } => bail!(error),
            OrchestrationState::Idle if snapshot.job.is_none() => bail!("job was cancelled"),
            OrchestrationState::Completed if matches!(kind, SessionEventKind::ErrorRaised { .. }) => {
                match snapshot.current_error {
                    Some(error) => bail!(error),
                    None => bail!("results unavailable"),
                }
            }
            _ => {}
        }
    }
}

fn init_tracing() {
    let json = std::env::var("TONA_LOG_JSON").is_ok_and(|v| v == "1");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tona=info,tona_pipeline=info,tona_client=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}
