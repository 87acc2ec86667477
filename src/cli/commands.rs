use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::config::{CourierConfig, QueueBackend};
use crate::media::selector;
use crate::media::{FetchExecutor, MediaTool, YtDlp};
use crate::messenger::{Messenger, TelegramMessenger};
use crate::pipeline::{intake, DeliveryStage, FetchStage, IntakeState, Lanes, Task};
use crate::storage::queue::{self, WorkQueue};
use crate::utils::{read_secret, shutdown, Shutdown};

/// Run the intake HTTP server
pub async fn intake(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let queue = queue::open(&config.queue).await?;
    let bind_address = bind.unwrap_or_else(|| config.intake.bind_address.clone());

    run_intake(&config, queue, &bind_address, shutdown::on_signal()).await
}

/// Run the fetch stage loop
pub async fn fetch(config_path: Option<&Path>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let queue = queue::open(&config.queue).await?;

    build_fetch_stage(&config, queue)?
        .run(shutdown::on_signal())
        .await
}

/// Run the delivery stage loop
pub async fn deliver(config_path: Option<&Path>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let queue = queue::open(&config.queue).await?;

    build_delivery_stage(&config, queue)?
        .run(shutdown::on_signal())
        .await
}

/// Run intake, fetch and delivery side by side in this process
pub async fn standalone(config_path: Option<&Path>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;

    // A blocked BLPOP holds its connection, so each Redis consumer gets its own
    let (intake_queue, fetch_queue, delivery_queue) = match config.queue.backend {
        QueueBackend::Memory => {
            let shared = queue::open(&config.queue).await?;
            (shared.clone(), shared.clone(), shared)
        }
        QueueBackend::Redis => (
            queue::open(&config.queue).await?,
            queue::open(&config.queue).await?,
            queue::open(&config.queue).await?,
        ),
    };

    let fetch_stage = build_fetch_stage(&config, fetch_queue)?;
    let delivery_stage = build_delivery_stage(&config, delivery_queue)?;
    let shutdown = shutdown::on_signal();

    tokio::try_join!(
        run_intake(&config, intake_queue, &config.intake.bind_address, shutdown.clone()),
        fetch_stage.run(shutdown.clone()),
        delivery_stage.run(shutdown),
    )?;

    info!("All stages stopped");
    Ok(())
}

/// Publish a task straight to the inbound lane
pub async fn submit(config_path: Option<&Path>, url: String, destination: String) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let queue = queue::open(&config.queue).await?;
    if config.queue.backend == QueueBackend::Memory {
        warn!("Memory queue is private to this process; the task will not reach any stage");
    }

    let task = Task::new(url, destination);
    queue::publish_json(queue.as_ref(), &config.queue.inbound_lane, &task)
        .await
        .context("Failed to publish task")?;

    info!("Task {} queued on {}", task.task_id, config.queue.inbound_lane);
    println!("{}", task.task_id);

    Ok(())
}

/// Show the renditions of a link and the one the selector would pick
pub async fn formats(config_path: Option<&Path>, url: String) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let tool = YtDlp::locate(config.fetch.ytdlp_path.as_deref())?;

    let listing = tool
        .list_renditions(&url)
        .await
        .context(format!("Failed to list formats of {}", url))?;
    let renditions = listing.muxed_renditions();

    println!("Source aspect ratio: {}", describe(listing.source_aspect_ratio()));
    println!("{:<12} {:>11} {:>7} {:>9} {:>12}", "FORMAT", "RESOLUTION", "RATIO", "TBR", "SIZE");
    for rendition in &renditions {
        let resolution = match (rendition.width, rendition.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            (None, Some(h)) => format!("?x{}", h),
            _ => "-".to_string(),
        };
        println!(
            "{:<12} {:>11} {:>7} {:>9} {:>12}",
            rendition.format_id,
            resolution,
            describe(rendition.aspect_ratio()),
            rendition.bitrate.map_or("-".to_string(), |b| format!("{:.0}k", b)),
            rendition.filesize_bytes.map_or("-".to_string(), |s| s.to_string()),
        );
    }

    match selector::select(&renditions, listing.source_aspect_ratio(), config.fetch.max_file_size_bytes) {
        Ok(chosen) => println!(
            "Selected: {} (ceiling {} bytes)",
            chosen.format_id, config.fetch.max_file_size_bytes
        ),
        Err(e) => println!("Selected: none ({})", e),
    }

    Ok(())
}

/// Print the depth of both lanes
pub async fn status(config_path: Option<&Path>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    let queue = queue::open(&config.queue).await?;
    let lanes = Lanes::from_settings(&config.queue);

    println!("Queue backend: {:?}", config.queue.backend);
    for lane in [&lanes.inbound, &lanes.outbound] {
        let pending = queue
            .pending(lane)
            .await
            .context(format!("Failed to read depth of {}", lane))?;
        println!("  {:<20} {} pending", lane, pending);
    }

    Ok(())
}

/// Write the default configuration file
pub async fn init_config() -> Result<()> {
    let path = CourierConfig::default().save_as_default()?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}

/// Show the effective configuration
pub async fn show_config(config_path: Option<&Path>) -> Result<()> {
    let config = CourierConfig::load(config_path)?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
    Ok(())
}

async fn run_intake(
    config: &CourierConfig,
    queue: Arc<dyn WorkQueue>,
    bind_address: &str,
    shutdown: Shutdown,
) -> Result<()> {
    let api_token = read_secret(&config.intake.api_token_file)?;
    let state = IntakeState::new(queue, config.queue.inbound_lane.clone());

    intake::serve(state, api_token, bind_address, shutdown).await
}

fn build_fetch_stage(config: &CourierConfig, queue: Arc<dyn WorkQueue>) -> Result<FetchStage> {
    let tool = YtDlp::locate(config.fetch.ytdlp_path.as_deref())?;
    info!("Fetch stage using {}", tool.name());
    let executor = FetchExecutor::new(
        Arc::new(tool),
        config.fetch.download_dir.clone(),
        config.fetch.max_file_size_bytes,
    );

    Ok(FetchStage::new(
        queue,
        Lanes::from_settings(&config.queue),
        executor,
        retry_delay(config),
    ))
}

fn build_delivery_stage(config: &CourierConfig, queue: Arc<dyn WorkQueue>) -> Result<DeliveryStage> {
    let bot_token = read_secret(&config.delivery.bot_token_file)?;
    let messenger: Arc<dyn Messenger> = Arc::new(
        TelegramMessenger::new(
            &config.delivery.api_base_url,
            &bot_token,
            Duration::from_secs(config.delivery.request_timeout_secs),
        )
        .context("Failed to build chat client")?,
    );

    Ok(DeliveryStage::new(
        queue,
        Lanes::from_settings(&config.queue),
        messenger,
        retry_delay(config),
    ))
}

fn retry_delay(config: &CourierConfig) -> Duration {
    Duration::from_millis(config.queue.retry_delay_ms)
}

fn describe(ratio: Option<f64>) -> String {
    ratio.map_or("-".to_string(), |r| format!("{:.3}", r))
}
