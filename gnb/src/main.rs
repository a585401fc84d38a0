//! Albor Space Downlink Lower PHY Application
//!
//! Runs the downlink lower PHY standalone: random resource grids are modulated and the
//! resulting baseband is pulled as a radio would, optionally recorded to an IQ file.

mod config;
mod test_mode;

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::GnbConfig;
use lower_phy::{CfoCommand, DownlinkNotifiers, DownlinkProcessor, TokioTaskExecutor};
use test_mode::{run_baseband, DownlinkStats, GridGenerator};

/// Albor Space downlink lower PHY
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/dl_lower_phy.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of slots to transmit
    #[arg(long)]
    nof_slots: Option<u32>,

    /// Record port 0 to this file as interleaved little-endian f32
    #[arg(long)]
    iq_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut gnb_config = GnbConfig::from_yaml_file(&args.config)?;
    if let Some(nof_slots) = args.nof_slots {
        gnb_config.test_mode.nof_slots = nof_slots;
    }
    if args.iq_file.is_some() {
        gnb_config.test_mode.iq_file = args.iq_file.clone();
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&gnb_config.log.all_level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space downlink lower PHY");
    info!("Configuration file: {}", args.config);

    let config = gnb_config.downlink_config()?;
    info!("Cell configuration:");
    info!("  DL ARFCN: {} ({:.3} MHz)", gnb_config.cell_cfg.dl_arfcn, config.ofdm.center_freq_hz / 1e6);
    info!("  Band: {}", gnb_config.cell_cfg.band);
    info!("  Bandwidth: {} MHz", gnb_config.cell_cfg.channel_bandwidth_mhz);
    info!("  Subcarrier spacing: {} kHz", config.scs.to_khz());
    info!("  Sample rate: {}", config.srate);
    info!("  TX ports: {}", config.nof_tx_ports);

    let executor = Arc::new(TokioTaskExecutor::new(
        Handle::current(),
        gnb_config.lower_phy.max_pending_tasks,
    ));
    let mut processor = DownlinkProcessor::from_config(config.clone(), executor.clone())?;

    let stats = Arc::new(DownlinkStats::default());
    let generator = Arc::new(GridGenerator::new(
        &config,
        processor.request_handler(),
        gnb_config.test_mode.load,
        0x5eed,
    ));
    processor.connect(DownlinkNotifiers {
        timing: Some(generator.clone()),
        metrics: Some(stats.clone()),
        pdxch: Some(stats.clone()),
    });

    let tx_time_offset = gnb_config.ru_sdr.time_alignment_calibration;
    if tx_time_offset != 0 && !processor.set_tx_time_offset(tx_time_offset) {
        warn!("Transmit time offset of {} samples rejected", tx_time_offset);
    }

    if let Some(cfo_hz) = gnb_config.test_mode.cfo_hz {
        let samples_per_slot =
            config.srate.samples_per_subframe() as u64 / config.scs.nof_slots_per_subframe() as u64;
        let command = CfoCommand {
            start: samples_per_slot * gnb_config.test_mode.cfo_start_slot as u64,
            cfo_hz,
            cfo_drift_hz_s: gnb_config.test_mode.cfo_drift_hz_s,
        };
        if processor.schedule_cfo_command(command) {
            info!("CFO of {} Hz scheduled from sample {}", cfo_hz, command.start);
        }
    }

    let running = Arc::new(AtomicBool::new(true));

    // Start baseband processing in background
    let baseband_handle = {
        let running = running.clone();
        let settings = gnb_config.test_mode.clone();
        tokio::task::spawn_blocking(move || {
            let result = run_baseband(&mut processor, &config, &settings, &running);
            processor.stop();
            result
        })
    };

    // Start statistics reporting
    let stats_handle = {
        let stats = stats.clone();
        let executor = executor.clone();
        let period = tokio::time::Duration::from_secs(gnb_config.log.stats_period_s.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.report();
                info!("  Pending modulation tasks: {}", executor.nof_pending());
            }
        })
    };

    // Wait for shutdown signal
    let signal_handle = {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                running.store(false, Ordering::Release);
            }
        })
    };

    let summary = baseband_handle.await??;
    signal_handle.abort();
    stats_handle.abort();

    stats.report();
    info!(
        "Transmitted {} buffers ({} samples), {} without signal",
        summary.nof_buffers, summary.nof_samples, summary.nof_empty_buffers
    );
    if generator.nof_pool_exhausted() > 0 {
        warn!("{} slots skipped for lack of resource grids", generator.nof_pool_exhausted());
    }
    info!("Downlink lower PHY shutdown complete");
    Ok(())
}
