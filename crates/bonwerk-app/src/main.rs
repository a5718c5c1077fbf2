// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk: ESC/POS receipt spooler.
//
// Entry point.  Initialises logging, loads the config, builds a sample
// receipt, writes its PNG preview and runs it through the print queue to a
// simulated printer whose link drops part-way, so the resumed transfer can be
// checked byte for byte.

mod receipt;
mod services;

use std::path::PathBuf;
use std::time::Duration;

use bonwerk_codec::{encode_ops, preview_png};
use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::types::{JobState, Payload, Priority};
use tracing::{error, info, warn};

use services::data_dir;
use services::spooler::{Spooler, wait_for_job};

const JOB_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Bonwerk starting");

    let preview_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("preview.png"));

    if let Err(e) = run(preview_path).await {
        error!(error = %e, "bonwerk failed");
        std::process::exit(1);
    }
}

async fn run(preview_path: PathBuf) -> Result<()> {
    let dir = data_dir::data_dir()?;
    info!(path = %dir.display(), "data directory");
    let config = data_dir::load_config(&dir);

    let ops = receipt::build(&receipt::sample_data(), config.preview.paper_width_dots)?;
    let bytes = encode_ops(&ops, &config.text_encoding);
    info!(ops = ops.len(), bytes = bytes.len(), "receipt encoded");

    let (png, warnings) = preview_png(&bytes, &config.preview)?;
    for warning in &warnings {
        warn!(?warning, "preview parse warning");
    }
    std::fs::write(&preview_path, png)?;
    info!(path = %preview_path.display(), "preview written");

    let spooler = Spooler::init(&config, &dir)?;
    spooler.printer().disconnect_after_writes(3);

    let mut events = spooler.subscribe();
    let job_id = spooler.submit(Payload::Ops(ops), Priority::High)?;
    let outcome = wait_for_job(&mut events, job_id, JOB_WAIT).await;

    let received = spooler.printer().received();
    spooler.shutdown().await;

    match outcome? {
        Some(JobState::Done) if received == bytes => {
            info!(bytes = received.len(), "printer received the exact job bytes");
        }
        Some(JobState::Done) => {
            return Err(BonwerkError::IntegrityMismatch {
                job_id,
                offset: received.len() as u64,
                expected: format!("{} bytes", bytes.len()),
                actual: format!("{} bytes received", received.len()),
            });
        }
        Some(state) => warn!(?state, "job did not complete"),
        None => warn!(%job_id, "job still pending, it will resume on the next run"),
    }
    Ok(())
}
