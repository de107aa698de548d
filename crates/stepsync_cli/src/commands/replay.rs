//! Replay command implementation.

use chrono::FixedOffset;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stepsync_core::{RawReading, SensorBaselineTracker};
use stepsync_engine::{
    CoordinatorState, CumulativeSyncCoordinator, MemoryCumulativeStore, StepSession, SyncConfig,
    SyncError,
};
use stepsync_protocol::CumulativeRecord;
use tracing::{info, warn};

/// Options for a replay.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Owner of the cumulative record.
    pub user_id: String,
    /// Cumulative steps stored before the replay.
    pub base: Option<u64>,
    /// Sync after every n readings.
    pub flush_every: usize,
    /// Number of writes to fail first.
    pub fail_writes: usize,
    /// Offset from UTC used for day anchoring.
    pub utc_offset_minutes: i32,
    /// Heart rate sent with each sync.
    pub heart_rate: i32,
    /// Sleep hours sent with each sync.
    pub sleep_hours: f64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            user_id: "local-user".into(),
            base: None,
            flush_every: 1,
            fail_writes: 0,
            utc_offset_minutes: 0,
            heart_rate: 0,
            sleep_hours: 0.0,
        }
    }
}

/// Replay result.
#[derive(Debug, Serialize)]
pub struct ReplayResult {
    /// Owner of the cumulative record.
    pub user_id: String,
    /// Number of readings replayed.
    pub readings: usize,
    /// Number of sync attempts.
    pub syncs: usize,
    /// Writes the store accepted.
    pub writes_accepted: usize,
    /// Writes the store failed.
    pub write_failures: u64,
    /// Day rollovers and counter rollbacks seen by the tracker.
    pub resets_detected: u64,
    /// Session counter after the last reading.
    pub session_steps: u64,
    /// Cumulative value the coordinator ended with.
    pub final_total: u64,
    /// Steps held by the store after the replay.
    pub stored_steps: Option<u64>,
    /// Whether the last increment is still unsynced.
    pub unsynced: bool,
}

/// Runs the replay command.
pub fn run(
    input: &Path,
    options: &ReplayOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let readings = load_readings(input)?;
    let result = replay(&readings, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads a JSON array of readings.
pub fn load_readings(path: &Path) -> Result<Vec<RawReading>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let readings: Vec<RawReading> = serde_json::from_str(&data)?;
    Ok(readings)
}

/// Replays readings through a session backed by an in-memory store.
pub fn replay(
    readings: &[RawReading],
    options: &ReplayOptions,
) -> Result<ReplayResult, Box<dyn std::error::Error>> {
    if options.flush_every == 0 {
        return Err("flush-every must be at least 1".into());
    }
    let offset = options
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| format!("invalid UTC offset: {} minutes", options.utc_offset_minutes))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(replay_with_offset(readings, options, offset))
}

async fn replay_with_offset(
    readings: &[RawReading],
    options: &ReplayOptions,
    offset: FixedOffset,
) -> Result<ReplayResult, Box<dyn std::error::Error>> {
    let store = match options.base {
        Some(steps) => {
            let since = readings.first().map_or_else(chrono::Utc::now, |r| r.observed_at);
            let seed = CumulativeRecord {
                steps,
                ..CumulativeRecord::empty(options.user_id.as_str(), since)
            };
            MemoryCumulativeStore::with_record(seed)
        }
        None => MemoryCumulativeStore::new(),
    };
    let store = Arc::new(store);
    store.fail_next_writes(options.fail_writes, "injected write failure");

    let config = SyncConfig::new(options.user_id.as_str());
    let coordinator = Arc::new(CumulativeSyncCoordinator::new(config, Arc::clone(&store)));
    let mut session = StepSession::new(
        SensorBaselineTracker::with_timezone(offset),
        Arc::clone(&coordinator),
    );

    let mut syncs = 0;
    let mut since_flush = 0;
    for reading in readings {
        session.observe(*reading);
        since_flush += 1;
        if since_flush == options.flush_every {
            since_flush = 0;
            syncs += 1;
            flush(&session, options).await?;
        }
    }

    // Final sync for a partial batch or an increment left by a failure
    if since_flush > 0 || coordinator.state() == CoordinatorState::Error {
        syncs += 1;
        flush(&session, options).await?;
    }

    let stats = coordinator.stats();
    let result = ReplayResult {
        user_id: options.user_id.clone(),
        readings: readings.len(),
        syncs,
        writes_accepted: store.accepted_writes().len(),
        write_failures: stats.write_failures,
        resets_detected: session.tracker().resets_detected(),
        session_steps: session.session_steps(),
        final_total: coordinator.last_known_cumulative(),
        stored_steps: store.record(&options.user_id).map(|r| r.steps),
        unsynced: coordinator.state() == CoordinatorState::Error,
    };
    coordinator.close();

    info!(
        user_id = %result.user_id,
        readings = result.readings,
        total = result.final_total,
        "replay finished"
    );
    Ok(result)
}

/// Syncs the session, tolerating retryable store failures.
async fn flush(
    session: &StepSession<MemoryCumulativeStore, FixedOffset>,
    options: &ReplayOptions,
) -> Result<(), SyncError> {
    match session.flush(options.heart_rate, options.sleep_hours).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "sync failed, increment kept for the next sync");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn print_text_output(result: &ReplayResult) {
    println!("stepsync replay");
    println!("===============");
    println!();
    println!("User:              {}", result.user_id);
    println!("Readings:          {}", result.readings);
    println!("Syncs:             {}", result.syncs);
    println!("Writes accepted:   {}", result.writes_accepted);
    println!("Write failures:    {}", result.write_failures);
    println!("Resets detected:   {}", result.resets_detected);
    println!("Session steps:     {}", result.session_steps);
    println!("Cumulative total:  {}", result.final_total);
    match result.stored_steps {
        Some(steps) => println!("Stored steps:      {steps}"),
        None => println!("Stored steps:      (no record)"),
    }
    if result.unsynced {
        println!();
        println!("Last increment is unsynced.");
    }
}
