//! Offline queue command handlers

use super::{build_client, open_storage};
use crate::cli::{OutputFormat, QueueAction, QueueArgs};
use crate::config::Config;
use crate::error::Result;
use crate::output::OutputWriter;
use serde_json::{json, Value};
use std::sync::Arc;
use vitatrack_core::{DrainOutcome, OfflineQueue, QueuedRequest};

/// Handle the queue command
pub async fn handle_queue(args: QueueArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    match args.action {
        QueueAction::List => {
            let queue = OfflineQueue::new(open_storage(config)?, config.client.offline_queue.clone())?;
            list(&queue.peek_all(), output)
        }
        QueueAction::Clear => {
            let queue = OfflineQueue::new(open_storage(config)?, config.client.offline_queue.clone())?;
            let count = queue.len();
            queue.clear()?;
            output.success(&format!("✓ Removed {} queued request(s)", count))
        }
        QueueAction::Drain => {
            let client = build_client(config).await?;
            drain(client.offline_queue(), client.sync_offline_queue().await?, output)
        }
    }
}

fn list(entries: &[QueuedRequest], output: &mut OutputWriter) -> Result<()> {
    if output.format() != OutputFormat::Human {
        return output.data(&entries);
    }
    if entries.is_empty() {
        return output.info("Offline queue is empty");
    }
    output.section(&format!("Offline queue ({})", entries.len()))?;

    let rows = entries
        .iter()
        .map(|entry| {
            vec![
                entry.id.to_string(),
                entry.config.method.to_string(),
                entry.config.url.clone(),
                entry.queued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                entry.attempts.to_string(),
            ]
        })
        .collect();
    output.table(&["ID", "METHOD", "URL", "QUEUED AT", "ATTEMPTS"], rows)
}

/// One drain outcome as a JSON row
pub(crate) fn outcome_json(outcome: &DrainOutcome) -> Value {
    match outcome {
        DrainOutcome::Sent { id } => json!({ "id": id, "outcome": "sent" }),
        DrainOutcome::Requeued { id, attempts, error } => {
            json!({ "id": id, "outcome": "requeued", "attempts": attempts, "code": error.code })
        }
        DrainOutcome::Failed { id, error } => json!({ "id": id, "outcome": "failed", "code": error.code }),
        DrainOutcome::Abandoned { id, error } => {
            json!({ "id": id, "outcome": "abandoned", "code": error.code })
        }
        DrainOutcome::Expired { id } => json!({ "id": id, "outcome": "expired" }),
    }
}

fn drain(queue: &Arc<OfflineQueue>, outcomes: Vec<DrainOutcome>, output: &mut OutputWriter) -> Result<()> {
    let rows: Vec<Value> = outcomes.iter().map(outcome_json).collect();
    if output.format() != OutputFormat::Human {
        return output.data(&rows);
    }

    if outcomes.is_empty() {
        output.info("Nothing to replay")?;
    } else {
        let sent = outcomes
            .iter()
            .filter(|o| matches!(o, DrainOutcome::Sent { .. }))
            .count();
        output.success(&format!("✓ Replayed {} of {} request(s)", sent, outcomes.len()))?;
        for row in rows.iter().filter(|r| r["outcome"] != "sent") {
            output.warning(&format!(
                "{} {}{}",
                row["id"].as_str().unwrap_or_default(),
                row["outcome"].as_str().unwrap_or_default(),
                row["code"].as_str().map(|c| format!(" ({})", c)).unwrap_or_default()
            ))?;
        }
    }

    let remaining = queue.len();
    if remaining > 0 {
        output.info(&format!("{} request(s) still queued", remaining))?;
    }
    Ok(())
}
