//! Upload queue commands and the watch loop

use anyhow::{anyhow, Context, Result};
use keeper_core::db::Database;
use keeper_core::models::QueueState;
use keeper_core::{CancelToken, DrainReport, Drainer};
use tracing::warn;

use super::{truncate, App};

/// Show queue counts
pub fn cmd_queue_status(db: &Database) -> Result<()> {
    let stats = db.queue_stats()?;

    println!("\n☁️  Upload Queue");
    println!("{}", "─".repeat(40));
    println!("  Pending:    {}", stats.pending);
    println!("  In flight:  {}", stats.in_flight);
    println!("  Failed:     {}", stats.failed);
    println!("  Uploaded:   {}", stats.uploaded);

    if stats.failed > 0 {
        println!();
        println!("  Retry failed uploads: keeper queue retry");
        println!("  Or drop them:         keeper queue purge");
    }
    println!();
    Ok(())
}

/// List queue items, optionally in one state
pub fn cmd_queue_list(db: &Database, state: Option<&str>) -> Result<()> {
    let state = state
        .map(|s| s.parse::<QueueState>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let items = db.list_queue_items(state)?;

    if items.is_empty() {
        println!("Upload queue is empty");
        return Ok(());
    }

    println!(
        "  {:<6} {:<10} {:>3} {:<20} {}",
        "ID", "STATE", "TRY", "NEXT ATTEMPT", "REMOTE PATH"
    );
    println!("{}", "─".repeat(78));
    for item in &items {
        println!(
            "  #{:<5} {:<10} {:>3} {:<20} {}",
            item.id,
            item.state.as_str(),
            item.attempts,
            item.next_attempt_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&item.remote_path, 40)
        );
        if let Some(err) = &item.last_error {
            println!("         ⚠️  {}", truncate(err, 70));
        }
    }
    Ok(())
}

fn print_drain_report(report: &DrainReport) {
    if report.skipped_unauthenticated {
        println!("⚠️  Remote drive is not signed in; uploads stay queued");
        return;
    }
    if report.busy {
        println!("Another upload is in progress");
        println!("If none is running, `keeper init` recovers interrupted uploads");
        return;
    }
    println!(
        "✅ Uploaded {} of {} attempted ({} to retry, {} failed)",
        report.succeeded, report.attempted, report.retried, report.failed
    );
    if report.cancelled {
        println!("   Interrupted; remaining items stay queued");
    }
}

/// Upload every ready item once; Ctrl-C stops between items
pub async fn cmd_queue_drain(app: &App) -> Result<()> {
    let queue = app.queue()?;
    let cancel = CancelToken::new();

    let on_interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let report = queue.drain(&cancel).await;
    on_interrupt.abort();

    print_drain_report(&report.context("Upload drain failed")?);
    Ok(())
}

/// Delete items that failed permanently
pub fn cmd_queue_purge(db: &Database) -> Result<()> {
    let purged = db.purge_failed_uploads()?;
    println!("✅ Purged {} failed upload(s)", purged);
    Ok(())
}

/// Give failed items a fresh set of attempts
pub fn cmd_queue_retry(db: &Database) -> Result<()> {
    let retried = db.retry_failed_uploads()?;
    println!("✅ Re-queued {} failed upload(s)", retried);
    Ok(())
}

/// Recover, reconcile, then keep draining until Ctrl-C
pub async fn cmd_watch(app: &App) -> Result<()> {
    let queue = app.queue()?;

    let recovered = queue.recover_in_flight()?;
    if recovered > 0 {
        println!("Recovered {} interrupted upload(s)", recovered);
    }

    let root = app.image_root()?;
    match app.ingestor()?.reconcile(&root) {
        Ok(report) => println!(
            "Adopted {} image(s), queued {} for upload",
            report.scan.count(),
            report.queued
        ),
        Err(e) => warn!("Skipping scan of {}: {}", root.display(), e),
    }

    let every = app.config.drain_interval;
    println!(
        "👀 Uploading every {}s (Ctrl-C to stop)...",
        every.as_secs()
    );
    let drainer = Drainer::spawn(queue.clone(), every);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Stopping after the current upload...");
    drainer.shutdown().await;

    let stats = queue.stats()?;
    println!(
        "Queue: {} pending, {} failed, {} uploaded",
        stats.pending, stats.failed, stats.uploaded
    );
    Ok(())
}
