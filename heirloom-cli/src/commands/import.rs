//! Import and restore command implementations.

use std::path::Path;

use anyhow::{bail, Result};
use heirloom::import::{ImportOptions, ImportReport, ImportState, Strategy};
use heirloom::model::Collection;
use heirloom::throttle::Operation;
use tokio_util::sync::CancellationToken;

use super::{open_archive, print_json, Context};

#[derive(Debug, Clone)]
pub struct ImportFlags {
    pub strategy: Strategy,
    pub backup: bool,
    pub no_photos: bool,
    pub audit_logs: bool,
    pub collections: Option<Vec<Collection>>,
}

/// Run the import command.
pub async fn run_import(ctx: &Context, input: &Path, flags: ImportFlags) -> Result<()> {
    ctx.check_rate(Operation::Import).await?;

    let token = CancellationToken::new();
    let watcher = cancel_on_interrupt(token.clone());
    let options = ImportOptions {
        strategy: flags.strategy,
        create_backup_before_import: flags.backup,
        import_photos: !flags.no_photos,
        import_audit_logs: flags.audit_logs,
        collections: flags.collections.map(|c| c.into_iter().collect()),
        actor: ctx.user.clone(),
        cancel: Some(token),
    };

    let stream = open_archive(input).await?;
    let result = ctx.engine.import(stream, options).await;
    watcher.abort();
    let report = result?;
    ctx.record_run(Operation::Import).await?;
    finish(report)
}

/// Cancel `token` on Ctrl-C. The import stops before its next collection.
fn cancel_on_interrupt(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current collection");
            token.cancel();
        }
    })
}

/// Run the restore command.
pub async fn run_restore(ctx: &Context, snapshot_id: &str, no_photos: bool) -> Result<()> {
    ctx.check_rate(Operation::Import).await?;

    let options = ImportOptions {
        import_photos: !no_photos,
        actor: ctx.user.clone(),
        ..Default::default()
    };
    let report = ctx.engine.restore(snapshot_id, options).await?;
    ctx.record_run(Operation::Import).await?;
    finish(report)
}

fn finish(report: ImportReport) -> Result<()> {
    print_json(&report)?;
    if report.status != ImportState::Completed {
        if let Some(id) = &report.rollback_snapshot_id {
            eprintln!("Rollback snapshot: {} (heirloom restore {})", id, id);
        }
        let pending: Vec<String> = report
            .pending_collections
            .iter()
            .map(|c| c.to_string())
            .collect();
        bail!(
            "Import {}: {} (pending: {})",
            report.status,
            report.error.as_deref().unwrap_or("cancelled"),
            pending.join(", ")
        );
    }
    Ok(())
}
