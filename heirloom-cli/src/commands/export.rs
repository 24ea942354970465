//! Export command implementation.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::Utc;
use futures::StreamExt;
use heirloom::archive::FILE_EXTENSION;
use heirloom::throttle::Operation;
use heirloom::ExportOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{print_json, Context};

#[derive(Debug, Clone, Copy)]
pub struct ExportFlags {
    pub no_photos: bool,
    pub audit_logs: bool,
    pub audit_log_days: Option<u32>,
}

/// Run the export command.
pub async fn run_export(ctx: &Context, output: Option<PathBuf>, flags: ExportFlags) -> Result<()> {
    ctx.check_rate(Operation::Export).await?;

    let mut options = ExportOptions::from(&ctx.config.export);
    options.include_photos = !flags.no_photos;
    options.include_audit_logs |= flags.audit_logs;
    if let Some(days) = flags.audit_log_days {
        options.audit_log_days = (days > 0).then_some(days);
    }
    options.actor = ctx.user.clone();

    let to_stdout = output.as_deref().is_some_and(|p| p.as_os_str() == "-");
    if to_stdout {
        let mut stdout = tokio::io::stdout();
        write_export(ctx, options, &mut stdout).await?;
        ctx.record_run(Operation::Export).await?;
        return Ok(());
    }

    let output_path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "heirloom-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            FILE_EXTENSION
        ))
    });
    // Written under a temporary name so a failed export leaves no archive
    let partial = output_path.with_extension("partial");
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Cannot create {}", partial.display()))?;

    let result = write_export(ctx, options, &mut file).await;
    drop(file);
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&partial, &output_path).await?;
    ctx.record_run(Operation::Export).await?;

    eprintln!("Export complete: {}", output_path.display());
    print_json(&summary)
}

async fn write_export<W: AsyncWrite + Unpin>(
    ctx: &Context,
    options: ExportOptions,
    out: &mut W,
) -> Result<heirloom::ExportSummary> {
    let mut stream = ctx.engine.export(options);
    while let Some(chunk) = stream.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;
    stream
        .summary()
        .context("Export stream ended without a summary")
}
