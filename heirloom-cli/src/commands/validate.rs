//! Validate (preview) command implementation.

use std::path::Path;

use anyhow::{bail, Result};

use super::{open_archive, print_json, Context};

/// Print the preview report. Fails when the archive is not importable.
pub async fn run_validate(ctx: &Context, input: &Path) -> Result<()> {
    let stream = open_archive(input).await?;
    let report = ctx.engine.validate(stream).await?;
    print_json(&report)?;

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.valid {
        bail!(
            "Archive {} is not valid: {}",
            input.display(),
            report.errors.join("; ")
        );
    }
    Ok(())
}
