//! Snapshot listing and deletion.

use anyhow::Result;

use super::{print_json, Context};

pub async fn run_snapshots_list(ctx: &Context) -> Result<()> {
    let snapshots = ctx.engine.snapshots().list().await?;
    if snapshots.is_empty() {
        eprintln!("No snapshots in {}", ctx.config.assets_dir().display());
    }
    print_json(&snapshots)
}

pub async fn run_snapshots_delete(ctx: &Context, snapshot_id: &str) -> Result<()> {
    ctx.engine.snapshots().delete(snapshot_id).await?;
    println!("Deleted snapshot {}", snapshot_id);
    Ok(())
}
