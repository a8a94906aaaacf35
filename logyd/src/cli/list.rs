use anyhow::{Context, Result};
use clap::Args;
use logyd::{
    discovery::{Discovery, known::KnownDeviceTable},
    linux::UdevPlatform,
};

use super::{Cli, render};

/// Discover connected devices once and print the device tree.
#[derive(Args)]
pub struct ListCommand {}

impl ListCommand {
    pub async fn execute(&self, root: &Cli) -> Result<()> {
        let config = root.session_config();

        let snapshot = tokio::task::spawn_blocking(move || {
            Discovery::populate(UdevPlatform::new(), KnownDeviceTable::builtin(), config)
                .map(|discovery| discovery.snapshot())
        })
        .await?
        .context("could not enumerate devices")?;

        render::print(&snapshot, root.json)
    }
}
