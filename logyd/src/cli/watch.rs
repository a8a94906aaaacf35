use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use logyd::{
    discovery::{Discovery, known::KnownDeviceTable},
    linux::UdevPlatform,
};
use tracing::info;

use super::{Cli, render};

/// Follow devices as they are plugged and unplugged, printing the device tree
/// whenever it changes.
#[derive(Args)]
pub struct WatchCommand {
    /// How often to check the device tree for changes, in milliseconds
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,
}

impl WatchCommand {
    pub async fn execute(&self, root: &Cli) -> Result<()> {
        let config = root.session_config();

        let discovery = tokio::task::spawn_blocking(move || {
            Discovery::start(UdevPlatform::new(), KnownDeviceTable::builtin(), config)
        })
        .await?
        .context("could not start device discovery")?;

        let mut interval = tokio::time::interval(Duration::from_millis(self.interval_ms));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut last = None;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = discovery.snapshot();
                    if last.as_ref() != Some(&snapshot) {
                        render::print(&snapshot, root.json)?;
                        last = Some(snapshot);
                    }
                },
                res = &mut ctrl_c => {
                    res.context("could not listen for Ctrl-C")?;
                    break;
                },
            }
        }

        info!("shutting down");
        tokio::task::spawn_blocking(move || drop(discovery)).await?;

        Ok(())
    }
}
