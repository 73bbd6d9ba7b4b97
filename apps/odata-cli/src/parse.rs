use anyhow::{Context, Result};
use clap::Args;

use crate::common::{CommonArgs, Service};
use crate::config::AppConfig;

#[derive(Args)]
pub struct ParseArgs {
    #[command(flatten)]
    common: CommonArgs,
}

impl ParseArgs {
    pub fn run(&self, config: &AppConfig) -> Result<()> {
        let service = Service::load(config)?;
        let info = service.parse(config, &self.common.url)?;
        let json = serde_json::to_string_pretty(&info).context("serializing the request")?;
        println!("{json}");
        Ok(())
    }
}
