use anyhow::{Context, Result};
use clap::Args;
use odata_errors::Problem;
use odata_sql::QueryProcessor;
use sea_orm::{ConnectionTrait, Database};
use tracing::info;

use crate::common::{CommonArgs, Service, problem, request_url};
use crate::config::AppConfig;

#[derive(Args)]
pub struct QueryArgs {
    /// Connection string; overrides `database` from the configuration
    #[arg(short, long)]
    database: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

impl QueryArgs {
    pub async fn run(&self, config: &AppConfig) -> Result<()> {
        let dsn = self
            .database
            .as_deref()
            .or(config.database.as_deref())
            .context("no database configured; pass --database or set `database`")?;
        let service = Service::load(config)?;
        let info = service.parse(config, &self.common.url)?;
        let processor = QueryProcessor::new(service.edm, service.metamodel, config.query.clone())
            .with_groups(config.groups.clone());

        let conn = Database::connect(dsn)
            .await
            .with_context(|| format!("connecting to {dsn}"))?;
        info!(backend = ?conn.get_database_backend(), "connected");
        let result = processor
            .execute(&conn, &info)
            .await
            .map_err(|e| {
                let p = Problem::from(e).with_instance(&self.common.url);
                problem(config.error_format, &p)
            })?;
        let url = request_url(&config.service_root, &self.common.url);
        let json = serde_json::to_string_pretty(&result.to_json(Some(&url)))
            .context("serializing the response")?;
        println!("{json}");
        Ok(())
    }
}
