use anyhow::Result;
use clap::Args;
use odata_errors::Problem;
use odata_sql::{QueryProcessor, SqlBackend};

use crate::common::{CommonArgs, Service, problem};
use crate::config::AppConfig;

#[derive(Args)]
pub struct SqlArgs {
    /// Dialect to render; defaults to the configured backend
    #[arg(short, long, value_parser = parse_backend)]
    backend: Option<SqlBackend>,
    #[command(flatten)]
    common: CommonArgs,
}

impl SqlArgs {
    pub fn run(&self, config: &AppConfig) -> Result<()> {
        let service = Service::load(config)?;
        let info = service.parse(config, &self.common.url)?;
        let processor = QueryProcessor::new(service.edm, service.metamodel, config.query.clone())
            .with_groups(config.groups.clone());
        let backend = self.backend.unwrap_or(config.backend);
        let statements = processor
            .statements(backend, &info)
            .map_err(|e| {
                let p = Problem::from(e).with_instance(&self.common.url);
                problem(config.error_format, &p)
            })?;
        for s in statements {
            println!("-- {}\n{};\n", s.name, s.sql);
        }
        Ok(())
    }
}

fn parse_backend(text: &str) -> Result<SqlBackend, String> {
    match text.to_ascii_lowercase().as_str() {
        "sqlite" => Ok(SqlBackend::Sqlite),
        "postgres" | "pg" => Ok(SqlBackend::Postgres),
        "mysql" => Ok(SqlBackend::Mysql),
        other => Err(format!("unknown backend '{other}', expected sqlite, postgres or mysql")),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn backends_parse_case_insensitively() {
        assert_eq!(parse_backend("PG"), Ok(SqlBackend::Postgres));
        assert_eq!(parse_backend("sqlite"), Ok(SqlBackend::Sqlite));
        assert!(parse_backend("oracle").is_err());
    }
}
