use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use figment::Figment;
use figment::providers::{Format, Yaml};
use odata_edm::Edm;
use odata_errors::Problem;
use odata_sql::{Metamodel, ServiceMapping};
use odata_uri::{Parser, UriInfo};
use tracing::info;

use crate::config::{AppConfig, ErrorFormat};

#[derive(Args)]
pub struct CommonArgs {
    /// Request URL, absolute or relative to the service root
    pub url: String,
}

/// The model and mapping named by the configuration.
pub struct Service {
    pub edm: Edm,
    pub metamodel: Metamodel,
}

impl Service {
    pub fn load(cfg: &AppConfig) -> Result<Self> {
        let edm = load_edm(&cfg.edm, cfg.error_format)?;
        let mapping = load_mapping(&cfg.mapping)?;
        let metamodel = Metamodel::new(&edm, &mapping)
            .map_err(|e| problem(cfg.error_format, &Problem::from(e)))
            .with_context(|| format!("mapping {}", cfg.mapping.display()))?;
        info!(
            edm = %cfg.edm.display(),
            mapping = %cfg.mapping.display(),
            entities = metamodel.entities().count(),
            "service loaded"
        );
        Ok(Self { edm, metamodel })
    }

    /// Parses `url` after stripping the service root.
    pub fn parse(&self, cfg: &AppConfig, url: &str) -> Result<UriInfo> {
        let (path, query) = split_request(&cfg.service_root, url);
        Parser::new(&self.edm)
            .parse_uri(path, query)
            .map_err(|e| problem(cfg.error_format, &Problem::from(e).with_instance(url)))
            .with_context(|| format!("parsing {url}"))
    }
}

fn load_edm(path: &Path, format: ErrorFormat) -> Result<Edm> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading EDM schema {}", path.display()))?;
    Edm::from_json(&text)
        .map_err(|e| problem(format, &Problem::from(e)))
        .with_context(|| format!("building EDM from {}", path.display()))
}

fn load_mapping(path: &Path) -> Result<ServiceMapping> {
    let yaml = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if yaml {
        return Figment::from(Yaml::file(path))
            .extract()
            .with_context(|| format!("reading mapping {}", path.display()));
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading mapping {}", path.display()))?;
    ServiceMapping::from_json(&text).with_context(|| format!("parsing mapping {}", path.display()))
}

/// Path and query of a request URL. A leading service root or `/` is
/// dropped.
pub fn split_request<'u>(service_root: &str, url: &'u str) -> (&'u str, &'u str) {
    let rest = url
        .strip_prefix(service_root)
        .or_else(|| url.strip_prefix(service_root.trim_end_matches('/')))
        .unwrap_or(url);
    let rest = rest.trim_start_matches('/');
    rest.split_once('?').unwrap_or((rest, ""))
}

/// Full request URL for `@odata.nextLink`.
pub fn request_url(service_root: &str, url: &str) -> String {
    if url.contains("://") {
        return url.to_owned();
    }
    format!(
        "{}/{}",
        service_root.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// Error whose message is the rendered error body.
pub fn problem(format: ErrorFormat, p: &Problem) -> anyhow::Error {
    let body = match format {
        ErrorFormat::Problem => serde_json::to_string_pretty(p),
        ErrorFormat::OData => serde_json::to_string_pretty(&p.to_odata_error()),
    };
    anyhow::anyhow!(body.unwrap_or_else(|_| p.detail.clone()))
}

pub fn check_config_path(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) if !p.is_file() => anyhow::bail!("config file does not exist: {}", p.display()),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn request_urls_are_split_after_the_root() {
        let root = "http://localhost/odata/";
        assert_eq!(
            split_request(root, "http://localhost/odata/People?$top=1"),
            ("People", "$top=1")
        );
        assert_eq!(split_request(root, "/People(1)/Name"), ("People(1)/Name", ""));
        assert_eq!(split_request(root, "http://localhost/odata"), ("", ""));
    }

    #[test]
    fn next_links_are_absolute() {
        let root = "http://localhost/odata/";
        assert_eq!(
            request_url(root, "People?$top=1"),
            "http://localhost/odata/People?$top=1"
        );
        assert_eq!(request_url(root, "https://x/People"), "https://x/People");
    }

    #[test]
    fn error_bodies_follow_the_format() {
        let p = odata_errors::catalog::RESOURCE_NOT_FOUND
            .as_problem("no 'Nobody'")
            .with_instance("Nobody");
        let text = problem(ErrorFormat::Problem, &p).to_string();
        assert!(text.contains("\"status\": 404"), "{text}");
        assert!(text.contains("\"instance\": \"Nobody\""), "{text}");
        let text = problem(ErrorFormat::OData, &p).to_string();
        assert!(text.contains("\"code\": \"RESOURCE_NOT_FOUND\""), "{text}");
        assert!(!text.contains("status"), "{text}");
    }

    #[test]
    fn demo_service_loads() {
        let cfg = AppConfig {
            edm: PathBuf::from("../../testdata/demo/edm.json"),
            mapping: PathBuf::from("../../testdata/demo/mapping.json"),
            ..AppConfig::default()
        };
        let service = Service::load(&cfg).unwrap();
        let info = service.parse(&cfg, "People?$filter=Age gt 30").unwrap();
        assert!(info.options.filter.is_some());
        assert!(service.parse(&cfg, "Nobody").is_err());
    }
}
