//! Layered CLI configuration: defaults, then the YAML file, then
//! `ODATA__` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use odata_sql::{QueryConfig, SqlBackend};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Prefix stripped from request URLs and used for `@odata.nextLink`.
    pub service_root: String,
    /// EDM schema, JSON.
    pub edm: PathBuf,
    /// Table mapping, JSON or YAML.
    pub mapping: PathBuf,
    pub backend: SqlBackend,
    /// Connection string for `query`.
    pub database: Option<String>,
    /// Field groups granted to the caller.
    pub groups: Vec<String>,
    pub query: QueryConfig,
    /// Body printed for failed requests.
    pub error_format: ErrorFormat,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_root: "http://localhost/odata/".to_owned(),
            edm: PathBuf::from("edm.json"),
            mapping: PathBuf::from("mapping.json"),
            backend: SqlBackend::default(),
            database: None,
            groups: Vec::new(),
            query: QueryConfig::default(),
            error_format: ErrorFormat::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFormat {
    /// RFC 9457 problem document.
    #[default]
    Problem,
    /// OData JSON `{"error": {...}}` body.
    OData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "odata=info".to_owned(),
        }
    }
}

impl AppConfig {
    /// Loads the layers. Relative schema and mapping paths in the file are
    /// resolved against the file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::figment(path)
            .extract::<Self>()
            .context("invalid configuration")
            .map(|c| c.relative_to(path.and_then(Path::parent)))
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("ODATA__").split("__"))
    }

    fn relative_to(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            if self.edm.is_relative() {
                self.edm = dir.join(&self.edm);
            }
            if self.mapping.is_relative() {
                self.mapping = dir.join(&self.mapping);
            }
        }
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("serializing the configuration")
    }
}
