use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::FlushPolicy;
use crate::domain::PropertyId;
use crate::error::SyncError;
use crate::statements::{AnnotationMapping, UnresolvedComponentPolicy};

/// Bot credentials. Read from the environment only, never from the config
/// file.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, SyncError> {
        let user = std::env::var("WD_USER").ok();
        let password = std::env::var("WD_PASSWORD").ok();
        match (user, password) {
            (Some(user), Some(password)) => Ok(Self { user, password }),
            _ => Err(SyncError::MissingCredentials),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub description_templates: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub append_properties: Option<Vec<String>>,
    #[serde(default)]
    pub unresolved_components: Option<UnresolvedComponentPolicy>,
    #[serde(default)]
    pub cache_flush: Option<FlushPolicy>,
    #[serde(default)]
    pub write_delay_ms: Option<u64>,
    #[serde(default)]
    pub annotation_mapping: Option<String>,
}

#[derive(Debug)]
pub struct ResolvedConfig {
    pub description_templates: BTreeMap<String, String>,
    pub append_properties: Vec<PropertyId>,
    pub unresolved_components: UnresolvedComponentPolicy,
    pub cache_flush: FlushPolicy,
    pub write_delay: Duration,
    pub annotation_mapping: AnnotationMapping,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves the run configuration. Without an explicit path the default
    /// `cpx-sync.json` is optional; every field falls back to a default.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("cpx-sync.json"),
        };

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        } else if path.is_some() {
            return Err(SyncError::ConfigRead(config_path));
        } else {
            Config::default()
        };

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let append_properties = config
            .append_properties
            .unwrap_or_else(default_append_properties)
            .into_iter()
            .map(|value| value.parse())
            .collect::<Result<Vec<PropertyId>, SyncError>>()?;

        let annotation_mapping = match config.annotation_mapping {
            Some(path) => AnnotationMapping::from_path(PathBuf::from(path).as_path())?,
            None => AnnotationMapping::empty(),
        };

        Ok(ResolvedConfig {
            description_templates: config
                .description_templates
                .unwrap_or_else(default_description_templates),
            append_properties,
            unresolved_components: config.unresolved_components.unwrap_or_default(),
            cache_flush: config.cache_flush.unwrap_or(FlushPolicy::EveryUpdate),
            write_delay: Duration::from_millis(config.write_delay_ms.unwrap_or(300)),
            annotation_mapping,
        })
    }
}

pub fn default_description_templates() -> BTreeMap<String, String> {
    let mut templates = BTreeMap::new();
    templates.insert(
        "en".to_string(),
        "macromolecular complex found in {taxon}".to_string(),
    );
    templates.insert(
        "pt".to_string(),
        "complexo macromolecular encontrado em {taxon}".to_string(),
    );
    templates
}

/// Properties whose community-added values must survive repeated writes.
pub fn default_append_properties() -> Vec<String> {
    vec!["P527".to_string(), "P1343".to_string()]
}
