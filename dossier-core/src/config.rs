//! Configuration system for Dossier.
//!
//! Uses `figment` for layered configuration: defaults → user config file →
//! workspace config file → environment variables → explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cost::{ModelPrice, PriceTable};
use crate::engine::EngineConfig;
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DossierConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// Per-model price overrides, USD per million tokens.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPrice>,
}

/// Remote API connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// API key given directly. Takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl ApiConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn require_api_key(&self) -> Result<String, ConfigError> {
        self.resolve_api_key().ok_or_else(|| ConfigError::EnvVarMissing {
            var: self.api_key_env.clone(),
        })
    }
}

/// Research job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Model research jobs are submitted with.
    pub model: String,
    /// Model used to refine prompts.
    pub refine_model: String,
    pub poll_interval_ms: u64,
    /// Fail a job still running after this long. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    /// Developer message sent ahead of every research prompt.
    pub system_prompt: String,
    /// `low`, `medium` or `high`.
    pub search_context_size: String,
    pub reasoning_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            model: "o3-deep-research".to_string(),
            refine_model: "gpt-4.1".to_string(),
            poll_interval_ms: 2_000,
            max_duration_secs: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            search_context_size: "medium".to_string(),
            reasoning_summary: "auto".to_string(),
            reasoning_effort: None,
            max_output_tokens: None,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional researcher preparing a structured, \
data-driven report. Prefer specific figures, trends and measurable outcomes. Cite reliable, \
up-to-date sources inline and include a source for every claim you cannot support otherwise. \
Use clear headings and keep the analysis objective.";

/// Local storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the research history and logs. Defaults to the
    /// platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Export defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Overrides the stored `default_export_path` setting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub include_thought_process: bool,
    pub include_sources: bool,
    /// Group each export in a `YYYY-MM-DD_<title>` folder.
    pub group_by_job: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            include_thought_process: true,
            include_sources: true,
            group_by_job: false,
        }
    }
}

impl DossierConfig {
    /// Check values figment cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "research.poll_interval_ms must be greater than zero".into(),
            });
        }
        if self.research.max_duration_secs == Some(0) {
            return Err(ConfigError::Invalid {
                message: "research.max_duration_secs must be greater than zero when set".into(),
            });
        }
        if !matches!(
            self.research.search_context_size.as_str(),
            "low" | "medium" | "high"
        ) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.search_context_size must be low, medium or high, got '{}'",
                    self.research.search_context_size
                ),
            });
        }
        for (model, price) in &self.pricing {
            if price.input_per_million < 0.0 || price.output_per_million < 0.0 {
                return Err(ConfigError::Invalid {
                    message: format!("pricing.{model} must not be negative"),
                });
            }
        }
        Ok(())
    }

    /// Built-in prices with configured overrides applied.
    pub fn price_table(&self) -> PriceTable {
        let mut table = PriceTable::default();
        for (model, price) in &self.pricing {
            table.insert(model.clone(), *price);
        }
        table
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(self.research.poll_interval_ms),
            max_duration: self.research.max_duration_secs.map(Duration::from_secs),
            prices: self.price_table(),
        }
    }

    /// Directory for the research history and logs.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from(".dossier"))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "dossier", "dossier")
}

/// Path of the user-level config file, if the platform has one.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".dossier").join("config.toml")
}

/// Load configuration with layered precedence:
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DOSSIER_`)
/// 3. Workspace-local config (`.dossier/config.toml`)
/// 4. User config (`~/.config/dossier/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DossierConfig>,
) -> Result<DossierConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DossierConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DOSSIER_RESEARCH__MODEL, DOSSIER_API__BASE_URL, ...
    figment = figment.merge(Env::prefixed("DOSSIER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load an explicit config file on top of the layered configuration.
pub fn load_config_file(
    workspace: Option<&Path>,
    file: &Path,
) -> Result<DossierConfig, Box<figment::Error>> {
    let base = load_config(workspace, None)?;
    Figment::from(Serialized::defaults(base))
        .merge(Toml::file(file))
        .extract()
        .map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DossierConfig::default();
        assert_eq!(config.research.model, "o3-deep-research");
        assert_eq!(config.research.poll_interval_ms, 2_000);
        assert!(config.research.max_duration_secs.is_none());
        assert_eq!(config.api.api_key_env, "OPENAI_API_KEY");
        assert!(config.export.include_sources);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = DossierConfig::default();
        let toml_str = config.to_toml().unwrap();
        let back: DossierConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = DossierConfig::default();
        overrides.research.model = "o4-mini-deep-research".to_string();
        overrides.research.poll_interval_ms = 500;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.research.model, "o4-mini-deep-research");
        assert_eq!(config.research.poll_interval_ms, 500);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".dossier")).unwrap();
        std::fs::write(
            workspace_config_path(dir.path()),
            r#"
[research]
model = "o4-mini-deep-research"
max_duration_secs = 3600

[export]
include_thought_process = false

[pricing."o4-mini-deep-research"]
input_per_million = 1.0
output_per_million = 4.0
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.research.model, "o4-mini-deep-research");
        assert_eq!(config.research.max_duration_secs, Some(3600));
        assert_eq!(config.research.refine_model, "gpt-4.1");
        assert!(!config.export.include_thought_process);
        assert!(config.export.include_sources);

        let prices = config.price_table();
        let cost = prices.cost(1_000_000, 1_000_000, "o4-mini-deep-research");
        assert!((cost - 5.0).abs() < 1e-9);
        assert!(prices.lookup("o3-deep-research").is_some());

        let engine = config.engine_config();
        assert_eq!(engine.max_duration, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "[api]\nbase_url = \"http://localhost:8080/v1\"\n").unwrap();
        let config = load_config_file(None, &file).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DossierConfig::default();
        config.research.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DossierConfig::default();
        config.research.search_context_size = "huge".into();
        assert!(config.validate().is_err());

        let mut config = DossierConfig::default();
        config
            .pricing
            .insert("m".into(), ModelPrice::new(-1.0, 0.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let api = ApiConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: "DOSSIER_TEST_UNSET_KEY_VAR".into(),
            ..ApiConfig::default()
        };
        assert_eq!(api.resolve_api_key().as_deref(), Some("sk-explicit"));

        let missing = ApiConfig {
            api_key: None,
            api_key_env: "DOSSIER_TEST_UNSET_KEY_VAR".into(),
            ..ApiConfig::default()
        };
        assert!(matches!(
            missing.require_api_key(),
            Err(ConfigError::EnvVarMissing { .. })
        ));
    }

    #[test]
    fn test_data_dir_override() {
        let mut config = DossierConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/dossier-data"));
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/dossier-data"));
    }
}
