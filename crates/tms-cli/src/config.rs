//! Configuration loading.
//!
//! Settings come from a YAML, TOML or JSON file and are overridden by
//! environment variables with the `TMS__` prefix, `__` separating nested
//! keys (`TMS__TESTIT__TOKEN`, `TMS__ZEPHYR_SCALE__PROJECT_KEY`).

use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tms_export::{AllureConfig, AzureDevOpsConfig, TestRailConfig, ZephyrScaleConfig};
use tms_import::ImportConfig;
use validator::Validate;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_NAME: &str = "tms";

/// Complete `tms` configuration.
#[derive(Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Directory exports are written to and imports read from.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    #[validate(nested)]
    pub testrail: Option<TestRailConfig>,

    #[validate(nested)]
    pub zephyr_scale: Option<ZephyrScaleConfig>,

    #[validate(nested)]
    pub azure_devops: Option<AzureDevOpsConfig>,

    #[validate(nested)]
    pub allure: Option<AllureConfig>,

    /// Import target.
    #[validate(nested)]
    pub testit: Option<ImportConfig>,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

impl AppConfig {
    /// Load configuration from `path` (or `tms.*` when `None`) and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading environment overrides from `env` instead
    /// of the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("TMS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("testrail.suite_ids")
                    .source(env),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config
            .validate()
            .context("Configuration failed validation")?;

        tracing::debug!(
            export_dir = %config.export_dir.display(),
            testrail = config.testrail.is_some(),
            zephyr_scale = config.zephyr_scale.is_some(),
            azure_devops = config.azure_devops.is_some(),
            allure = config.allure.is_some(),
            testit = config.testit.is_some(),
            "Configuration loaded"
        );

        Ok(config)
    }

    pub fn testrail(&self) -> Result<TestRailConfig> {
        Self::section(self.testrail.as_ref(), "testrail")
    }

    pub fn zephyr_scale(&self) -> Result<ZephyrScaleConfig> {
        Self::section(self.zephyr_scale.as_ref(), "zephyr_scale")
    }

    pub fn azure_devops(&self) -> Result<AzureDevOpsConfig> {
        Self::section(self.azure_devops.as_ref(), "azure_devops")
    }

    pub fn allure(&self) -> Result<AllureConfig> {
        Self::section(self.allure.as_ref(), "allure")
    }

    pub fn testit(&self) -> Result<ImportConfig> {
        Self::section(self.testit.as_ref(), "testit")
    }

    fn section<T: Clone>(section: Option<&T>, name: &str) -> Result<T> {
        section.cloned().with_context(|| {
            format!(
                "Missing `{name}` section in configuration (or TMS__{}__* variables)",
                name.to_uppercase()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env() -> Option<Map<String, String>> {
        Some(Map::new())
    }

    #[test]
    fn test_load_file() {
        let file = yaml(
            "export_dir: out\n\
             testrail:\n  url: https://shop.testrail.io\n  login: qa@example.com\n  password: key\n  project_name: Shop\n  suite_ids: [1, 2]\n\
             testit:\n  url: https://testit.example.com\n  token: tok\n",
        );

        let config = AppConfig::load_with_env(Some(file.path()), no_env()).unwrap();
        assert_eq!(config.export_dir, PathBuf::from("out"));
        let testrail = config.testrail().unwrap();
        assert_eq!(testrail.project_name, "Shop");
        assert_eq!(testrail.suite_ids, vec![1, 2]);
        assert!(!config.testit().unwrap().import_to_existing_project);
        assert!(config.allure().is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = yaml("testit:\n  url: https://testit.example.com\n  token: from-file\n");
        let env = Map::from([
            ("TMS__TESTIT__TOKEN".to_string(), "from-env".to_string()),
            (
                "TMS__TESTIT__IMPORT_TO_EXISTING_PROJECT".to_string(),
                "true".to_string(),
            ),
            ("TMS__ZEPHYR_SCALE__TOKEN".to_string(), "zs".to_string()),
            ("TMS__ZEPHYR_SCALE__PROJECT_KEY".to_string(), "SHOP".to_string()),
        ]);

        let config = AppConfig::load_with_env(Some(file.path()), Some(env)).unwrap();
        let testit = config.testit().unwrap();
        assert_eq!(testit.token, "from-env");
        assert!(testit.import_to_existing_project);

        let zephyr = config.zephyr_scale().unwrap();
        assert_eq!(zephyr.project_key, "SHOP");
        assert_eq!(zephyr.url, "https://api.zephyrscale.smartbear.com/v2");
        assert_eq!(config.export_dir, PathBuf::from("export"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let file = yaml("azure_devops:\n  url: not a url\n  token: pat\n  project_name: Shop\n");
        let err = AppConfig::load_with_env(Some(file.path()), no_env())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("validation"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(AppConfig::load_with_env(Some(&path), no_env()).is_err());
    }

    #[test]
    fn test_missing_section_names_variables() {
        let config = AppConfig::load_with_env(Some(yaml("{}\n").path()), no_env()).unwrap();
        let err = config.testit().err().unwrap().to_string();
        assert!(err.contains("TMS__TESTIT__"));
    }
}
