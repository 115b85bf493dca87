//! Common types for export operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Products an export can be taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourcePlatform {
    /// TestRail.
    TestRail,
    /// Zephyr Scale (Cloud).
    ZephyrScale,
    /// Azure DevOps Test Plans.
    AzureDevOps,
    /// Allure TestOps.
    AllureTestOps,
}

impl SourcePlatform {
    /// Short machine name, used in stable id scopes.
    pub fn key(&self) -> &'static str {
        match self {
            Self::TestRail => "testrail",
            Self::ZephyrScale => "zephyr-scale",
            Self::AzureDevOps => "azure-devops",
            Self::AllureTestOps => "allure",
        }
    }
}

impl std::fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestRail => write!(f, "TestRail"),
            Self::ZephyrScale => write!(f, "Zephyr Scale"),
            Self::AzureDevOps => write!(f, "Azure DevOps"),
            Self::AllureTestOps => write!(f, "Allure TestOps"),
        }
    }
}

/// Connection settings for TestRail.
#[derive(Clone, Deserialize, Validate)]
pub struct TestRailConfig {
    /// Instance URL, e.g. `https://example.testrail.io`.
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1))]
    pub login: String,
    /// Password or API key.
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(length(min = 1))]
    pub project_name: String,
    /// Only export these suites; all suites when empty.
    #[serde(default)]
    pub suite_ids: Vec<u64>,
}

/// Connection settings for Zephyr Scale Cloud.
#[derive(Clone, Deserialize, Validate)]
pub struct ZephyrScaleConfig {
    #[serde(default = "default_zephyr_url")]
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1))]
    pub project_key: String,
}

fn default_zephyr_url() -> String {
    "https://api.zephyrscale.smartbear.com/v2".to_string()
}

/// Connection settings for Azure DevOps.
#[derive(Clone, Deserialize, Validate)]
pub struct AzureDevOpsConfig {
    /// Organization URL, e.g. `https://dev.azure.com/contoso`.
    #[validate(url)]
    pub url: String,
    /// Personal access token.
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1))]
    pub project_name: String,
}

/// Connection settings for Allure TestOps.
#[derive(Clone, Deserialize, Validate)]
pub struct AllureConfig {
    #[validate(url)]
    pub url: String,
    /// API token, exchanged for a bearer token on start.
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1))]
    pub project_name: String,
    /// Custom fields whose values form the section path, outermost first
    /// (e.g. `["Epic", "Feature"]`).
    #[serde(default)]
    pub section_fields: Vec<String>,
}

/// Options for controlling what gets exported.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Download attachment blobs.
    pub download_attachments: bool,

    /// Page size for paginated endpoints.
    pub page_size: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            download_attachments: true,
            page_size: 100,
        }
    }
}

impl ExportOptions {
    /// Enable or disable attachment download.
    pub fn with_attachments(mut self, download: bool) -> Self {
        self.download_attachments = download;
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Report of a completed export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportReport {
    /// Product the export was taken from.
    pub platform: Option<SourcePlatform>,

    /// Exported project.
    pub project_name: String,

    /// Number of sections written.
    pub sections_exported: usize,

    /// Number of test cases written.
    pub test_cases_exported: usize,

    /// Number of shared steps written.
    pub shared_steps_exported: usize,

    /// Number of attribute definitions written.
    pub attributes_exported: usize,

    /// Number of attachment blobs written.
    pub attachments_exported: usize,

    /// Errors encountered during export.
    pub errors: Vec<ExportErrorInfo>,

    /// Warnings generated during export.
    pub warnings: Vec<String>,

    /// Start time of export.
    pub started_at: Option<DateTime<Utc>>,

    /// End time of export.
    pub completed_at: Option<DateTime<Utc>>,

    /// Directory the export was written to.
    pub output_dir: Option<PathBuf>,
}

impl ExportReport {
    /// Create a new empty report.
    pub fn new(platform: SourcePlatform) -> Self {
        Self {
            platform: Some(platform),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the export as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Check if the export was successful (no critical errors).
    pub fn is_successful(&self) -> bool {
        self.completed_at.is_some() && self.errors.iter().all(|e| !e.is_critical)
    }

    /// Get the total number of entities exported.
    pub fn total_items_exported(&self) -> usize {
        self.test_cases_exported + self.shared_steps_exported + self.sections_exported
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, category: &str, message: &str, is_critical: bool) {
        self.errors.push(ExportErrorInfo {
            category: category.to_string(),
            message: message.to_string(),
            is_critical,
        });
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Get the duration of the export.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Print a summary of the export.
    pub fn print_summary(&self) {
        println!("\n=== Export Summary ===\n");
        if let Some(platform) = self.platform {
            println!("Source:             {platform}");
        }
        println!("Project:            {}", self.project_name);
        println!("Sections:           {}", self.sections_exported);
        println!("Test cases:         {}", self.test_cases_exported);
        println!("Shared steps:       {}", self.shared_steps_exported);
        println!("Attributes:         {}", self.attributes_exported);
        println!("Attachments:        {}", self.attachments_exported);
        println!("Total entities:     {}", self.total_items_exported());

        if let Some(dir) = &self.output_dir {
            println!("\nOutput directory: {}", dir.display());
        }

        if let Some(duration) = self.duration() {
            println!("\nCompleted in {} seconds", duration.num_seconds());
        }

        if !self.errors.is_empty() {
            println!("\nErrors ({}):", self.errors.len());
            for error in &self.errors {
                let severity = if error.is_critical {
                    "CRITICAL"
                } else {
                    "WARNING"
                };
                println!("  [{severity}] {}: {}", error.category, error.message);
            }
        }

        if !self.warnings.is_empty() {
            println!("\nWarnings ({}):", self.warnings.len());
            for warning in &self.warnings {
                println!("  - {warning}");
            }
        }

        let status = if self.is_successful() {
            "SUCCESS"
        } else {
            "FAILED"
        };
        println!("\nOverall Status: {status}");
    }
}

/// Information about an error that occurred during export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportErrorInfo {
    /// Category of the error (e.g., "test_cases", "attachments").
    pub category: String,

    /// Error message.
    pub message: String,

    /// Whether this error is critical (blocks export success).
    pub is_critical: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_keys_are_distinct() {
        let keys = [
            SourcePlatform::TestRail.key(),
            SourcePlatform::ZephyrScale.key(),
            SourcePlatform::AzureDevOps.key(),
            SourcePlatform::AllureTestOps.key(),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn test_zephyr_config_defaults_url() {
        let config: ZephyrScaleConfig =
            serde_json::from_str(r#"{"token":"t","project_key":"SHOP"}"#).unwrap();
        assert_eq!(config.url, "https://api.zephyrscale.smartbear.com/v2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testrail_config_validation() {
        let config: TestRailConfig = serde_json::from_str(
            r#"{"url":"not-a-url","login":"","password":"p","project_name":"Shop"}"#,
        )
        .unwrap();
        let errors = config.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("url"));
        assert!(fields.contains_key("login"));
    }

    #[test]
    fn test_report_success_requires_completion() {
        let mut report = ExportReport::new(SourcePlatform::TestRail);
        assert!(!report.is_successful());
        report.complete();
        assert!(report.is_successful());
        report.add_error("test_cases", "C1 failed", false);
        assert!(report.is_successful());
        report.add_error("project", "gone", true);
        assert!(!report.is_successful());
    }

    #[test]
    fn test_report_total_excludes_attachments() {
        let mut report = ExportReport::new(SourcePlatform::AllureTestOps);
        report.sections_exported = 2;
        report.test_cases_exported = 5;
        report.shared_steps_exported = 1;
        report.attachments_exported = 9;
        assert_eq!(report.total_items_exported(), 8);
        report.complete();
        report.print_summary();
    }
}
