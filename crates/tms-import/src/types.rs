//! Common types for import operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Connection settings for Test IT.
#[derive(Clone, Deserialize, Validate)]
pub struct ImportConfig {
    /// Instance URL, e.g. `https://testit.example.com`.
    #[validate(url)]
    pub url: String,
    /// Private API token.
    #[validate(length(min = 1))]
    pub token: String,
    /// Target project name; the exported project's name when unset.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Import into an existing project of the same name instead of creating one.
    #[serde(default)]
    pub import_to_existing_project: bool,
}

/// Options for an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Upload attachments and rewrite inline references to them.
    pub upload_attachments: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            upload_attachments: true,
        }
    }
}

impl ImportOptions {
    /// Set whether to upload attachments.
    pub fn with_attachments(mut self, upload: bool) -> Self {
        self.upload_attachments = upload;
        self
    }
}

/// Report of an import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub project_name: String,
    pub project_id: Option<Uuid>,
    pub sections_imported: usize,
    pub attributes_imported: usize,
    pub shared_steps_imported: usize,
    pub test_cases_imported: usize,
    pub attachments_uploaded: usize,
    pub errors: Vec<ImportErrorInfo>,
    pub warnings: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportReport {
    /// Create a new empty report.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the import as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Check if the import was successful (completed, no errors).
    pub fn is_successful(&self) -> bool {
        self.completed_at.is_some() && self.errors.is_empty()
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, category: &str, message: impl Into<String>) {
        self.errors.push(ImportErrorInfo {
            category: category.to_string(),
            message: message.into(),
        });
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Get the duration of the import.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Print a summary of the import.
    pub fn print_summary(&self) {
        println!("\n=== Import Summary ===\n");
        println!("Project:            {}", self.project_name);
        if let Some(id) = self.project_id {
            println!("Project id:         {id}");
        }
        println!("Sections:           {}", self.sections_imported);
        println!("Attributes:         {}", self.attributes_imported);
        println!("Shared steps:       {}", self.shared_steps_imported);
        println!("Test cases:         {}", self.test_cases_imported);
        println!("Attachments:        {}", self.attachments_uploaded);

        if let Some(duration) = self.duration() {
            println!("\nCompleted in {} seconds", duration.num_seconds());
        }

        if !self.errors.is_empty() {
            println!("\nErrors ({}):", self.errors.len());
            for error in &self.errors {
                println!("  [{}] {}", error.category, error.message);
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
            "COMPLETED WITH ERRORS"
        };
        println!("\nOverall Status: {status}");
    }
}

/// An entity that could not be imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportErrorInfo {
    /// Category of the entity (e.g., "sections", "test_cases").
    pub category: String,

    /// Error message.
    pub message: String,
}
