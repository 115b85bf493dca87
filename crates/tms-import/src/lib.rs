//! # tms import
//!
//! Loads an export directory written by `tms-export` into Test IT.
//!
//! Entities are created in dependency order (project, attributes, sections,
//! shared steps, test cases) and every reference is remapped to the id Test IT
//! assigns. Inline `<<<file>>>` references become images of the uploaded
//! attachments.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tms_import::{ImportConfig, ImportOptions, Importer};
//! use tms_models::ExportReader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig {
//!         url: "https://testit.example.com".to_string(),
//!         token: "private-token".to_string(),
//!         project_name: None,
//!         import_to_existing_project: false,
//!     };
//!
//!     let reader = ExportReader::open("export")?;
//!     let report = Importer::new(config)?
//!         .import(&reader, &ImportOptions::default())
//!         .await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod importer;
pub mod progress;
pub mod types;

// Re-export main types
pub use client::TestItClient;
pub use error::{ImportError, Result};
pub use importer::Importer;
pub use progress::ImportPhase;
pub use types::{ImportConfig, ImportErrorInfo, ImportOptions, ImportReport};

/// Version of the importer.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let result = Importer::new(ImportConfig {
            url: "testit".to_string(),
            token: "t".to_string(),
            project_name: None,
            import_to_existing_project: false,
        });
        assert!(matches!(result, Err(ImportError::InvalidConfig(_))));
    }

    #[test]
    fn test_options_default_uploads_attachments() {
        assert!(ImportOptions::default().upload_attachments);
        assert!(!ImportOptions::default().with_attachments(false).upload_attachments);
    }
}
