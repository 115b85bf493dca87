//! # tms export
//!
//! Exporters that read a project from a test-management product and write it
//! in the common schema of [`tms_models`].
//!
//! ## Features
//!
//! - **TestRail**: suites, sections, case fields, separated steps and shared steps
//! - **Zephyr Scale**: folders, test steps and "call to test" steps
//! - **Azure DevOps**: area paths, steps XML, shared steps and parameters
//! - **Allure TestOps**: scenarios, shared steps and custom fields
//!
//! The vendor-neutral parts (section trees, shared-step resolution, attribute
//! mapping and attachment re-linking) live in their own modules and are driven
//! through an [`ExportSession`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use tms_export::{Exporter, ExportOptions, TestRailConfig, TestRailExporter};
//! use tms_models::ExportWriter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TestRailConfig {
//!         url: "https://example.testrail.io".to_string(),
//!         login: "qa@example.com".to_string(),
//!         password: "api-key".to_string(),
//!         project_name: "Shop".to_string(),
//!         suite_ids: Vec::new(),
//!     };
//!
//!     let exporter = TestRailExporter::new(config)?;
//!     let writer = ExportWriter::create("export")?;
//!     let report = exporter.export(writer, &ExportOptions::default()).await?;
//!
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

pub mod allure;
pub mod attachments;
pub mod attributes;
pub mod azure_devops;
pub mod error;
pub mod exporter;
pub mod http;
pub mod progress;
pub mod sections;
pub mod shared_steps;
pub mod testrail;
pub mod types;
pub mod zephyr_scale;

// Re-export main types
pub use allure::AllureExporter;
pub use attachments::AttachmentLinker;
pub use attributes::AttributeMapper;
pub use azure_devops::AzureDevOpsExporter;
pub use error::{ExportError, Result};
pub use exporter::{ExportSession, Exporter};
pub use http::{Auth, VendorClient};
pub use progress::ExportPhase;
pub use sections::{FlatSection, SectionTree};
pub use shared_steps::{RawStep, SharedStepDefinition, SharedStepResolver};
pub use testrail::TestRailExporter;
pub use types::*;
pub use zephyr_scale::ZephyrScaleExporter;

/// Version of the exporters.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
