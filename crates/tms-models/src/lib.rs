//! Common intermediate schema for test-management migrations.
//!
//! Every exporter converts its product's data into these types and writes
//! them with [`ExportWriter`]; the importer reads them back with
//! [`ExportReader`]. See [`store`] for the directory layout.

pub mod attachment;
mod attribute;
pub mod error;
pub mod ids;
pub mod progress;
mod root;
mod section;
pub mod store;
mod test_case;
pub mod validate;

pub use attachment::{placeholder, placeholders_in, replace_placeholders};
pub use attribute::{Attribute, AttributeType, AttributeValue, CaseAttribute};
pub use error::{ModelError, Result};
pub use ids::{stable_id, EntityKind};
pub use progress::{Progress, ProgressCallback, ProgressUpdate};
pub use root::Root;
pub use section::{Section, SectionWalk};
pub use store::{ExportReader, ExportWriter};
pub use test_case::{
    Iteration, Link, LinkType, Parameter, PriorityType, SharedStep, StateType, Step, TestCase,
};
pub use validate::{validate_export, Severity, ValidationIssue, ValidationReport};
