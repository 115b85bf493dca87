//! Consistency checks over a written export.
//!
//! Checks the invariants every exporter must hold: unique section ids, entity
//! section references, shared-step references, attribute references and that
//! every referenced attachment blob exists next to its entity.

use crate::attribute::{AttributeType, AttributeValue, CaseAttribute};
use crate::error::Result;
use crate::root::Root;
use crate::store::ExportReader;
use crate::test_case::Step;

use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Entity the issue was found on, when it concerns one.
    pub entity: Option<Uuid>,
    pub message: String,
}

/// Result of [`validate_export`].
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub sections_checked: usize,
    pub test_cases_checked: usize,
    pub shared_steps_checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn error(&mut self, entity: Option<Uuid>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Error,
            entity,
            message: message.into(),
        });
    }

    fn warning(&mut self, entity: Option<Uuid>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Warning,
            entity,
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// True when no error-level issue was found.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Print a summary of the validation.
    pub fn print_summary(&self) {
        println!("\n=== Validation Summary ===\n");
        println!("Sections:      {}", self.sections_checked);
        println!("Test cases:    {}", self.test_cases_checked);
        println!("Shared steps:  {}", self.shared_steps_checked);

        for (label, severity) in [("Errors", Severity::Error), ("Warnings", Severity::Warning)] {
            let issues: Vec<_> = self.issues.iter().filter(|i| i.severity == severity).collect();
            if issues.is_empty() {
                continue;
            }
            println!("\n{label} ({}):", issues.len());
            for issue in issues {
                match issue.entity {
                    Some(id) => println!("  - [{id}] {}", issue.message),
                    None => println!("  - {}", issue.message),
                }
            }
        }

        println!(
            "\nValidation: {}",
            if self.is_valid() { "PASSED" } else { "FAILED" }
        );
    }
}

/// Validates an export directory.
///
/// Returns `Err` only when `main.json` itself cannot be read; every other
/// problem is reported as an issue.
pub fn validate_export(reader: &ExportReader) -> Result<ValidationReport> {
    let root = reader.read_root()?;
    let mut report = ValidationReport::default();

    let section_ids = check_sections(&root, &mut report);
    let shared_ids = check_id_list(&root.shared_steps, "shared step", &mut report);
    check_id_list(&root.test_cases, "test case", &mut report);

    for &id in &root.shared_steps {
        let shared = match reader.read_shared_step(id) {
            Ok(shared) => shared,
            Err(e) => {
                report.error(Some(id), format!("Shared step cannot be read: {e}"));
                continue;
            }
        };
        report.shared_steps_checked += 1;

        if !section_ids.contains(&shared.section_id) {
            report.error(Some(id), format!("Unknown section {}", shared.section_id));
        }
        if shared.steps.iter().any(|s| s.shared_step_id.is_some()) {
            report.error(Some(id), "Shared step calls another shared step");
        }
        check_attachments(
            reader,
            id,
            &shared.attachments,
            &shared.referenced_attachments(),
            &mut report,
        );
        check_attributes(&root, id, &shared.attributes, false, &mut report);
    }

    for &id in &root.test_cases {
        let case = match reader.read_test_case(id) {
            Ok(case) => case,
            Err(e) => {
                report.error(Some(id), format!("Test case cannot be read: {e}"));
                continue;
            }
        };
        report.test_cases_checked += 1;

        if !section_ids.contains(&case.section_id) {
            report.error(Some(id), format!("Unknown section {}", case.section_id));
        }
        for step in case.all_steps() {
            check_shared_reference(step, &shared_ids, id, &mut report);
        }
        if case.name.trim().is_empty() {
            report.warning(Some(id), "Test case has an empty name");
        }
        check_attachments(
            reader,
            id,
            &case.attachments,
            &case.referenced_attachments(),
            &mut report,
        );
        check_attributes(&root, id, &case.attributes, true, &mut report);
    }

    info!(
        sections = report.sections_checked,
        test_cases = report.test_cases_checked,
        shared_steps = report.shared_steps_checked,
        issues = report.issues.len(),
        "Validated export"
    );
    Ok(report)
}

fn check_sections(root: &Root, report: &mut ValidationReport) -> HashSet<Uuid> {
    let mut ids = HashSet::new();
    for section in root.walk_sections() {
        report.sections_checked += 1;
        if !ids.insert(section.id) {
            report.error(Some(section.id), "Duplicate section id");
        }
        if section.name.trim().is_empty() {
            report.error(Some(section.id), "Section has an empty name");
        }
    }
    if root.sections.is_empty() && !(root.test_cases.is_empty() && root.shared_steps.is_empty()) {
        report.error(None, "Export has entities but no sections");
    }
    ids
}

fn check_id_list(ids: &[Uuid], what: &str, report: &mut ValidationReport) -> HashSet<Uuid> {
    let mut seen = HashSet::new();
    for &id in ids {
        if !seen.insert(id) {
            report.error(Some(id), format!("Duplicate {what} id"));
        }
    }
    seen
}

fn check_shared_reference(
    step: &Step,
    shared_ids: &HashSet<Uuid>,
    owner: Uuid,
    report: &mut ValidationReport,
) {
    if let Some(shared) = step.shared_step_id {
        if !shared_ids.contains(&shared) {
            report.error(Some(owner), format!("Step calls unknown shared step {shared}"));
        }
    }
}

fn check_attachments(
    reader: &ExportReader,
    owner: Uuid,
    listed: &[String],
    referenced: &[String],
    report: &mut ValidationReport,
) {
    for name in listed {
        if !reader.attachment_path(owner, name).is_file() {
            report.error(Some(owner), format!("Attachment file missing: {name}"));
        }
    }
    for name in referenced {
        if !listed.contains(name) {
            report.error(
                Some(owner),
                format!("Reference to attachment not listed on entity: {name}"),
            );
        }
    }
    debug!(entity = %owner, attachments = listed.len(), "Checked attachments");
}

fn check_attributes(
    root: &Root,
    owner: Uuid,
    values: &[CaseAttribute],
    check_required: bool,
    report: &mut ValidationReport,
) {
    for value in values {
        let Some(attribute) = root.find_attribute(value.id) else {
            report.error(Some(owner), format!("Unknown attribute {}", value.id));
            continue;
        };

        let shape_ok = match (attribute.attribute_type, &value.value) {
            (AttributeType::Checkbox, AttributeValue::Bool(_)) => true,
            (AttributeType::MultipleOptions, AttributeValue::List(_)) => true,
            (
                AttributeType::String
                | AttributeType::Datetime
                | AttributeType::User
                | AttributeType::Options,
                AttributeValue::Text(_),
            ) => true,
            _ => false,
        };
        if !shape_ok {
            report.error(
                Some(owner),
                format!(
                    "Value of attribute '{}' does not match type {}",
                    attribute.name, attribute.attribute_type
                ),
            );
            continue;
        }

        if attribute.attribute_type.has_options() {
            for option in value.value.option_values() {
                if !attribute.has_option(option) {
                    report.error(
                        Some(owner),
                        format!("'{option}' is not an option of attribute '{}'", attribute.name),
                    );
                }
            }
        }
    }

    if check_required {
        for attribute in root.attributes.iter().filter(|a| a.is_required && a.is_active) {
            if !values.iter().any(|v| v.id == attribute.id) {
                report.warning(
                    Some(owner),
                    format!("Required attribute '{}' has no value", attribute.name),
                );
            }
        }
    }
}
