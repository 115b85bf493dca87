//! The exporter seam and the session every exporter writes through.

use crate::attachments::{drop_attachment, rename_attachment};
use crate::attributes::AttributeMapper;
use crate::error::Result;
use crate::sections::SectionTree;
use crate::shared_steps::SharedStepResolver;
use crate::types::{ExportOptions, ExportReport, SourcePlatform};
use async_trait::async_trait;
use std::collections::HashSet;
use tms_models::{ids, stable_id, EntityKind, ExportWriter, Root, TestCase};
use tracing::{info, warn};
use uuid::Uuid;

/// Top-level section holding shared steps that had no usable location.
pub const SHARED_STEPS_SECTION: &str = "Shared Steps";

/// A source product that can be exported into the common schema.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Product this exporter reads from.
    fn platform(&self) -> SourcePlatform;

    /// Export one project into `writer`'s directory.
    async fn export(&self, writer: ExportWriter, options: &ExportOptions) -> Result<ExportReport>;
}

/// State accumulated while exporting one project.
///
/// Exporters convert test cases one at a time through [`save_test_case`],
/// and register sections, attributes and shared steps on the public
/// builders. [`finish`] resolves shared steps and writes `main.json`.
///
/// [`save_test_case`]: ExportSession::save_test_case
/// [`finish`]: ExportSession::finish
pub struct ExportSession {
    writer: ExportWriter,
    platform: SourcePlatform,
    scope: String,
    pub sections: SectionTree,
    pub attributes: AttributeMapper,
    pub shared_steps: SharedStepResolver<String>,
    pub report: ExportReport,
    test_case_ids: Vec<Uuid>,
    seen: HashSet<Uuid>,
}

impl ExportSession {
    /// Start a session; `project_key` scopes every stable id.
    pub fn new(writer: ExportWriter, platform: SourcePlatform, project_key: &str) -> Self {
        let scope = ids::scope(platform.key(), project_key);
        Self {
            writer,
            platform,
            sections: SectionTree::new(scope.clone()),
            attributes: AttributeMapper::new(scope.clone()),
            shared_steps: SharedStepResolver::new(scope.clone()),
            report: ExportReport::new(platform),
            scope,
            test_case_ids: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn writer(&self) -> &ExportWriter {
        &self.writer
    }

    /// Stable id for a vendor test case.
    pub fn test_case_id(&self, source_id: &str) -> Uuid {
        stable_id(EntityKind::TestCase, &self.scope, source_id)
    }

    /// Number of test cases saved so far.
    pub fn test_case_count(&self) -> usize {
        self.test_case_ids.len()
    }

    /// Store an attachment blob for an entity; returns the stored name.
    pub fn save_attachment(&mut self, entity_id: Uuid, file_name: &str, data: &[u8]) -> Result<String> {
        let name = self.writer.write_attachment(entity_id, file_name, data)?;
        self.report.attachments_exported += 1;
        Ok(name)
    }

    /// Write a test case. A second test case with the same id is skipped.
    pub fn save_test_case(&mut self, test_case: &TestCase) -> Result<()> {
        if !self.seen.insert(test_case.id) {
            self.warn(format!("Test case {} listed twice; kept the first copy", test_case.name));
            return Ok(());
        }
        self.writer.write_test_case(test_case)?;
        self.test_case_ids.push(test_case.id);
        Ok(())
    }

    /// Record a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.report.add_warning(message);
    }

    /// Resolve shared steps, write them and `main.json`, and complete the report.
    pub fn finish(self, project_name: &str) -> Result<ExportReport> {
        let Self {
            writer,
            platform,
            mut sections,
            attributes,
            shared_steps,
            mut report,
            test_case_ids,
            ..
        } = self;

        // Only used for placeholders, so the section exists only when needed.
        let fallback = if shared_steps.has_placeholders() {
            sections.ensure_root(SHARED_STEPS_SECTION)
        } else {
            Uuid::nil()
        };

        let mut resolved = shared_steps.resolve(fallback);
        report.warnings.append(&mut resolved.warnings);

        for borrowed in &resolved.borrowed {
            let Some(shared) = resolved
                .shared_steps
                .iter_mut()
                .find(|s| s.id == borrowed.shared_step)
            else {
                continue;
            };
            let Some(step) = shared.steps.get_mut(borrowed.step_index) else {
                continue;
            };
            for name in step.all_attachments() {
                match writer.copy_attachment(borrowed.from, shared.id, &name) {
                    Ok(copied) => {
                        rename_attachment(step, &name, &copied);
                        shared.attachments.push(copied);
                        report.attachments_exported += 1;
                    }
                    Err(e) => {
                        let message = format!(
                            "Attachment {name} of inlined shared step could not be copied into {}: {e}",
                            shared.name
                        );
                        warn!("{message}");
                        report.add_warning(message);
                        drop_attachment(step, &name);
                    }
                }
            }
        }

        for shared in &resolved.shared_steps {
            writer.write_shared_step(shared)?;
        }

        report.warnings.extend(sections.warnings().iter().cloned());

        let mut root = Root::new(project_name);
        root.source = Some(platform.to_string());
        root.attributes = attributes.into_attributes();
        root.sections = sections.into_sections();
        root.shared_steps = resolved.shared_steps.iter().map(|s| s.id).collect();
        root.test_cases = test_case_ids;
        writer.write_root(&root)?;

        report.project_name = project_name.to_string();
        report.sections_exported = root.walk_sections().count();
        report.test_cases_exported = root.test_cases.len();
        report.shared_steps_exported = root.shared_steps.len();
        report.attributes_exported = root.attributes.len();
        report.output_dir = Some(writer.dir().to_path_buf());
        report.complete();

        info!(
            project = %project_name,
            sections = report.sections_exported,
            test_cases = report.test_cases_exported,
            shared_steps = report.shared_steps_exported,
            "Export written"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_steps::{RawStep, SharedStepDefinition};
    use tempfile::TempDir;
    use tms_models::{ExportReader, Step};

    fn session(dir: &TempDir) -> ExportSession {
        let writer = ExportWriter::create(dir.path()).unwrap();
        ExportSession::new(writer, SourcePlatform::TestRail, "1")
    }

    #[test]
    fn test_finish_writes_root_and_counts() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let section = s.sections.ensure_root("Checkout");
        let mut case = TestCase::new(s.test_case_id("C1"), "Pay by card", section);
        case.steps = s
            .shared_steps
            .convert_steps(vec![RawStep::Call("login".to_string())]);
        s.save_test_case(&case).unwrap();
        s.save_test_case(&case).unwrap();

        let report = s.finish("Shop").unwrap();
        assert_eq!(report.test_cases_exported, 1);
        assert_eq!(report.shared_steps_exported, 1);
        assert_eq!(report.sections_exported, 2);
        assert!(report.is_successful());

        let reader = ExportReader::open(dir.path()).unwrap();
        let root = reader.read_root().unwrap();
        assert_eq!(root.source.as_deref(), Some("TestRail"));
        let placeholder = reader.read_shared_step(root.shared_steps[0]).unwrap();
        assert_eq!(
            root.find_section(placeholder.section_id).unwrap().name,
            SHARED_STEPS_SECTION
        );
        assert!(tms_models::validate_export(&reader).unwrap().is_valid());
    }

    #[test]
    fn test_inlined_attachments_are_copied() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir);
        let section = s.sections.ensure_root("Blocks");

        let inner_id = s.shared_steps.request(&"inner".to_string());
        let stored = s.save_attachment(inner_id, "shot.png", b"png").unwrap();
        let mut inner_step = Step::new(format!("Look at {}", tms_models::placeholder(&stored)), "");
        inner_step.action_attachments.push(stored.clone());
        let mut inner = SharedStepDefinition::new("inner".to_string(), "Inner", section);
        inner.steps = vec![RawStep::Step(inner_step)];
        inner.attachments = vec![stored];
        s.shared_steps.define(inner);

        let mut outer = SharedStepDefinition::new("outer".to_string(), "Outer", section);
        outer.steps = vec![RawStep::Call("inner".to_string())];
        let outer_id = s.shared_steps.define(outer);

        let report = s.finish("Shop").unwrap();
        assert_eq!(report.attachments_exported, 2);

        let reader = ExportReader::open(dir.path()).unwrap();
        let outer = reader.read_shared_step(outer_id).unwrap();
        assert_eq!(outer.attachments, vec!["shot.png"]);
        assert!(reader.attachment_path(outer_id, "shot.png").is_file());
        assert!(tms_models::validate_export(&reader).unwrap().is_valid());
    }
}
