//! Test IT import implementation.

use crate::client::{
    AttributeOptionRequest, CreateAttributeRequest, CreateSectionRequest, CreateWorkItemRequest,
    IdRef, IterationRequest, LinkRequest, ProjectResponse, StepRequest, TagRequest, TestItClient,
};
use crate::error::{ImportError, Result};
use crate::progress::ImportPhase;
use crate::types::{ImportConfig, ImportOptions, ImportReport};

use serde_json::Value;
use std::collections::HashMap;
use tms_models::{
    replace_placeholders, Attribute, AttributeType, AttributeValue, CaseAttribute, ExportReader,
    Iteration, Link, LinkType, PriorityType, Progress, Section, SharedStep, StateType, Step,
    TestCase,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// An attribute created in Test IT.
struct AttributeTarget {
    id: Uuid,
    attribute_type: AttributeType,
    options: HashMap<String, Uuid>,
}

/// Ids assigned by Test IT, keyed by export ids.
#[derive(Default)]
struct IdMap {
    attributes: HashMap<Uuid, AttributeTarget>,
    sections: HashMap<Uuid, Uuid>,
    shared_steps: HashMap<Uuid, Uuid>,
    parameters: HashMap<(String, String), Uuid>,
}

/// Fields shared by test cases and shared steps.
struct WorkItemSource<'a> {
    id: Uuid,
    name: &'a str,
    description: &'a str,
    state: StateType,
    priority: PriorityType,
    section_id: Uuid,
    attributes: &'a [CaseAttribute],
    tags: &'a [String],
    links: &'a [Link],
    attachments: &'a [String],
}

/// Imports an export directory into a Test IT project.
pub struct Importer {
    client: TestItClient,
    config: ImportConfig,
    progress: Progress,
}

impl Importer {
    /// Create a new importer.
    pub fn new(config: ImportConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ImportError::InvalidConfig(format!("testit: {e}")))?;
        let client = TestItClient::new(&config.url, &config.token)?;

        Ok(Self {
            client,
            config,
            progress: Progress::new(),
        })
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Run the import.
    pub async fn import(&self, reader: &ExportReader, options: &ImportOptions) -> Result<ImportReport> {
        let root = reader.read_root()?;
        let project_name = self
            .config
            .project_name
            .clone()
            .unwrap_or_else(|| root.project_name.clone());
        info!("Starting Test IT import into {project_name}");
        self.progress.set_phase(ImportPhase::Connecting, 1);

        let mut report = ImportReport::new(&project_name);
        let project = self.resolve_project(&project_name).await?;
        report.project_id = Some(project.id);

        let root_section = self
            .client
            .project_sections(project.id)
            .await?
            .into_iter()
            .find(|s| s.parent_id.is_none())
            .ok_or_else(|| ImportError::MissingRootSection(project.name.clone()))?;

        let mut ids = IdMap::default();

        // Step 1: Attributes
        self.progress
            .set_phase(ImportPhase::ImportingAttributes, root.attributes.len() as u64);
        self.import_attributes(&project, &root.attributes, &mut ids, &mut report)
            .await;

        // Step 2: Sections
        self.progress
            .set_phase(ImportPhase::ImportingSections, root.walk_sections().count() as u64);
        self.import_sections(&project, &root.sections, root_section.id, &mut ids, &mut report)
            .await;
        info!("Imported {} sections", report.sections_imported);

        // Step 3: Shared steps
        self.progress
            .set_phase(ImportPhase::ImportingSharedSteps, root.shared_steps.len() as u64);
        for id in &root.shared_steps {
            let result = match reader.read_shared_step(*id) {
                Ok(shared) => self
                    .import_shared_step(reader, &project, &shared, root_section.id, &mut ids, &mut report, options)
                    .await
                    .map_err(|e| format!("{}: {e}", shared.name)),
                Err(e) => Err(format!("{id}: {e}")),
            };
            if let Err(message) = result {
                warn!("Failed to import shared step {message}");
                report.add_error("shared_steps", message);
            }
            self.progress.increment(Some(&id.to_string()));
        }
        info!("Imported {} shared steps", report.shared_steps_imported);

        // Step 4: Test cases
        self.progress
            .set_phase(ImportPhase::ImportingTestCases, root.test_cases.len() as u64);
        for id in &root.test_cases {
            let result = match reader.read_test_case(*id) {
                Ok(test_case) => self
                    .import_test_case(reader, &project, &test_case, root_section.id, &mut ids, &mut report, options)
                    .await
                    .map_err(|e| format!("{}: {e}", test_case.name)),
                Err(e) => Err(format!("{id}: {e}")),
            };
            if let Err(message) = result {
                warn!("Failed to import test case {message}");
                report.add_error("test_cases", message);
            }
            self.progress.increment(Some(&id.to_string()));
        }
        info!("Imported {} test cases", report.test_cases_imported);

        self.progress.set_phase(ImportPhase::Complete, 1);
        report.complete();
        Ok(report)
    }

    /// Reuse the project by name, or create it.
    async fn resolve_project(&self, name: &str) -> Result<ProjectResponse> {
        if self.config.import_to_existing_project {
            let projects = self.client.list_projects().await?;
            return projects
                .into_iter()
                .find(|p| p.name == name)
                .ok_or_else(|| ImportError::ProjectNotFound(name.to_string()));
        }
        let project = self.client.create_project(name, None).await?;
        info!(id = %project.id, "Created project {name}");
        Ok(project)
    }

    async fn import_attributes(
        &self,
        project: &ProjectResponse,
        attributes: &[Attribute],
        ids: &mut IdMap,
        report: &mut ImportReport,
    ) {
        for attribute in attributes {
            let request = CreateAttributeRequest {
                name: attribute.name.clone(),
                attribute_type: attribute_type_name(attribute.attribute_type).to_string(),
                is_enabled: attribute.is_active,
                is_required: attribute.is_required,
                is_global: true,
                options: attribute
                    .options
                    .iter()
                    .map(|value| AttributeOptionRequest {
                        value: value.clone(),
                        is_default: false,
                    })
                    .collect(),
            };
            match self.client.create_attribute(&request).await {
                Ok(created) => {
                    let options = created
                        .options
                        .into_iter()
                        .filter_map(|o| o.value.map(|v| (v, o.id)))
                        .collect();
                    ids.attributes.insert(
                        attribute.id,
                        AttributeTarget {
                            id: created.id,
                            attribute_type: attribute.attribute_type,
                            options,
                        },
                    );
                    report.attributes_imported += 1;
                }
                Err(e) => {
                    warn!("Failed to create attribute {}: {e}", attribute.name);
                    report.add_error("attributes", format!("{}: {e}", attribute.name));
                }
            }
            self.progress.increment(Some(&attribute.name));
        }

        if ids.attributes.is_empty() {
            return;
        }
        let created: Vec<Uuid> = ids.attributes.values().map(|a| a.id).collect();
        if let Err(e) = self.client.add_attributes_to_project(project.id, &created).await {
            warn!("Failed to enable attributes in project: {e}");
            report.add_error("attributes", format!("enabling attributes in project: {e}"));
        }
    }

    /// Create the tree depth first. A section that fails is replaced by its
    /// parent, so its children and test cases still land in the project.
    async fn import_sections(
        &self,
        project: &ProjectResponse,
        sections: &[Section],
        root_section: Uuid,
        ids: &mut IdMap,
        report: &mut ImportReport,
    ) {
        let mut pending: Vec<(&Section, Uuid)> = sections.iter().rev().map(|s| (s, root_section)).collect();

        while let Some((section, parent)) = pending.pop() {
            let request = CreateSectionRequest {
                name: section.name.clone(),
                parent_id: parent,
                project_id: project.id,
                precondition_steps: section.precondition_steps.iter().map(plain_step).collect(),
                postcondition_steps: section.postcondition_steps.iter().map(plain_step).collect(),
                attachments: Vec::new(),
            };
            let new_id = match self.client.create_section(&request).await {
                Ok(created) => {
                    report.sections_imported += 1;
                    created.id
                }
                Err(e) => {
                    warn!("Failed to create section {}: {e}", section.name);
                    report.add_error("sections", format!("{}: {e}", section.name));
                    parent
                }
            };
            ids.sections.insert(section.id, new_id);
            self.progress.increment(Some(&section.name));

            for child in section.sections.iter().rev() {
                pending.push((child, new_id));
            }
        }
    }

    /// Upload an entity's attachments; returns file name to attachment id.
    async fn upload_attachments(
        &self,
        reader: &ExportReader,
        entity: Uuid,
        names: &[String],
        report: &mut ImportReport,
        options: &ImportOptions,
    ) -> HashMap<String, Uuid> {
        let mut uploaded = HashMap::new();
        if !options.upload_attachments {
            return uploaded;
        }

        for name in names {
            let result = match reader.read_attachment(entity, name) {
                Ok(data) => self.client.upload_attachment(name, data).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(attachment) => {
                    uploaded.insert(name.clone(), attachment.id);
                    report.attachments_uploaded += 1;
                }
                Err(e) => {
                    warn!("Failed to upload attachment {name}: {e}");
                    report.add_warning(format!("Attachment {name} of {entity} not uploaded: {e}"));
                }
            }
        }
        uploaded
    }

    /// Build the work item fields shared by test cases and shared steps.
    #[allow(clippy::too_many_arguments)]
    fn work_item(
        &self,
        kind: &str,
        project: &ProjectResponse,
        source: &WorkItemSource<'_>,
        fallback_section: Uuid,
        ids: &IdMap,
        uploaded: &HashMap<String, Uuid>,
        report: &mut ImportReport,
    ) -> CreateWorkItemRequest {
        let section_id = ids
            .sections
            .get(&source.section_id)
            .copied()
            .unwrap_or(fallback_section);

        CreateWorkItemRequest {
            entity_type_name: kind.to_string(),
            project_id: project.id,
            section_id,
            name: source.name.to_string(),
            description: render_placeholders(source.description, uploaded),
            state: state_name(source.state).to_string(),
            priority: priority_name(source.priority).to_string(),
            steps: Vec::new(),
            precondition_steps: Vec::new(),
            postcondition_steps: Vec::new(),
            duration: 0,
            attributes: attribute_values(source.attributes, ids, source.name, report),
            tags: source
                .tags
                .iter()
                .map(|t| TagRequest { name: t.clone() })
                .collect(),
            links: source.links.iter().map(convert_link).collect(),
            attachments: source
                .attachments
                .iter()
                .filter_map(|name| uploaded.get(name))
                .map(|id| IdRef { id: *id })
                .collect(),
            iterations: Vec::new(),
            auto_tests: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_shared_step(
        &self,
        reader: &ExportReader,
        project: &ProjectResponse,
        shared: &SharedStep,
        fallback_section: Uuid,
        ids: &mut IdMap,
        report: &mut ImportReport,
        options: &ImportOptions,
    ) -> Result<()> {
        let uploaded = self
            .upload_attachments(reader, shared.id, &shared.attachments, report, options)
            .await;
        let source = WorkItemSource {
            id: shared.id,
            name: &shared.name,
            description: &shared.description,
            state: shared.state,
            priority: shared.priority,
            section_id: shared.section_id,
            attributes: &shared.attributes,
            tags: &shared.tags,
            links: &shared.links,
            attachments: &shared.attachments,
        };

        let mut request = self.work_item("SharedSteps", project, &source, fallback_section, ids, &uploaded, report);
        request.steps = self.convert_steps(&shared.steps, &uploaded, ids, &shared.name, report);

        let created = self.client.create_work_item(&request).await?;
        debug!(source = %source.id, id = %created.id, "Created shared steps");
        ids.shared_steps.insert(shared.id, created.id);
        report.shared_steps_imported += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_test_case(
        &self,
        reader: &ExportReader,
        project: &ProjectResponse,
        test_case: &TestCase,
        fallback_section: Uuid,
        ids: &mut IdMap,
        report: &mut ImportReport,
        options: &ImportOptions,
    ) -> Result<()> {
        let uploaded = self
            .upload_attachments(reader, test_case.id, &test_case.attachments, report, options)
            .await;
        let source = WorkItemSource {
            id: test_case.id,
            name: &test_case.name,
            description: &test_case.description,
            state: test_case.state,
            priority: test_case.priority,
            section_id: test_case.section_id,
            attributes: &test_case.attributes,
            tags: &test_case.tags,
            links: &test_case.links,
            attachments: &test_case.attachments,
        };

        let mut request = self.work_item("TestCases", project, &source, fallback_section, ids, &uploaded, report);
        request.steps = self.convert_steps(&test_case.steps, &uploaded, ids, &test_case.name, report);
        request.precondition_steps =
            self.convert_steps(&test_case.precondition_steps, &uploaded, ids, &test_case.name, report);
        request.postcondition_steps =
            self.convert_steps(&test_case.postcondition_steps, &uploaded, ids, &test_case.name, report);
        request.duration = test_case.duration;
        request.iterations = self.import_iterations(&test_case.iterations, ids).await?;

        let created = self.client.create_work_item(&request).await?;
        debug!(source = %source.id, id = %created.id, "Created test case");
        report.test_cases_imported += 1;
        Ok(())
    }

    /// Create each distinct parameter value once and reference it by id.
    async fn import_iterations(&self, iterations: &[Iteration], ids: &mut IdMap) -> Result<Vec<IterationRequest>> {
        let mut out = Vec::with_capacity(iterations.len());
        for iteration in iterations {
            let mut parameters = Vec::with_capacity(iteration.parameters.len());
            for parameter in &iteration.parameters {
                let key = (parameter.name.clone(), parameter.value.clone());
                let id = match ids.parameters.get(&key) {
                    Some(id) => *id,
                    None => {
                        let created = self
                            .client
                            .create_parameter(&parameter.name, &parameter.value)
                            .await?;
                        ids.parameters.insert(key, created.id);
                        created.id
                    }
                };
                parameters.push(IdRef { id });
            }
            out.push(IterationRequest { parameters });
        }
        Ok(out)
    }

    fn convert_steps(
        &self,
        steps: &[Step],
        uploaded: &HashMap<String, Uuid>,
        ids: &IdMap,
        owner: &str,
        report: &mut ImportReport,
    ) -> Vec<StepRequest> {
        steps
            .iter()
            .filter_map(|step| match step.shared_step_id {
                Some(shared) => match ids.shared_steps.get(&shared) {
                    Some(work_item) => Some(StepRequest {
                        work_item_id: Some(*work_item),
                        ..Default::default()
                    }),
                    None => {
                        report.add_warning(format!(
                            "{owner}: call to shared step {shared} dropped, it was not imported"
                        ));
                        None
                    }
                },
                None => Some(StepRequest {
                    action: render_placeholders(&step.action, uploaded),
                    expected: render_placeholders(&step.expected, uploaded),
                    test_data: render_placeholders(&step.test_data, uploaded),
                    ..Default::default()
                }),
            })
            .collect()
    }
}

/// Rewrite `<<<name>>>` into an inline image of the uploaded attachment.
fn render_placeholders(text: &str, uploaded: &HashMap<String, Uuid>) -> String {
    replace_placeholders(text, |name| {
        uploaded
            .get(name)
            .map(|id| format!(r#"<p><img src="/api/Attachments/{id}"></p>"#))
    })
}

fn plain_step(step: &Step) -> StepRequest {
    StepRequest {
        action: step.action.clone(),
        expected: step.expected.clone(),
        test_data: step.test_data.clone(),
        ..Default::default()
    }
}

/// Attribute values keyed by new attribute id; option values become option ids.
fn attribute_values(
    values: &[CaseAttribute],
    ids: &IdMap,
    owner: &str,
    report: &mut ImportReport,
) -> HashMap<Uuid, Value> {
    let mut out = HashMap::new();
    for value in values {
        let Some(target) = ids.attributes.get(&value.id) else {
            report.add_warning(format!("{owner}: value of unknown attribute {} dropped", value.id));
            continue;
        };

        let option_id = |option: &str| {
            target
                .options
                .get(option)
                .map(|id| Value::String(id.to_string()))
        };
        let converted = match (target.attribute_type, &value.value) {
            (AttributeType::Options, v) => v.option_values().first().and_then(|o| option_id(o)),
            (AttributeType::MultipleOptions, v) => {
                let options = v.option_values();
                let mapped: Vec<Value> = options.iter().filter_map(|o| option_id(o)).collect();
                (mapped.len() == options.len()).then_some(Value::Array(mapped))
            }
            (_, AttributeValue::Bool(b)) => Some(Value::Bool(*b)),
            (_, AttributeValue::Text(s)) => Some(Value::String(s.clone())),
            (_, AttributeValue::List(items)) => Some(Value::String(items.join(", "))),
        };

        match converted {
            Some(v) => {
                out.insert(target.id, v);
            }
            None => report.add_warning(format!(
                "{owner}: value {:?} of attribute {} has no matching option",
                value.value, value.id
            )),
        }
    }
    out
}

fn convert_link(link: &Link) -> LinkRequest {
    LinkRequest {
        url: link.url.clone(),
        title: link.title.clone(),
        description: link.description.clone(),
        link_type: link_type_name(link.link_type).to_string(),
        has_info: link.title.is_some() || link.description.is_some(),
    }
}

fn attribute_type_name(attribute_type: AttributeType) -> &'static str {
    match attribute_type {
        AttributeType::String => "string",
        AttributeType::Datetime => "datetime",
        AttributeType::Options => "options",
        AttributeType::MultipleOptions => "multipleOptions",
        AttributeType::User => "user",
        AttributeType::Checkbox => "checkbox",
    }
}

fn state_name(state: StateType) -> &'static str {
    match state {
        StateType::NotReady => "NotReady",
        StateType::Ready => "Ready",
        StateType::NeedsWork => "NeedsWork",
    }
}

fn priority_name(priority: PriorityType) -> &'static str {
    match priority {
        PriorityType::Lowest => "Lowest",
        PriorityType::Low => "Low",
        PriorityType::Medium => "Medium",
        PriorityType::High => "High",
        PriorityType::Highest => "Highest",
    }
}

fn link_type_name(link_type: LinkType) -> &'static str {
    match link_type {
        LinkType::Related => "Related",
        LinkType::BlockedBy => "BlockedBy",
        LinkType::Defect => "Defect",
        LinkType::Issue => "Issue",
        LinkType::Requirement => "Requirement",
        LinkType::Repository => "Repository",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let id = Uuid::from_u128(1);
        let uploaded = HashMap::from([("a.png".to_string(), id)]);
        assert_eq!(
            render_placeholders("See <<<a.png>>> and <<<b.png>>>", &uploaded),
            format!(r#"See <p><img src="/api/Attachments/{id}"></p> and <<<b.png>>>"#)
        );
    }

    #[test]
    fn test_option_values_become_option_ids() {
        let mut ids = IdMap::default();
        let option = Uuid::from_u128(9);
        ids.attributes.insert(
            Uuid::from_u128(1),
            AttributeTarget {
                id: Uuid::from_u128(2),
                attribute_type: AttributeType::MultipleOptions,
                options: HashMap::from([("UI".to_string(), option)]),
            },
        );
        let mut report = ImportReport::default();

        let values = [CaseAttribute {
            id: Uuid::from_u128(1),
            value: AttributeValue::List(vec!["UI".to_string()]),
        }];
        let out = attribute_values(&values, &ids, "case", &mut report);
        assert_eq!(out[&Uuid::from_u128(2)], Value::Array(vec![Value::String(option.to_string())]));

        let unknown = [CaseAttribute {
            id: Uuid::from_u128(1),
            value: AttributeValue::List(vec!["API".to_string()]),
        }];
        assert!(attribute_values(&unknown, &ids, "case", &mut report).is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_enum_names() {
        assert_eq!(attribute_type_name(AttributeType::MultipleOptions), "multipleOptions");
        assert_eq!(state_name(StateType::NeedsWork), "NeedsWork");
        assert_eq!(priority_name(PriorityType::Highest), "Highest");
        assert_eq!(link_type_name(LinkType::BlockedBy), "BlockedBy");
    }
}
