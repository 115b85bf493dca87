//! Azure DevOps Test Plans export implementation.
//!
//! Test cases and shared steps are work items. Their steps and data sources
//! are XML documents stored in work item fields.

use crate::attachments::{find_references, AttachmentLinker};
use crate::attributes::map_state;
use crate::error::{ExportError, Result};
use crate::exporter::{ExportSession, Exporter};
use crate::http::{Auth, VendorClient};
use crate::progress::ExportPhase;
use crate::sections::DEFAULT_SECTION_NAME;
use crate::shared_steps::{RawStep, SharedStepDefinition};
use crate::types::{AzureDevOpsConfig, ExportOptions, ExportReport, SourcePlatform};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tms_models::{
    ExportWriter, Iteration, Link, LinkType, Parameter, PriorityType, Progress, StateType, Step,
    TestCase,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use validator::Validate;

const API_VERSION: &str = "api-version=7.0";

/// Work items per batch request, the API's upper bound.
const BATCH_SIZE: usize = 200;

const FIELD_TITLE: &str = "System.Title";
const FIELD_AREA_PATH: &str = "System.AreaPath";
const FIELD_STATE: &str = "System.State";
const FIELD_TAGS: &str = "System.Tags";
const FIELD_DESCRIPTION: &str = "System.Description";
const FIELD_PRIORITY: &str = "Microsoft.VSTS.Common.Priority";
const FIELD_STEPS: &str = "Microsoft.VSTS.TCM.Steps";
const FIELD_DATA_SOURCE: &str = "Microsoft.VSTS.TCM.LocalDataSource";

/// Inline images pointing at work item attachments; group 1 is the attachment guid.
static ATTACHMENT_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img[^>]*?src="[^"]*?/_apis/wit/attachments/([0-9a-f-]{36})[^"]*"[^>]*>"#)
        .expect("Invalid regex")
});

/// Azure DevOps API response types
#[derive(Debug, Deserialize)]
struct AdoProject {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdoWiqlResult {
    #[serde(default)]
    work_items: Vec<AdoWorkItemRef>,
}

#[derive(Debug, Deserialize)]
struct AdoWorkItemRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AdoBatch {
    #[serde(default)]
    value: Vec<AdoWorkItem>,
}

#[derive(Debug, Deserialize)]
struct AdoWorkItem {
    id: u64,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    relations: Vec<AdoRelation>,
}

#[derive(Debug, Deserialize)]
struct AdoRelation {
    rel: String,
    url: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

impl AdoWorkItem {
    fn text(&self, field: &str) -> &str {
        self.fields.get(field).and_then(Value::as_str).unwrap_or_default()
    }
}

/// Fields common to test cases and shared steps after conversion.
struct ConvertedItem {
    name: String,
    description: String,
    state: StateType,
    priority: PriorityType,
    section_id: Uuid,
    steps: Vec<RawStep<String>>,
    tags: Vec<String>,
    links: Vec<Link>,
    attachments: Vec<String>,
}

/// Exporter for Azure DevOps projects.
pub struct AzureDevOpsExporter {
    client: VendorClient,
    config: AzureDevOpsConfig,
    progress: Progress,
}

impl AzureDevOpsExporter {
    /// Create a new Azure DevOps exporter.
    pub fn new(config: AzureDevOpsConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ExportError::InvalidConfig(format!("azure-devops: {e}")))?;

        // Personal access tokens go in the password of basic auth.
        let auth = Auth::Basic {
            username: String::new(),
            password: config.token.clone(),
        };
        let client = VendorClient::new(&config.url, auth, "Azure DevOps")?;

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

    async fn find_project(&self) -> Result<AdoProject> {
        let url = project_url(self.client.base_url(), &self.config.project_name)?;
        match self.client.get_json(&url).await {
            Err(ExportError::NotFound(_)) => Err(ExportError::ProjectNotFound(self.config.project_name.clone())),
            other => other,
        }
    }

    async fn query_ids(&self, project: &AdoProject, work_item_type: &str) -> Result<Vec<u64>> {
        let query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = @project \
             AND [System.WorkItemType] = '{work_item_type}' ORDER BY [System.Id]"
        );
        let result: AdoWiqlResult = self
            .client
            .post_json(
                &format!("{}/_apis/wit/wiql?{API_VERSION}", project.id),
                &json!({ "query": query }),
            )
            .await?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }

    async fn fetch_work_items(&self, project: &AdoProject, ids: &[u64]) -> Result<Vec<AdoWorkItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let batch: AdoBatch = self
                .client
                .post_json(
                    &format!("{}/_apis/wit/workitemsbatch?{API_VERSION}", project.id),
                    &json!({ "ids": chunk, "$expand": "Relations" }),
                )
                .await?;
            debug!(requested = chunk.len(), received = batch.value.len(), "Fetched work item batch");
            items.extend(batch.value);
        }
        Ok(items)
    }

    /// Convert the fields shared by test cases and shared steps, storing
    /// attached files under `entity`.
    async fn convert_item(
        &self,
        session: &mut ExportSession,
        item: &AdoWorkItem,
        entity: Uuid,
        options: &ExportOptions,
    ) -> Result<ConvertedItem> {
        let area_path: Vec<&str> = item
            .text(FIELD_AREA_PATH)
            .split('\\')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let section_id = if area_path.len() > 1 {
            session.sections.ensure_path(&area_path[1..])
        } else {
            session.sections.ensure_root(DEFAULT_SECTION_NAME)
        };

        let steps_xml = item.text(FIELD_STEPS);
        let mut steps = if steps_xml.trim().is_empty() {
            Vec::new()
        } else {
            parse_steps(steps_xml).map_err(|e| ExportError::payload(format!("work item {} steps", item.id), e))?
        };

        let mut converted = ConvertedItem {
            name: item.text(FIELD_TITLE).trim().to_string(),
            description: item.text(FIELD_DESCRIPTION).to_string(),
            state: map_state(item.text(FIELD_STATE)),
            priority: item
                .fields
                .get(FIELD_PRIORITY)
                .and_then(Value::as_u64)
                .map(map_priority)
                .unwrap_or_default(),
            section_id,
            steps: Vec::new(),
            tags: parse_tags(item.text(FIELD_TAGS)),
            links: Vec::new(),
            attachments: Vec::new(),
        };

        let mut linker = AttachmentLinker::case_insensitive();
        for relation in &item.relations {
            match relation.rel.as_str() {
                "Hyperlink" => {
                    let mut link = Link::new(&relation.url, LinkType::Related);
                    if let Some(comment) = relation.attributes.get("comment").and_then(Value::as_str) {
                        link.description = Some(comment.to_string());
                    }
                    converted.links.push(link);
                }
                "AttachedFile" if options.download_attachments => {
                    let guid = relation
                        .url
                        .split('?')
                        .next()
                        .and_then(|u| u.rsplit('/').next())
                        .unwrap_or_default()
                        .to_string();
                    let name = relation
                        .attributes
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| guid.clone());
                    let result = match self.client.get_bytes(&relation.url).await {
                        Ok(data) => session.save_attachment(entity, &name, &data),
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(stored) => {
                            linker.insert(guid.as_str(), stored.clone());
                            converted.attachments.push(stored);
                        }
                        Err(e) => session.warn(format!("Attachment {name} of work item {} skipped: {e}", item.id)),
                    }
                }
                _ => {}
            }
        }

        let (description, _) = linker.relink(&converted.description, &ATTACHMENT_IMAGE);
        converted.description = description;
        for step in steps.iter_mut() {
            if let RawStep::Step(step) = step {
                linker.relink_step(step, &ATTACHMENT_IMAGE);
            }
        }
        let unresolved: usize = steps
            .iter()
            .filter_map(|s| match s {
                RawStep::Step(step) => Some(step),
                RawStep::Call(_) => None,
            })
            .map(|s| find_references(&format!("{}{}{}", s.action, s.expected, s.test_data), &ATTACHMENT_IMAGE).len())
            .sum();
        if unresolved > 0 && options.download_attachments {
            session.warn(format!(
                "Work item {} has {unresolved} inline images without an attached file",
                item.id
            ));
        }

        converted.steps = steps;
        Ok(converted)
    }

    async fn export_shared_steps(
        &self,
        project: &AdoProject,
        session: &mut ExportSession,
        options: &ExportOptions,
    ) -> Result<usize> {
        let ids = self.query_ids(project, "Shared Steps").await?;
        let items = self.fetch_work_items(project, &ids).await?;
        let mut count = 0;

        for item in items {
            let key = item.id.to_string();
            let id = session.shared_steps.request(&key);
            match self.convert_item(session, &item, id, options).await {
                Ok(converted) => {
                    let mut definition =
                        SharedStepDefinition::new(key, converted.name, converted.section_id);
                    definition.description = converted.description;
                    definition.state = converted.state;
                    definition.priority = converted.priority;
                    definition.steps = converted.steps;
                    definition.tags = converted.tags;
                    definition.links = converted.links;
                    definition.attachments = converted.attachments;
                    session.shared_steps.define(definition);
                    count += 1;
                }
                Err(e) => {
                    warn!("Failed to convert shared steps {key}: {e}");
                    session.shared_steps.mark_unavailable(&key, e.to_string());
                }
            }
        }
        Ok(count)
    }

    async fn export_case(&self, session: &mut ExportSession, item: &AdoWorkItem, options: &ExportOptions) -> Result<()> {
        let id = session.test_case_id(&item.id.to_string());
        let converted = self.convert_item(session, item, id, options).await?;

        let mut test_case = TestCase::new(id, converted.name, converted.section_id);
        test_case.description = converted.description;
        test_case.state = converted.state;
        test_case.priority = converted.priority;
        test_case.tags = converted.tags;
        test_case.links = converted.links;
        test_case.attachments = converted.attachments;
        test_case.steps = session.shared_steps.convert_steps(converted.steps);

        let data_source = item.text(FIELD_DATA_SOURCE).trim();
        if data_source.starts_with('<') {
            match parse_data_source(data_source) {
                Ok(iterations) => test_case.iterations = iterations,
                Err(e) => session.warn(format!("Parameters of work item {} skipped: {e}", item.id)),
            }
        } else if !data_source.is_empty() {
            session.warn(format!(
                "Work item {} uses shared parameters, which are not exported",
                item.id
            ));
        }

        session.save_test_case(&test_case)
    }
}

#[async_trait]
impl Exporter for AzureDevOpsExporter {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::AzureDevOps
    }

    async fn export(&self, writer: ExportWriter, options: &ExportOptions) -> Result<ExportReport> {
        info!("Starting Azure DevOps export for {}", self.config.project_name);
        self.progress.set_phase(ExportPhase::Connecting, 1);

        let project = self.find_project().await?;
        let mut session = ExportSession::new(writer, SourcePlatform::AzureDevOps, &project.id);

        // Step 1: Shared steps, so test cases can reference them
        self.progress.set_phase(ExportPhase::ExportingSharedSteps, 1);
        match self.export_shared_steps(&project, &mut session, options).await {
            Ok(count) => info!("Converted {count} shared steps"),
            Err(e) => {
                session.report.add_error("shared_steps", &e.to_string(), false);
                warn!("Failed to export shared steps: {e}");
            }
        }

        // Step 2: Test cases
        let ids = self.query_ids(&project, "Test Case").await?;
        self.progress.set_phase(ExportPhase::ExportingTestCases, ids.len() as u64);
        let items = self.fetch_work_items(&project, &ids).await?;
        for item in &items {
            let label = format!("{} {}", item.id, item.text(FIELD_TITLE));
            if let Err(e) = self.export_case(&mut session, item, options).await {
                session.report.add_error("test_cases", &format!("{label}: {e}"), false);
                warn!("Failed to export {label}: {e}");
            }
            self.progress.increment(Some(&label));
        }
        info!("Exported {} test cases", session.test_case_count());

        // Shared steps living in other projects cannot be fetched here.
        for key in session.shared_steps.missing() {
            session
                .shared_steps
                .mark_unavailable(&key, "shared steps work item not found in project");
        }

        self.progress.set_phase(ExportPhase::WritingRoot, 1);
        let report = session.finish(&project.name)?;
        self.progress.set_phase(ExportPhase::Complete, 1);

        Ok(report)
    }
}

/// Priority 1 is the most urgent.
fn map_priority(priority: u64) -> PriorityType {
    match priority {
        1 => PriorityType::Highest,
        2 => PriorityType::High,
        3 => PriorityType::Medium,
        _ => PriorityType::Low,
    }
}

fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Project lookup URL, the name percent-encoded as one path segment.
fn project_url(base_url: &str, project_name: &str) -> Result<String> {
    let mut url = Url::parse(base_url).map_err(|e| ExportError::InvalidConfig(format!("{base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ExportError::InvalidConfig(format!("{base_url} cannot be a base URL")))?
        .pop_if_empty()
        .extend(["_apis", "projects", project_name]);
    url.set_query(Some(API_VERSION));
    Ok(url.into())
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| {
            let raw = std::str::from_utf8(&a.value).ok()?;
            unescape(raw).ok().map(|v| v.into_owned())
        })
}

/// Text content is collected still escaped and unescaped once complete,
/// since entity references may arrive as separate events.
fn push_raw_text(buffer: &mut String, event: &Event<'_>) {
    match event {
        Event::Text(t) => buffer.push_str(&String::from_utf8_lossy(t)),
        Event::GeneralRef(r) => {
            buffer.push('&');
            buffer.push_str(&String::from_utf8_lossy(r));
            buffer.push(';');
        }
        Event::CData(c) => buffer.push_str(&escape(String::from_utf8_lossy(c).as_ref())),
        _ => {}
    }
}

fn finish_text(buffer: &str) -> String {
    unescape(buffer)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| buffer.trim().to_string())
}

/// Parses the steps document of a test case or shared steps work item.
///
/// Each `<step>` holds two `<parameterizedString>` children, action then
/// expected result. A `<compref ref="ID">` calls shared steps work item `ID`.
fn parse_steps(xml: &str) -> std::result::Result<Vec<RawStep<String>>, String> {
    let mut reader = Reader::from_str(xml);
    let mut steps = Vec::new();
    let mut strings: Vec<String> = Vec::new();
    let mut in_step = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"step" => {
                    in_step = true;
                    strings.clear();
                }
                b"parameterizedString" if in_step => current = Some(String::new()),
                b"compref" => {
                    if let Some(reference) = attribute(&e, "ref") {
                        steps.push(RawStep::Call(reference));
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"parameterizedString" if in_step => strings.push(String::new()),
                b"compref" => {
                    if let Some(reference) = attribute(&e, "ref") {
                        steps.push(RawStep::Call(reference));
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"parameterizedString" => {
                    if let Some(buffer) = current.take() {
                        strings.push(finish_text(&buffer));
                    }
                }
                b"step" if in_step => {
                    in_step = false;
                    let mut parts = strings.drain(..);
                    let action = parts.next().unwrap_or_default();
                    let expected = parts.next().unwrap_or_default();
                    let step = Step::new(action, expected);
                    if !step.is_empty() {
                        steps.push(RawStep::Step(step));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(event) => {
                if let Some(buffer) = current.as_mut() {
                    push_raw_text(buffer, &event);
                }
            }
            Err(e) => return Err(format!("XML parse error at {}: {e}", reader.buffer_position())),
        }
    }

    Ok(steps)
}

/// Parses a local data source: one row element per iteration under the
/// document root, one child element per parameter. The inline schema is
/// skipped.
fn parse_data_source(xml: &str) -> std::result::Result<Vec<Iteration>, String> {
    let mut reader = Reader::from_str(xml);
    let mut iterations = Vec::new();
    let mut depth = 0usize;
    let mut in_schema = false;
    let mut row: Option<Iteration> = None;
    let mut parameter: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match depth {
                    2 if name.starts_with("xs:") => in_schema = true,
                    2 => row = Some(Iteration::default()),
                    3 if row.is_some() => parameter = Some((name, String::new())),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 2 && row.is_some() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if let Some(row) = row.as_mut() {
                        row.parameters.push(Parameter { name, value: String::new() });
                    }
                }
            }
            Ok(Event::End(_)) => {
                match depth {
                    2 if in_schema => in_schema = false,
                    2 => {
                        if let Some(row) = row.take() {
                            iterations.push(row);
                        }
                    }
                    3 => {
                        if let (Some((name, raw)), Some(row)) = (parameter.take(), row.as_mut()) {
                            row.parameters.push(Parameter {
                                name,
                                value: finish_text(&raw),
                            });
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(event) => {
                if let Some((_, raw)) = parameter.as_mut() {
                    push_raw_text(raw, &event);
                }
            }
            Err(e) => return Err(format!("XML parse error at {}: {e}", reader.buffer_position())),
        }
    }

    Ok(iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS: &str = r#"<steps id="0" last="5">
        <step id="2" type="ActionStep">
            <parameterizedString isformatted="true">&lt;DIV&gt;Open &amp;amp; log in&lt;/DIV&gt;</parameterizedString>
            <parameterizedString isformatted="true">&lt;P&gt;Dashboard&lt;/P&gt;</parameterizedString>
            <description/>
        </step>
        <compref id="3" ref="118"/>
        <step id="5" type="ValidateStep">
            <parameterizedString isformatted="true">Check total</parameterizedString>
            <parameterizedString isformatted="true"/>
        </step>
    </steps>"#;

    #[test]
    fn test_parse_steps() {
        let steps = parse_steps(STEPS).unwrap();
        assert_eq!(steps.len(), 3);
        match &steps[0] {
            RawStep::Step(step) => {
                assert_eq!(step.action, "<DIV>Open &amp; log in</DIV>");
                assert_eq!(step.expected, "<P>Dashboard</P>");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(steps[1], RawStep::Call("118".to_string()));
        assert!(matches!(&steps[2], RawStep::Step(s) if s.action == "Check total" && s.expected.is_empty()));
    }

    #[test]
    fn test_parse_steps_rejects_broken_xml() {
        assert!(parse_steps("<steps><step></steps>").is_err());
    }

    #[test]
    fn test_parse_data_source() {
        let xml = r#"<NewDataSet>
            <xs:schema id="NewDataSet"><xs:element name="Table1"/></xs:schema>
            <Table1><user>alice</user><pass>a&amp;b</pass></Table1>
            <Table1><user>bob</user><pass/></Table1>
        </NewDataSet>"#;
        let iterations = parse_data_source(xml).unwrap();
        assert_eq!(iterations.len(), 2);
        assert_eq!(iterations[0].parameters[1].value, "a&b");
        assert_eq!(iterations[1].parameters.len(), 2);
        assert_eq!(iterations[1].parameters[1].value, "");
    }

    #[test]
    fn test_priority_and_tags() {
        assert_eq!(map_priority(1), PriorityType::Highest);
        assert_eq!(map_priority(4), PriorityType::Low);
        assert_eq!(parse_tags("smoke; ui ;"), vec!["smoke", "ui"]);
    }

    #[test]
    fn test_project_url_encodes_name() {
        assert_eq!(
            project_url("https://dev.azure.com/contoso", "Web #2? a/b").unwrap(),
            "https://dev.azure.com/contoso/_apis/projects/Web%20%232%3F%20a%2Fb?api-version=7.0"
        );
        assert_eq!(
            project_url("https://dev.azure.com/contoso/", "Shop").unwrap(),
            "https://dev.azure.com/contoso/_apis/projects/Shop?api-version=7.0"
        );
    }

    #[test]
    fn test_attachment_image_regex() {
        let html = r#"<img src="https://dev.azure.com/org/p/_apis/wit/attachments/0A1B2C3D-0000-0000-0000-000000000001?fileName=a.png" alt=x>"#;
        assert_eq!(
            find_references(html, &ATTACHMENT_IMAGE),
            vec!["0A1B2C3D-0000-0000-0000-000000000001"]
        );
    }
}
