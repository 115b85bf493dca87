//! TestRail export implementation.

use crate::attachments::{find_references, AttachmentLinker};
use crate::attributes::map_priority;
use crate::error::{ExportError, Result};
use crate::exporter::{ExportSession, Exporter, SHARED_STEPS_SECTION};
use crate::http::{Auth, VendorClient};
use crate::progress::ExportPhase;
use crate::sections::{FlatSection, DEFAULT_SECTION_NAME};
use crate::shared_steps::{RawStep, SharedStepDefinition};
use crate::types::{ExportOptions, ExportReport, SourcePlatform, TestRailConfig};

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tms_models::{AttributeType, ExportWriter, Link, LinkType, Progress, Step, TestCase};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Inline image markup; group 1 is the attachment id.
static INLINE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\(index\.php\?/attachments/get/([\w-]+)\)").expect("Invalid regex")
});

/// Case fields holding steps or preconditions, converted separately.
const STEP_FIELDS: &[&str] = &[
    "custom_preconds",
    "custom_steps",
    "custom_expected",
    "custom_steps_separated",
];

/// TestRail API response types
#[derive(Debug, Deserialize)]
struct TestRailProject {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TestRailSuite {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TestRailSection {
    id: u64,
    name: String,
    parent_id: Option<u64>,
    #[serde(default)]
    display_order: i64,
}

#[derive(Debug, Deserialize)]
struct TestRailCaseField {
    system_name: String,
    label: String,
    type_id: u8,
    #[serde(default)]
    configs: Vec<TestRailFieldConfig>,
    #[serde(default = "default_true")]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct TestRailFieldConfig {
    context: TestRailFieldContext,
    #[serde(default)]
    options: TestRailFieldOptions,
}

#[derive(Debug, Deserialize)]
struct TestRailFieldContext {
    #[serde(default)]
    is_global: bool,
    #[serde(default)]
    project_ids: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct TestRailFieldOptions {
    #[serde(default)]
    is_required: bool,
    #[serde(default)]
    items: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TestRailPriority {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TestRailCase {
    id: u64,
    title: String,
    section_id: Option<u64>,
    suite_id: Option<u64>,
    priority_id: Option<u64>,
    #[serde(default)]
    refs: Option<String>,
    #[serde(default)]
    estimate: Option<String>,
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TestRailSharedStep {
    id: u64,
    title: String,
    #[serde(default)]
    custom_steps_separated: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TestRailAttachment {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Field kinds, from TestRail's `type_id`.
const TYPE_CHECKBOX: u8 = 5;
const TYPE_DROPDOWN: u8 = 6;
const TYPE_USER: u8 = 7;
const TYPE_DATE: u8 = 8;
const TYPE_STEPS: u8 = 10;
const TYPE_STEP_RESULTS: u8 = 11;
const TYPE_MULTI_SELECT: u8 = 12;

/// A case field mapped onto an attribute.
struct FieldMapping {
    key: String,
    type_id: u8,
    labels: HashMap<String, String>,
}

impl FieldMapping {
    /// Dropdown values arrive as item ids; attributes carry labels.
    fn label_value(&self, raw: &Value) -> Value {
        let label = |v: &Value| {
            let id = match v {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return v.clone(),
            };
            self.labels.get(&id).cloned().map_or(v.clone(), Value::String)
        };
        match (self.type_id, raw) {
            (TYPE_DROPDOWN, _) => label(raw),
            (TYPE_MULTI_SELECT, Value::Array(items)) => Value::Array(items.iter().map(label).collect()),
            (TYPE_DATE, Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or_else(|_| raw.clone()),
            _ => raw.clone(),
        }
    }
}

/// Exporter for TestRail projects.
pub struct TestRailExporter {
    client: VendorClient,
    config: TestRailConfig,
    progress: Progress,
}

impl TestRailExporter {
    /// Create a new TestRail exporter.
    pub fn new(config: TestRailConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ExportError::InvalidConfig(format!("testrail: {e}")))?;

        let auth = Auth::Basic {
            username: config.login.clone(),
            password: config.password.clone(),
        };
        let client = VendorClient::new(&config.url, auth, "TestRail")?;

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

    fn api(path: &str) -> String {
        format!("index.php?/api/v2/{path}")
    }

    async fn testrail_get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.client.get_json(&Self::api(path)).await
    }

    /// Fetch every item of a listing. Newer versions wrap pages in an object
    /// with a `_links.next` cursor, older versions return a plain array.
    async fn testrail_get_all<T: DeserializeOwned>(&self, path: &str, field: &str) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut next = Some(Self::api(path));

        while let Some(url) = next.take() {
            let page: Value = self.client.get_json(&url).await?;
            let batch = match page {
                Value::Array(batch) => batch,
                Value::Object(mut map) => {
                    next = map
                        .get("_links")
                        .and_then(|links| links.get("next"))
                        .and_then(Value::as_str)
                        .map(|n| format!("index.php?{n}"));
                    match map.remove(field) {
                        Some(Value::Array(batch)) => batch,
                        _ => return Err(ExportError::payload(path, format!("missing `{field}` list"))),
                    }
                }
                _ => return Err(ExportError::payload(path, "expected a list")),
            };

            for item in batch {
                all_items.push(serde_json::from_value(item).map_err(|e| ExportError::payload(path, e))?);
            }
        }

        Ok(all_items)
    }

    async fn find_project(&self) -> Result<TestRailProject> {
        let projects: Vec<TestRailProject> = self.testrail_get_all("get_projects", "projects").await?;
        projects
            .into_iter()
            .find(|p| p.name == self.config.project_name)
            .ok_or_else(|| ExportError::ProjectNotFound(self.config.project_name.clone()))
    }

    async fn fetch_suites(&self, project: &TestRailProject) -> Result<Vec<TestRailSuite>> {
        let suites: Vec<TestRailSuite> = self
            .testrail_get_all(&format!("get_suites/{}", project.id), "suites")
            .await?;
        if self.config.suite_ids.is_empty() {
            return Ok(suites);
        }
        Ok(suites
            .into_iter()
            .filter(|s| self.config.suite_ids.contains(&s.id))
            .collect())
    }

    /// Suites become top-level sections holding their section trees.
    async fn fetch_sections(&self, project: &TestRailProject, suites: &[TestRailSuite]) -> Result<Vec<FlatSection>> {
        let mut flat = Vec::new();
        for (index, suite) in suites.iter().enumerate() {
            let suite_key = format!("suite:{}", suite.id);
            flat.push(FlatSection::new(&suite_key, None, &suite.name).with_order(index as i64));

            let sections: Vec<TestRailSection> = self
                .testrail_get_all(
                    &format!("get_sections/{}&suite_id={}", project.id, suite.id),
                    "sections",
                )
                .await?;
            debug!(suite = %suite.name, count = sections.len(), "Fetched sections");

            for section in sections {
                let parent = section
                    .parent_id
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| suite_key.clone());
                flat.push(
                    FlatSection::new(section.id.to_string(), Some(parent), section.name)
                        .with_order(section.display_order),
                );
            }
        }
        Ok(flat)
    }

    async fn register_fields(&self, project: &TestRailProject, session: &mut ExportSession) -> Result<Vec<FieldMapping>> {
        let fields: Vec<TestRailCaseField> = self.testrail_get("get_case_fields").await?;
        let mut mappings = Vec::new();

        for field in fields {
            if !field.is_active
                || matches!(field.type_id, TYPE_STEPS | TYPE_STEP_RESULTS)
                || STEP_FIELDS.contains(&field.system_name.as_str())
            {
                continue;
            }
            let Some(config) = field.configs.iter().find(|c| {
                c.context.is_global
                    || c.context
                        .project_ids
                        .as_ref()
                        .is_some_and(|ids| ids.contains(&project.id))
            }) else {
                continue;
            };

            let labels = config
                .options
                .items
                .as_deref()
                .map(parse_items)
                .unwrap_or_default();
            let attribute_type = match field.type_id {
                TYPE_CHECKBOX => AttributeType::Checkbox,
                TYPE_DROPDOWN => AttributeType::Options,
                TYPE_USER => AttributeType::User,
                TYPE_DATE => AttributeType::Datetime,
                TYPE_MULTI_SELECT => AttributeType::MultipleOptions,
                _ => AttributeType::String,
            };
            let options = match attribute_type {
                AttributeType::Options | AttributeType::MultipleOptions => {
                    let mut items: Vec<_> = labels.iter().collect();
                    items.sort_by_key(|(id, _)| id.parse::<i64>().unwrap_or(i64::MAX));
                    items.into_iter().map(|(_, label)| label.clone()).collect()
                }
                _ => Vec::new(),
            };

            session.attributes.register(
                &field.system_name,
                &field.label,
                attribute_type,
                config.options.is_required,
                options,
            );
            mappings.push(FieldMapping {
                key: field.system_name,
                type_id: field.type_id,
                labels,
            });
        }

        Ok(mappings)
    }

    /// Download every attachment id not stored yet for `entity`.
    async fn download_references(
        &self,
        session: &mut ExportSession,
        entity: Uuid,
        references: Vec<String>,
        linker: &mut AttachmentLinker,
        stored: &mut Vec<String>,
    ) {
        for reference in references {
            if linker.get(&reference).is_some() {
                continue;
            }
            let name = format!("attachment-{reference}");
            match self.download(session, entity, &reference, &name).await {
                Ok(stored_name) => {
                    linker.insert(reference, stored_name.clone());
                    stored.push(stored_name);
                }
                Err(e) => session.warn(format!("Inline attachment {reference} skipped: {e}")),
            }
        }
    }

    async fn download(&self, session: &mut ExportSession, entity: Uuid, id: &str, name: &str) -> Result<String> {
        let data = self
            .client
            .get_bytes(&Self::api(&format!("get_attachment/{id}")))
            .await?;
        session.save_attachment(entity, name, &data)
    }

    async fn export_case(
        &self,
        session: &mut ExportSession,
        case: TestRailCase,
        priorities: &HashMap<u64, String>,
        fields: &[FieldMapping],
        options: &ExportOptions,
    ) -> Result<()> {
        let id = session.test_case_id(&case.id.to_string());
        let section_id = case
            .section_id
            .and_then(|s| session.sections.id_for(&s.to_string()))
            .or_else(|| {
                case.suite_id
                    .and_then(|s| session.sections.id_for(&format!("suite:{s}")))
            })
            .unwrap_or_else(|| session.sections.ensure_root(DEFAULT_SECTION_NAME));

        let mut test_case = TestCase::new(id, case.title.trim(), section_id);
        if let Some(priority) = case.priority_id.and_then(|p| priorities.get(&p)) {
            test_case.priority = map_priority(priority);
        }
        if let Some(estimate) = case.estimate.as_deref().filter(|e| !e.trim().is_empty()) {
            match parse_estimate(estimate) {
                Some(duration) => test_case.duration = duration,
                None => session.warn(format!(
                    "Case C{}: estimate '{estimate}' not understood, duration left empty",
                    case.id
                )),
            }
        }
        test_case.links = case
            .refs
            .as_deref()
            .map(parse_refs)
            .unwrap_or_default();

        let mut raw_steps = steps_from_fields(&case.fields);
        let mut preconditions: Vec<Step> = case
            .fields
            .get("custom_preconds")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| vec![Step::new(s, "")])
            .unwrap_or_default();

        let mut linker = AttachmentLinker::new();
        if options.download_attachments {
            match self
                .testrail_get_all::<TestRailAttachment>(&format!("get_attachments_for_case/{}", case.id), "attachments")
                .await
            {
                Ok(attachments) => {
                    for attachment in attachments {
                        let reference = match &attachment.id {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        let name = attachment
                            .filename
                            .or(attachment.name)
                            .unwrap_or_else(|| format!("attachment-{reference}"));
                        match self.download(session, id, &reference, &name).await {
                            Ok(stored) => {
                                linker.insert(reference, stored.clone());
                                test_case.attachments.push(stored);
                            }
                            Err(e) => session.warn(format!("Attachment {name} of case C{} skipped: {e}", case.id)),
                        }
                    }
                }
                Err(e) => session.warn(format!("Attachments of case C{} not listed: {e}", case.id)),
            }

            let mut text = String::new();
            for step in raw_steps.iter().filter_map(plain_step).chain(preconditions.iter()) {
                text.push_str(&step.action);
                text.push_str(&step.expected);
                text.push_str(&step.test_data);
            }
            let references = find_references(&text, &INLINE_IMAGE);
            self.download_references(session, id, references, &mut linker, &mut test_case.attachments)
                .await;
        }

        for step in raw_steps.iter_mut() {
            if let RawStep::Step(step) = step {
                linker.relink_step(step, &INLINE_IMAGE);
            }
        }
        for step in preconditions.iter_mut() {
            linker.relink_step(step, &INLINE_IMAGE);
        }
        test_case.precondition_steps = preconditions;
        test_case.steps = session.shared_steps.convert_steps(raw_steps);

        for field in fields {
            if let Some(raw) = case.fields.get(&field.key) {
                if let Some(value) = session.attributes.map_value(&field.key, &field.label_value(raw)) {
                    test_case.attributes.push(value);
                }
            }
        }

        session.save_test_case(&test_case)
    }

    async fn export_shared_steps(&self, project: &TestRailProject, session: &mut ExportSession, options: &ExportOptions) -> Result<usize> {
        let shared: Vec<TestRailSharedStep> = self
            .testrail_get_all(&format!("get_shared_steps/{}", project.id), "shared_steps")
            .await?;
        let section = session.sections.ensure_root(SHARED_STEPS_SECTION);
        let mut count = 0;

        for block in shared {
            let key = block.id.to_string();
            let id = session.shared_steps.request(&key);
            let mut definition = SharedStepDefinition::new(key, block.title.trim(), section);
            let mut steps: Vec<Step> = block
                .custom_steps_separated
                .iter()
                .filter_map(|item| match separated_step(item) {
                    RawStep::Step(step) => Some(step),
                    RawStep::Call(_) => None,
                })
                .collect();

            let mut linker = AttachmentLinker::new();
            if options.download_attachments {
                let text: String = steps
                    .iter()
                    .map(|s| format!("{}{}{}", s.action, s.expected, s.test_data))
                    .collect();
                let references = find_references(&text, &INLINE_IMAGE);
                self.download_references(session, id, references, &mut linker, &mut definition.attachments)
                    .await;
            }
            for step in steps.iter_mut() {
                linker.relink_step(step, &INLINE_IMAGE);
            }

            definition.steps = steps.into_iter().map(RawStep::Step).collect();
            session.shared_steps.define(definition);
            count += 1;
        }

        for key in session.shared_steps.missing() {
            session
                .shared_steps
                .mark_unavailable(&key, "not returned by get_shared_steps");
        }
        Ok(count)
    }
}

#[async_trait]
impl Exporter for TestRailExporter {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::TestRail
    }

    async fn export(&self, writer: ExportWriter, options: &ExportOptions) -> Result<ExportReport> {
        info!("Starting TestRail export for {}", self.config.project_name);
        self.progress.set_phase(ExportPhase::Connecting, 1);

        let project = self.find_project().await?;
        let mut session = ExportSession::new(writer, SourcePlatform::TestRail, &project.id.to_string());

        // Step 1: Suites and sections
        self.progress.set_phase(ExportPhase::FetchingSections, 1);
        let suites = self.fetch_suites(&project).await?;
        match self.fetch_sections(&project, &suites).await {
            Ok(flat) => {
                info!("Fetched {} sections", flat.len());
                session.sections.add_flat(None, flat);
            }
            Err(e) => {
                session.report.add_error("sections", &e.to_string(), true);
                warn!("Failed to fetch sections: {e}");
            }
        }

        // Step 2: Case fields and priorities
        self.progress.set_phase(ExportPhase::FetchingAttributes, 1);
        let fields = match self.register_fields(&project, &mut session).await {
            Ok(fields) => {
                info!("Registered {} case fields", fields.len());
                fields
            }
            Err(e) => {
                session.report.add_error("attributes", &e.to_string(), false);
                warn!("Failed to fetch case fields: {e}");
                Vec::new()
            }
        };
        let priorities: HashMap<u64, String> =
            match self.testrail_get::<Vec<TestRailPriority>>("get_priorities").await {
                Ok(list) => list.into_iter().map(|p| (p.id, p.name)).collect(),
                Err(e) => {
                    session.warn(format!("Priorities unavailable: {e}"));
                    HashMap::new()
                }
            };

        // Step 3: Test cases
        for suite in &suites {
            let cases: Vec<TestRailCase> = match self
                .testrail_get_all(
                    &format!("get_cases/{}&suite_id={}", project.id, suite.id),
                    "cases",
                )
                .await
            {
                Ok(cases) => cases,
                Err(e) => {
                    session.report.add_error("test_cases", &format!("suite {}: {e}", suite.name), false);
                    warn!("Failed to fetch cases of suite {}: {e}", suite.name);
                    continue;
                }
            };

            self.progress.set_phase(ExportPhase::ExportingTestCases, cases.len() as u64);
            for case in cases {
                let label = format!("C{} {}", case.id, case.title);
                if let Err(e) = self.export_case(&mut session, case, &priorities, &fields, options).await {
                    session.report.add_error("test_cases", &format!("{label}: {e}"), false);
                    warn!("Failed to export {label}: {e}");
                }
                self.progress.increment(Some(&label));
            }
        }
        info!("Exported {} test cases", session.test_case_count());

        // Step 4: Shared steps
        if !session.shared_steps.is_empty() {
            self.progress.set_phase(ExportPhase::ExportingSharedSteps, 1);
            match self.export_shared_steps(&project, &mut session, options).await {
                Ok(count) => info!("Fetched {count} shared steps"),
                Err(e) => {
                    for key in session.shared_steps.missing() {
                        session.shared_steps.mark_unavailable(&key, e.to_string());
                    }
                    session.report.add_error("shared_steps", &e.to_string(), false);
                    warn!("Failed to fetch shared steps: {e}");
                }
            }
        }

        self.progress.set_phase(ExportPhase::WritingRoot, 1);
        let report = session.finish(&project.name)?;
        self.progress.set_phase(ExportPhase::Complete, 1);

        Ok(report)
    }
}

fn plain_step(step: &RawStep<String>) -> Option<&Step> {
    match step {
        RawStep::Step(step) => Some(step),
        RawStep::Call(_) => None,
    }
}

fn text_of(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn separated_step(item: &Value) -> RawStep<String> {
    if let Some(shared) = item.get("shared_step_id").and_then(Value::as_u64) {
        return RawStep::Call(shared.to_string());
    }
    RawStep::Step(
        Step::new(text_of(item, "content"), text_of(item, "expected"))
            .with_test_data(text_of(item, "additional_info")),
    )
}

/// Steps of a case, from the separated-steps template or the text template.
fn steps_from_fields(fields: &serde_json::Map<String, Value>) -> Vec<RawStep<String>> {
    if let Some(Value::Array(items)) = fields.get("custom_steps_separated") {
        return items
            .iter()
            .map(separated_step)
            .filter(|s| !matches!(s, RawStep::Step(step) if step.is_empty()))
            .collect();
    }
    let action = fields.get("custom_steps").and_then(Value::as_str).unwrap_or_default();
    let expected = fields.get("custom_expected").and_then(Value::as_str).unwrap_or_default();
    if action.trim().is_empty() && expected.trim().is_empty() {
        return Vec::new();
    }
    vec![RawStep::Step(Step::new(action, expected))]
}

/// Parses dropdown items, one `id, label` pair per line.
fn parse_items(items: &str) -> HashMap<String, String> {
    items
        .lines()
        .filter_map(|line| {
            let (id, label) = line.split_once(',')?;
            let label = label.trim();
            (!label.is_empty()).then(|| (id.trim().to_string(), label.to_string()))
        })
        .collect()
}

/// Parses an estimate such as `1h 30m` or `1h30m` into milliseconds.
///
/// Unknown units and values that do not fit in a `u64` yield `None`.
fn parse_estimate(estimate: &str) -> Option<u64> {
    let mut total = 0u64;
    for token in estimate.split_whitespace() {
        let mut rest = token;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit())?;
            if digits == 0 {
                return None;
            }
            let number: u64 = rest[..digits].parse().ok()?;
            let unit_len = rest[digits..]
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len() - digits);
            let seconds = match &rest[digits..digits + unit_len] {
                "s" => 1,
                "m" => 60,
                "h" => 3_600,
                "d" => 86_400,
                _ => return None,
            };
            total = total.checked_add(number.checked_mul(seconds)?)?;
            rest = &rest[digits + unit_len..];
        }
    }
    if total == 0 {
        return None;
    }
    total.checked_mul(1_000)
}

/// Comma separated references become requirement links.
fn parse_refs(refs: &str) -> Vec<Link> {
    refs.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| Link::new(r, LinkType::Requirement).with_title(r))
        .collect()
}
