//! Allure TestOps export implementation.

use crate::attributes::map_state;
use crate::error::{ExportError, Result};
use crate::exporter::{ExportSession, Exporter, SHARED_STEPS_SECTION};
use crate::http::{with_query, Auth, VendorClient};
use crate::progress::ExportPhase;
use crate::sections::DEFAULT_SECTION_NAME;
use crate::shared_steps::{RawStep, SharedStepDefinition};
use crate::types::{AllureConfig, ExportOptions, ExportReport, SourcePlatform};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tms_models::{
    placeholder, AttributeType, CaseAttribute, ExportWriter, Link, LinkType, Progress, Step,
    TestCase,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Allure TestOps API response types
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: DeserializeOwned"))]
struct AllurePage<T> {
    #[serde(default)]
    content: Vec<T>,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct AllureToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AllureProject {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AllureListedCase {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllureTestCase {
    id: u64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    precondition: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
    #[serde(default)]
    status: Option<AllureNamed>,
    #[serde(default)]
    tags: Vec<AllureNamed>,
    #[serde(default)]
    links: Vec<AllureLink>,
}

#[derive(Debug, Deserialize)]
struct AllureSharedStep {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AllureNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AllureLink {
    #[serde(default)]
    name: Option<String>,
    url: String,
    #[serde(default, rename = "type")]
    link_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllureAttachment {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllureCustomFieldValue {
    custom_field: AllureCustomField,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AllureCustomField {
    id: u64,
    name: String,
}

/// Normalized scenario: steps keyed by id, the root lists top-level ids.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllureScenario {
    #[serde(default)]
    root: Option<AllureScenarioStep>,
    #[serde(default)]
    scenario_steps: HashMap<String, AllureScenarioStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllureScenarioStep {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
    #[serde(default)]
    children: Vec<u64>,
    #[serde(default)]
    shared_step_id: Option<u64>,
    #[serde(default)]
    attachment_id: Option<u64>,
}

/// Which kind of entity an API call is about.
#[derive(Clone, Copy)]
enum Owner {
    TestCase,
    SharedStep,
}

impl Owner {
    fn resource(self) -> &'static str {
        match self {
            Self::TestCase => "testcase",
            Self::SharedStep => "sharedstep",
        }
    }

    fn id_param(self) -> &'static str {
        match self {
            Self::TestCase => "testCaseId",
            Self::SharedStep => "sharedStepId",
        }
    }
}

/// Exporter for Allure TestOps projects.
pub struct AllureExporter {
    config: AllureConfig,
    progress: Progress,
}

impl AllureExporter {
    /// Create a new Allure TestOps exporter.
    pub fn new(config: AllureConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ExportError::InvalidConfig(format!("allure: {e}")))?;

        Ok(Self {
            config,
            progress: Progress::new(),
        })
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Exchange the API token for a bearer token and return an authorized client.
    async fn connect(&self) -> Result<VendorClient> {
        let mut client = VendorClient::new(&self.config.url, Auth::None, "Allure TestOps")?;
        let token: AllureToken = client
            .post_form(
                "/api/uaa/oauth/token",
                &[
                    ("grant_type", "apitoken"),
                    ("scope", "openid"),
                    ("token", self.config.token.as_str()),
                ],
            )
            .await?;
        client.set_auth(Auth::Bearer(token.access_token));
        debug!("Exchanged API token for bearer token");
        Ok(client)
    }

    async fn allure_get_paginated<T: DeserializeOwned>(
        &self,
        client: &VendorClient,
        path: &str,
        page_size: u32,
    ) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 0u32;

        loop {
            let url = with_query(&with_query(path, "page", page), "size", page_size);
            let batch: AllurePage<T> = client.get_json(&url).await?;

            if batch.content.is_empty() {
                break;
            }
            all_items.extend(batch.content);

            page += 1;
            if page >= batch.total_pages {
                break;
            }
        }

        Ok(all_items)
    }

    async fn find_project(&self, client: &VendorClient, page_size: u32) -> Result<AllureProject> {
        let projects: Vec<AllureProject> = self
            .allure_get_paginated(client, "/api/rs/project", page_size)
            .await?;
        projects
            .into_iter()
            .find(|p| p.name == self.config.project_name)
            .ok_or_else(|| ExportError::ProjectNotFound(self.config.project_name.clone()))
    }

    /// Download the attachments of an entity; returns attachment id to stored name.
    async fn store_attachments(
        &self,
        client: &VendorClient,
        session: &mut ExportSession,
        owner: Owner,
        source_id: u64,
        entity: Uuid,
        stored: &mut Vec<String>,
    ) -> HashMap<u64, String> {
        let mut names = HashMap::new();
        let path = format!(
            "/api/rs/{}/attachment?{}={source_id}",
            owner.resource(),
            owner.id_param()
        );
        let attachments: Vec<AllureAttachment> = match self.allure_get_paginated(client, &path, 100).await {
            Ok(list) => list,
            Err(e) => {
                session.warn(format!("Attachments of {} {source_id} not listed: {e}", owner.resource()));
                return names;
            }
        };

        for attachment in attachments {
            let content = format!("/api/rs/{}/attachment/{}/content", owner.resource(), attachment.id);
            let result = match client.get_bytes(&content).await {
                Ok(data) => session.save_attachment(entity, &attachment.name, &data),
                Err(e) => Err(e),
            };
            match result {
                Ok(name) => {
                    names.insert(attachment.id, name.clone());
                    stored.push(name);
                }
                Err(e) => session.warn(format!("Attachment {} skipped: {e}", attachment.name)),
            }
        }
        names
    }

    async fn fetch_scenario(&self, client: &VendorClient, owner: Owner, source_id: u64) -> Result<AllureScenario> {
        client
            .get_json(&format!("/api/rs/{}/{source_id}/step", owner.resource()))
            .await
    }

    async fn export_case(
        &self,
        client: &VendorClient,
        session: &mut ExportSession,
        case_id: u64,
        options: &ExportOptions,
    ) -> Result<()> {
        let case: AllureTestCase = client.get_json(&format!("/api/rs/testcase/{case_id}")).await?;
        let id = session.test_case_id(&case.id.to_string());

        let values: Vec<AllureCustomFieldValue> = client
            .get_json(&format!("/api/rs/testcase/{case_id}/cfv"))
            .await
            .unwrap_or_else(|e| {
                warn!("Custom fields of test case {case_id} unavailable: {e}");
                Vec::new()
            });
        let segments = self.section_path(&values);
        let section_id = if segments.is_empty() {
            session.sections.ensure_root(DEFAULT_SECTION_NAME)
        } else {
            session.sections.ensure_path(&segments)
        };

        let mut test_case = TestCase::new(id, case.name.trim(), section_id);
        test_case.description = case.description.clone().unwrap_or_default();
        if let Some(status) = &case.status {
            test_case.state = map_state(&status.name);
        }
        test_case.tags = case.tags.iter().map(|t| t.name.clone()).collect();
        test_case.links = case.links.iter().map(convert_link).collect();
        if let Some(precondition) = case.precondition.as_deref().filter(|p| !p.trim().is_empty()) {
            test_case.precondition_steps.push(Step::new(precondition, ""));
        }
        test_case.attributes = self.map_custom_fields(session, &values);

        let names = if options.download_attachments {
            self.store_attachments(client, session, Owner::TestCase, case_id, id, &mut test_case.attachments)
                .await
        } else {
            HashMap::new()
        };

        let scenario = self.fetch_scenario(client, Owner::TestCase, case_id).await?;
        let mut raw_steps = flatten_scenario(&scenario, &names);
        if let Some(expected) = case.expected_result.as_deref().filter(|e| !e.trim().is_empty()) {
            match raw_steps.last_mut() {
                Some(RawStep::Step(last)) if last.expected.is_empty() => last.expected = expected.to_string(),
                _ => raw_steps.push(RawStep::Step(Step::new("", expected))),
            }
        }
        test_case.steps = session.shared_steps.convert_steps(raw_steps);

        session.save_test_case(&test_case)
    }

    /// Values of the configured section fields, outermost first.
    fn section_path(&self, values: &[AllureCustomFieldValue]) -> Vec<String> {
        self.config
            .section_fields
            .iter()
            .filter_map(|field| {
                values
                    .iter()
                    .find(|v| v.custom_field.name.eq_ignore_ascii_case(field))
                    .map(|v| v.name.trim().to_string())
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Custom fields other than section fields, all values of one field in one attribute.
    fn map_custom_fields(&self, session: &mut ExportSession, values: &[AllureCustomFieldValue]) -> Vec<CaseAttribute> {
        let mut grouped: Vec<(String, String, Vec<Value>)> = Vec::new();
        for value in values {
            let field = &value.custom_field;
            if self
                .config
                .section_fields
                .iter()
                .any(|f| f.eq_ignore_ascii_case(&field.name))
            {
                continue;
            }
            let key = format!("cf:{}", field.id);
            match grouped.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, _, list)) => list.push(Value::String(value.name.clone())),
                None => grouped.push((key, field.name.clone(), vec![Value::String(value.name.clone())])),
            }
        }

        grouped
            .into_iter()
            .filter_map(|(key, name, list)| {
                session
                    .attributes
                    .register(&key, &name, AttributeType::MultipleOptions, false, Vec::new());
                session.attributes.map_value(&key, &Value::Array(list))
            })
            .collect()
    }

    /// Fetch every referenced shared step until all calls are defined.
    async fn export_shared_steps(&self, client: &VendorClient, session: &mut ExportSession, options: &ExportOptions) -> usize {
        let section = session.sections.ensure_root(SHARED_STEPS_SECTION);
        let mut count = 0;

        loop {
            let missing = session.shared_steps.missing();
            if missing.is_empty() {
                break;
            }
            for key in missing {
                match self.fetch_shared_step(client, session, &key, section, options).await {
                    Ok(definition) => {
                        session.shared_steps.define(definition);
                        count += 1;
                    }
                    Err(e) => {
                        warn!("Failed to fetch shared step {key}: {e}");
                        session.shared_steps.mark_unavailable(&key, e.to_string());
                    }
                }
                self.progress.increment(Some(&key));
            }
        }
        count
    }

    async fn fetch_shared_step(
        &self,
        client: &VendorClient,
        session: &mut ExportSession,
        key: &str,
        section: Uuid,
        options: &ExportOptions,
    ) -> Result<SharedStepDefinition<String>> {
        let source_id: u64 = key
            .parse()
            .map_err(|_| ExportError::payload("shared step id", key))?;
        let shared: AllureSharedStep = client.get_json(&format!("/api/rs/sharedstep/{source_id}")).await?;
        let id = session.shared_steps.request(&key.to_string());

        let mut definition = SharedStepDefinition::new(key.to_string(), shared.name.trim(), section);
        let names = if options.download_attachments {
            self.store_attachments(client, session, Owner::SharedStep, shared.id, id, &mut definition.attachments)
                .await
        } else {
            HashMap::new()
        };
        let scenario = self.fetch_scenario(client, Owner::SharedStep, shared.id).await?;
        definition.steps = flatten_scenario(&scenario, &names);
        Ok(definition)
    }
}

#[async_trait]
impl Exporter for AllureExporter {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::AllureTestOps
    }

    async fn export(&self, writer: ExportWriter, options: &ExportOptions) -> Result<ExportReport> {
        info!("Starting Allure TestOps export for {}", self.config.project_name);
        self.progress.set_phase(ExportPhase::Connecting, 1);

        let client = self.connect().await?;
        let project = self.find_project(&client, options.page_size).await?;
        let mut session = ExportSession::new(writer, SourcePlatform::AllureTestOps, &project.id.to_string());

        // Step 1: Test cases
        let listed: Vec<AllureListedCase> = self
            .allure_get_paginated(
                &client,
                &format!("/api/rs/testcase?projectId={}", project.id),
                options.page_size,
            )
            .await?;
        self.progress.set_phase(ExportPhase::ExportingTestCases, listed.len() as u64);

        for case in listed {
            if let Err(e) = self.export_case(&client, &mut session, case.id, options).await {
                session
                    .report
                    .add_error("test_cases", &format!("test case {}: {e}", case.id), false);
                warn!("Failed to export test case {}: {e}", case.id);
            }
            self.progress.increment(Some(&case.id.to_string()));
        }
        info!("Exported {} test cases", session.test_case_count());

        // Step 2: Shared steps
        if !session.shared_steps.is_empty() {
            self.progress
                .set_phase(ExportPhase::ExportingSharedSteps, session.shared_steps.len() as u64);
            let count = self.export_shared_steps(&client, &mut session, options).await;
            info!("Fetched {count} shared steps");
        }

        self.progress.set_phase(ExportPhase::WritingRoot, 1);
        let report = session.finish(&project.name)?;
        self.progress.set_phase(ExportPhase::Complete, 1);

        Ok(report)
    }
}

fn convert_link(link: &AllureLink) -> Link {
    let link_type = match link.link_type.as_deref().map(str::to_lowercase).as_deref() {
        Some("issue") => LinkType::Issue,
        Some("defect") | Some("bug") => LinkType::Defect,
        Some("requirement") => LinkType::Requirement,
        _ => LinkType::Related,
    };
    let out = Link::new(&link.url, link_type);
    match link.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => out.with_title(name),
        None => out,
    }
}

/// Flattens a scenario tree depth first. Attachment steps become steps that
/// show the stored attachment; a step id seen twice is skipped.
fn flatten_scenario(scenario: &AllureScenario, attachments: &HashMap<u64, String>) -> Vec<RawStep<String>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    if let Some(root) = &scenario.root {
        walk_scenario(&root.children, scenario, attachments, &mut visited, &mut out);
    }
    out
}

fn walk_scenario(
    ids: &[u64],
    scenario: &AllureScenario,
    attachments: &HashMap<u64, String>,
    visited: &mut HashSet<u64>,
    out: &mut Vec<RawStep<String>>,
) {
    for &id in ids {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = scenario.scenario_steps.get(&id.to_string()) else {
            continue;
        };

        if let Some(shared) = node.shared_step_id {
            out.push(RawStep::Call(shared.to_string()));
            continue;
        }
        if let Some(attachment) = node.attachment_id {
            if let Some(name) = attachments.get(&attachment) {
                let mut step = Step::new(placeholder(name), "");
                step.action_attachments.push(name.clone());
                out.push(RawStep::Step(step));
            }
            continue;
        }

        let step = Step::new(
            node.body.clone().unwrap_or_default(),
            node.expected_result.clone().unwrap_or_default(),
        );
        if !step.is_empty() {
            out.push(RawStep::Step(step));
        }
        walk_scenario(&node.children, scenario, attachments, visited, out);
    }
}
