//! Zephyr Scale Cloud export implementation.

use crate::attachments::{find_references, AttachmentLinker};
use crate::attributes::{infer_type, map_priority, map_state};
use crate::error::{ExportError, Result};
use crate::exporter::{ExportSession, Exporter, SHARED_STEPS_SECTION};
use crate::http::{with_query, Auth, VendorClient};
use crate::progress::ExportPhase;
use crate::sections::{FlatSection, DEFAULT_SECTION_NAME};
use crate::shared_steps::{RawStep, SharedStepDefinition};
use crate::types::{ExportOptions, ExportReport, SourcePlatform, ZephyrScaleConfig};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tms_models::{ExportWriter, Link, LinkType, Progress, Step, TestCase};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Image tags in rich text; group 1 is the source URL.
static IMAGE_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]*?\ssrc="([^"]+)"[^>]*>"#).expect("Invalid regex"));

/// Zephyr Scale API response types
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: DeserializeOwned"))]
struct ZephyrPage<T> {
    #[serde(default)]
    values: Vec<T>,
    #[serde(default)]
    is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ZephyrProject {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrFolder {
    id: u64,
    parent_id: Option<u64>,
    name: String,
    #[serde(default)]
    index: i64,
}

#[derive(Debug, Deserialize)]
struct ZephyrNamed {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ZephyrRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrTestCase {
    key: String,
    name: String,
    #[serde(default)]
    objective: Option<String>,
    #[serde(default)]
    precondition: Option<String>,
    #[serde(default)]
    estimated_time: Option<u64>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: Option<ZephyrRef>,
    #[serde(default)]
    status: Option<ZephyrRef>,
    #[serde(default)]
    folder: Option<ZephyrRef>,
    #[serde(default)]
    custom_fields: serde_json::Map<String, Value>,
    #[serde(default)]
    links: Option<ZephyrLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrLinks {
    #[serde(default)]
    web_links: Vec<ZephyrWebLink>,
}

#[derive(Debug, Deserialize)]
struct ZephyrWebLink {
    url: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrTestStep {
    #[serde(default)]
    inline: Option<ZephyrInlineStep>,
    #[serde(default)]
    test_case: Option<ZephyrCallStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrInlineStep {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    test_data: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZephyrCallStep {
    test_case_key: String,
}

/// Lookups shared by every test case of a project.
#[derive(Default)]
struct ProjectLookups {
    statuses: HashMap<u64, String>,
    priorities: HashMap<u64, String>,
}

/// Exporter for Zephyr Scale Cloud projects.
pub struct ZephyrScaleExporter {
    client: VendorClient,
    config: ZephyrScaleConfig,
    progress: Progress,
}

impl ZephyrScaleExporter {
    /// Create a new Zephyr Scale exporter.
    pub fn new(config: ZephyrScaleConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ExportError::InvalidConfig(format!("zephyr-scale: {e}")))?;

        let client = VendorClient::new(&config.url, Auth::Bearer(config.token.clone()), "Zephyr Scale")?;

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

    async fn zephyr_get_paginated<T: DeserializeOwned>(&self, path: &str, page_size: u32) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut start_at = 0usize;

        loop {
            let url = with_query(&with_query(path, "maxResults", page_size), "startAt", start_at);
            let page: ZephyrPage<T> = self.client.get_json(&url).await?;

            let count = page.values.len();
            all_items.extend(page.values);

            if count == 0 || page.is_last.unwrap_or(count < page_size as usize) {
                break;
            }
            start_at += count;
        }

        Ok(all_items)
    }

    async fn fetch_named(&self, path: &str, page_size: u32) -> HashMap<u64, String> {
        match self.zephyr_get_paginated::<ZephyrNamed>(path, page_size).await {
            Ok(items) => items.into_iter().map(|n| (n.id, n.name)).collect(),
            Err(e) => {
                warn!("Failed to fetch {path}: {e}");
                HashMap::new()
            }
        }
    }

    async fn fetch_steps(&self, key: &str, page_size: u32) -> Result<Vec<RawStep<String>>> {
        let steps: Vec<ZephyrTestStep> = self
            .zephyr_get_paginated(&format!("/testcases/{key}/teststeps"), page_size)
            .await?;
        Ok(steps.into_iter().filter_map(convert_step).collect())
    }

    /// Download inline images of `text` into `entity` and return a linker for them.
    async fn store_images(
        &self,
        session: &mut ExportSession,
        entity: Uuid,
        text: &str,
        stored: &mut Vec<String>,
    ) -> AttachmentLinker {
        let mut linker = AttachmentLinker::new();
        let references = find_references(text, &IMAGE_SRC);

        for url in references {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                continue;
            }
            let name = file_name_from_url(&url);
            let result = match self.client.get_bytes(&url).await {
                Ok(data) => session.save_attachment(entity, &name, &data),
                Err(e) => Err(e),
            };
            match result {
                Ok(stored_name) => {
                    linker.insert(url, stored_name.clone());
                    stored.push(stored_name);
                }
                Err(e) => session.warn(format!("Inline image {url} skipped: {e}")),
            }
        }
        linker
    }

    async fn export_case(
        &self,
        session: &mut ExportSession,
        case: ZephyrTestCase,
        lookups: &ProjectLookups,
        options: &ExportOptions,
    ) -> Result<()> {
        let id = session.test_case_id(&case.key);
        let section_id = case
            .folder
            .as_ref()
            .and_then(|f| session.sections.id_for(&f.id.to_string()))
            .unwrap_or_else(|| session.sections.ensure_root(DEFAULT_SECTION_NAME));

        let mut test_case = TestCase::new(id, case.name.trim(), section_id);
        test_case.description = case.objective.clone().unwrap_or_default();
        test_case.duration = case.estimated_time.unwrap_or(0);
        test_case.tags = case.labels.clone();
        if let Some(name) = case.priority.as_ref().and_then(|p| lookups.priorities.get(&p.id)) {
            test_case.priority = map_priority(name);
        }
        if let Some(name) = case.status.as_ref().and_then(|s| lookups.statuses.get(&s.id)) {
            test_case.state = map_state(name);
        }
        if let Some(links) = &case.links {
            test_case.links = links.web_links.iter().map(web_link).collect();
        }

        let mut preconditions: Vec<Step> = case
            .precondition
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| vec![Step::new(p, "")])
            .unwrap_or_default();
        let mut raw_steps = self.fetch_steps(&case.key, options.page_size).await?;

        if options.download_attachments {
            let mut text = test_case.description.clone();
            for step in raw_steps.iter().filter_map(plain_step).chain(preconditions.iter()) {
                text.push_str(&step_text(step));
            }

            let mut stored = Vec::new();
            let linker = self.store_images(session, id, &text, &mut stored).await;
            test_case.attachments.extend(stored);

            let (description, _) = linker.relink(&test_case.description, &IMAGE_SRC);
            test_case.description = description;
            for step in raw_steps.iter_mut() {
                if let RawStep::Step(step) = step {
                    linker.relink_step(step, &IMAGE_SRC);
                }
            }
            for step in preconditions.iter_mut() {
                linker.relink_step(step, &IMAGE_SRC);
            }
        }

        test_case.precondition_steps = preconditions;
        test_case.steps = session.shared_steps.convert_steps(raw_steps);
        test_case.attributes = map_custom_fields(session, &case.custom_fields);

        session.save_test_case(&test_case)
    }

    /// Fetch called test cases as shared steps until every call is defined.
    async fn export_shared_steps(&self, session: &mut ExportSession, lookups: &ProjectLookups, options: &ExportOptions) -> usize {
        let mut count = 0;
        loop {
            let missing = session.shared_steps.missing();
            if missing.is_empty() {
                break;
            }
            for key in missing {
                match self.fetch_shared_step(session, &key, lookups, options).await {
                    Ok(definition) => {
                        session.shared_steps.define(definition);
                        count += 1;
                    }
                    Err(e) => {
                        warn!("Failed to fetch called test case {key}: {e}");
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
        session: &mut ExportSession,
        key: &str,
        lookups: &ProjectLookups,
        options: &ExportOptions,
    ) -> Result<SharedStepDefinition<String>> {
        let case: ZephyrTestCase = self.client.get_json(&format!("/testcases/{key}")).await?;
        let mut raw_steps = self.fetch_steps(key, options.page_size).await?;
        let id = session.shared_steps.request(&key.to_string());

        let section_id = case
            .folder
            .as_ref()
            .and_then(|f| session.sections.id_for(&f.id.to_string()))
            .unwrap_or_else(|| session.sections.ensure_root(SHARED_STEPS_SECTION));
        let mut definition = SharedStepDefinition::new(key.to_string(), case.name.trim(), section_id);
        definition.description = case.objective.clone().unwrap_or_default();
        definition.tags = case.labels.clone();
        if let Some(name) = case.priority.as_ref().and_then(|p| lookups.priorities.get(&p.id)) {
            definition.priority = map_priority(name);
        }
        if let Some(name) = case.status.as_ref().and_then(|s| lookups.statuses.get(&s.id)) {
            definition.state = map_state(name);
        }

        if options.download_attachments {
            let text: String = raw_steps.iter().filter_map(plain_step).map(step_text).collect();
            let mut stored = Vec::new();
            let linker = self.store_images(session, id, &text, &mut stored).await;
            definition.attachments = stored;
            for step in raw_steps.iter_mut() {
                if let RawStep::Step(step) = step {
                    linker.relink_step(step, &IMAGE_SRC);
                }
            }
        }

        definition.steps = raw_steps;
        definition.attributes = map_custom_fields(session, &case.custom_fields);
        debug!(%key, steps = definition.steps.len(), "Fetched called test case");
        Ok(definition)
    }
}

#[async_trait]
impl Exporter for ZephyrScaleExporter {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::ZephyrScale
    }

    async fn export(&self, writer: ExportWriter, options: &ExportOptions) -> Result<ExportReport> {
        let project_key = &self.config.project_key;
        info!("Starting Zephyr Scale export for {project_key}");
        self.progress.set_phase(ExportPhase::Connecting, 1);

        let project: ZephyrProject = match self.client.get_json(&format!("/projects/{project_key}")).await {
            Ok(project) => project,
            Err(ExportError::NotFound(_)) => return Err(ExportError::ProjectNotFound(project_key.clone())),
            Err(e) => return Err(e),
        };
        let mut session = ExportSession::new(writer, SourcePlatform::ZephyrScale, &project.key);

        // Step 1: Folders
        self.progress.set_phase(ExportPhase::FetchingSections, 1);
        match self
            .zephyr_get_paginated::<ZephyrFolder>(
                &format!("/folders?projectKey={}&folderType=TEST_CASE", project.key),
                options.page_size,
            )
            .await
        {
            Ok(folders) => {
                info!("Fetched {} folders", folders.len());
                let flat = folders
                    .into_iter()
                    .map(|f| {
                        FlatSection::new(f.id.to_string(), f.parent_id.map(|p| p.to_string()), f.name)
                            .with_order(f.index)
                    })
                    .collect();
                session.sections.add_flat(None, flat);
            }
            Err(e) => {
                session.report.add_error("sections", &e.to_string(), true);
                warn!("Failed to fetch folders: {e}");
            }
        }

        // Step 2: Statuses and priorities
        self.progress.set_phase(ExportPhase::FetchingAttributes, 1);
        let statuses_path = format!("/statuses?projectKey={}&statusType=TEST_CASE", project.key);
        let priorities_path = format!("/priorities?projectKey={}", project.key);
        let (statuses, priorities) = futures::join!(
            self.fetch_named(&statuses_path, options.page_size),
            self.fetch_named(&priorities_path, options.page_size),
        );
        let lookups = ProjectLookups { statuses, priorities };

        // Step 3: Test cases
        let cases: Vec<ZephyrTestCase> = self
            .zephyr_get_paginated(&format!("/testcases?projectKey={}", project.key), options.page_size)
            .await?;
        self.progress.set_phase(ExportPhase::ExportingTestCases, cases.len() as u64);
        for case in cases {
            let label = format!("{} {}", case.key, case.name);
            if let Err(e) = self.export_case(&mut session, case, &lookups, options).await {
                session.report.add_error("test_cases", &format!("{label}: {e}"), false);
                warn!("Failed to export {label}: {e}");
            }
            self.progress.increment(Some(&label));
        }
        info!("Exported {} test cases", session.test_case_count());

        // Step 4: Called test cases
        if !session.shared_steps.is_empty() {
            self.progress
                .set_phase(ExportPhase::ExportingSharedSteps, session.shared_steps.len() as u64);
            let count = self.export_shared_steps(&mut session, &lookups, options).await;
            info!("Fetched {count} called test cases as shared steps");
        }

        self.progress.set_phase(ExportPhase::WritingRoot, 1);
        let report = session.finish(&self.config.project_key)?;
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

fn step_text(step: &Step) -> String {
    format!("{}\n{}\n{}\n", step.action, step.expected, step.test_data)
}

fn convert_step(step: ZephyrTestStep) -> Option<RawStep<String>> {
    if let Some(call) = step.test_case {
        return Some(RawStep::Call(call.test_case_key));
    }
    let inline = step.inline?;
    let step = Step::new(
        inline.description.unwrap_or_default(),
        inline.expected_result.unwrap_or_default(),
    )
    .with_test_data(inline.test_data.unwrap_or_default());
    (!step.is_empty()).then_some(RawStep::Step(step))
}

fn web_link(link: &ZephyrWebLink) -> Link {
    let mut out = Link::new(&link.url, LinkType::Related);
    if let Some(description) = link.description.as_deref().filter(|d| !d.is_empty()) {
        out = out.with_title(description);
    }
    out
}

/// Custom fields are untyped in the API, so the first value seen decides the type.
fn map_custom_fields(
    session: &mut ExportSession,
    fields: &serde_json::Map<String, Value>,
) -> Vec<tms_models::CaseAttribute> {
    let mut out = Vec::new();
    for (name, value) in fields {
        if value.is_null() {
            continue;
        }
        let key = format!("cf:{name}");
        if !session.attributes.contains(&key) {
            session
                .attributes
                .register(&key, name, infer_type(value), false, Vec::new());
        }
        if let Some(mapped) = session.attributes.map_value(&key, value) {
            out.push(mapped);
        }
    }
    out
}

fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("image")
        .to_string()
}
