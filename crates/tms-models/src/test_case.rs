//! Test cases, shared steps and their building blocks.

use crate::attachment::placeholders_in;
use crate::attribute::CaseAttribute;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a test case or shared step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateType {
    #[default]
    NotReady,
    Ready,
    NeedsWork,
}

/// Priority of a test case or shared step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriorityType {
    Lowest,
    Low,
    #[default]
    Medium,
    High,
    Highest,
}

/// Kind of an external link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkType {
    #[default]
    Related,
    BlockedBy,
    Defect,
    Issue,
    Requirement,
    Repository,
}

/// An external link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
}

impl Link {
    /// Creates a link of the given type.
    pub fn new(url: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            link_type,
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A named parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// One row of parameter values a test case is run with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub parameters: Vec<Parameter>,
}

/// A single step.
///
/// When `shared_step_id` is set the step is a call to that shared step and
/// the text fields are informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub test_data: String,
    #[serde(default)]
    pub action_attachments: Vec<String>,
    #[serde(default)]
    pub expected_attachments: Vec<String>,
    #[serde(default)]
    pub test_data_attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_step_id: Option<Uuid>,
}

impl Step {
    /// Creates a plain action/expected step.
    pub fn new(action: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            expected: expected.into(),
            ..Default::default()
        }
    }

    /// Creates a call to a shared step.
    pub fn shared(shared_step_id: Uuid) -> Self {
        Self {
            shared_step_id: Some(shared_step_id),
            ..Default::default()
        }
    }

    /// Sets the test data.
    pub fn with_test_data(mut self, test_data: impl Into<String>) -> Self {
        self.test_data = test_data.into();
        self
    }

    /// Whether every text field is blank and no shared step is called.
    pub fn is_empty(&self) -> bool {
        self.shared_step_id.is_none()
            && self.action.trim().is_empty()
            && self.expected.trim().is_empty()
            && self.test_data.trim().is_empty()
    }

    /// All attachment names this step lists or references inline.
    pub fn all_attachments(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let listed = self
            .action_attachments
            .iter()
            .chain(&self.expected_attachments)
            .chain(&self.test_data_attachments)
            .cloned();
        let inline = [&self.action, &self.expected, &self.test_data]
            .into_iter()
            .flat_map(|text| placeholders_in(text));
        for name in listed.chain(inline) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// A test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: StateType,
    #[serde(default)]
    pub priority: PriorityType,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub precondition_steps: Vec<Step>,
    #[serde(default)]
    pub postcondition_steps: Vec<Step>,
    /// Expected duration in milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub attributes: Vec<CaseAttribute>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub iterations: Vec<Iteration>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub section_id: Uuid,
}

impl TestCase {
    /// Creates an empty test case in a section.
    pub fn new(id: Uuid, name: impl Into<String>, section_id: Uuid) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            state: StateType::default(),
            priority: PriorityType::default(),
            steps: Vec::new(),
            precondition_steps: Vec::new(),
            postcondition_steps: Vec::new(),
            duration: 0,
            attributes: Vec::new(),
            tags: Vec::new(),
            attachments: Vec::new(),
            iterations: Vec::new(),
            links: Vec::new(),
            section_id,
        }
    }

    /// Iterates over preconditions, steps and postconditions.
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.precondition_steps
            .iter()
            .chain(&self.steps)
            .chain(&self.postcondition_steps)
    }

    /// Attachment names referenced by the description or any step.
    pub fn referenced_attachments(&self) -> Vec<String> {
        collect_references(&self.description, self.all_steps())
    }
}

/// A reusable block of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedStep {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: StateType,
    #[serde(default)]
    pub priority: PriorityType,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub attributes: Vec<CaseAttribute>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub section_id: Uuid,
}

impl SharedStep {
    /// Creates an empty shared step in a section.
    pub fn new(id: Uuid, name: impl Into<String>, section_id: Uuid) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            state: StateType::default(),
            priority: PriorityType::default(),
            steps: Vec::new(),
            attributes: Vec::new(),
            links: Vec::new(),
            tags: Vec::new(),
            attachments: Vec::new(),
            section_id,
        }
    }

    /// Attachment names referenced by the description or any step.
    pub fn referenced_attachments(&self) -> Vec<String> {
        collect_references(&self.description, self.steps.iter())
    }
}

fn collect_references<'a>(description: &str, steps: impl Iterator<Item = &'a Step>) -> Vec<String> {
    let mut names = placeholders_in(description);
    for step in steps {
        for name in step.all_attachments() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_serializes_camel_case() {
        let step = Step::new("Click", "Opened").with_test_data("user=a");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["testData"], "user=a");
        assert!(json.get("sharedStepId").is_none());
        assert!(json["actionAttachments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_step_is_empty() {
        assert!(Step::new("  ", "").is_empty());
        assert!(!Step::shared(Uuid::nil()).is_empty());
        assert!(!Step::new("do", "").is_empty());
    }

    #[test]
    fn test_all_attachments_merges_lists_and_placeholders() {
        let mut step = Step::new("See <<<a.png>>>", "Matches <<<b.png>>>");
        step.action_attachments.push("a.png".to_string());
        step.test_data_attachments.push("data.csv".to_string());
        assert_eq!(step.all_attachments(), vec!["a.png", "data.csv", "b.png"]);
    }

    #[test]
    fn test_test_case_referenced_attachments() {
        let mut case = TestCase::new(Uuid::nil(), "Login", Uuid::nil());
        case.description = "Layout: <<<layout.png>>>".to_string();
        case.precondition_steps.push(Step::new("Prepare <<<seed.sql>>>", ""));
        case.steps.push(Step::new("Open <<<layout.png>>>", ""));
        assert_eq!(case.referenced_attachments(), vec!["layout.png", "seed.sql"]);
    }

    #[test]
    fn test_enums_serialize_by_variant_name() {
        assert_eq!(serde_json::to_string(&StateType::NeedsWork).unwrap(), "\"NeedsWork\"");
        assert_eq!(serde_json::to_string(&PriorityType::Highest).unwrap(), "\"Highest\"");
        let link: Link = serde_json::from_str("{\"url\":\"https://x\"}").unwrap();
        assert_eq!(link.link_type, LinkType::Related);
    }
}
