//! The export index (`main.json`).

use crate::attribute::Attribute;
use crate::section::{Section, SectionWalk};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of an export: project, attribute definitions, section tree and the
/// ids of every exported test case and shared step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    pub project_name: String,
    /// Product the data was exported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub shared_steps: Vec<Uuid>,
    #[serde(default)]
    pub test_cases: Vec<Uuid>,
}

impl Root {
    /// Creates an empty root for a project.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            ..Default::default()
        }
    }

    /// Walks every section of the tree in pre-order.
    pub fn walk_sections(&self) -> SectionWalk<'_> {
        SectionWalk::over(&self.sections)
    }

    /// Ids of every section in the tree, in pre-order.
    pub fn section_ids(&self) -> Vec<Uuid> {
        self.walk_sections().map(|s| s.id).collect()
    }

    /// Finds a section anywhere in the tree.
    pub fn find_section(&self, id: Uuid) -> Option<&Section> {
        self.walk_sections().find(|s| s.id == id)
    }

    /// Finds an attribute definition.
    pub fn find_attribute(&self, id: Uuid) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.id == id)
    }
}
