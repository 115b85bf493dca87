//! Section tree.

use crate::test_case::Step;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node of the section tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub precondition_steps: Vec<Step>,
    #[serde(default)]
    pub postcondition_steps: Vec<Step>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Section {
    /// Creates a leaf section.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            precondition_steps: Vec::new(),
            postcondition_steps: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Depth-first, pre-order walk over this section and its descendants.
    pub fn walk(&self) -> SectionWalk<'_> {
        SectionWalk { stack: vec![self] }
    }

    /// Number of sections in this subtree, including itself.
    pub fn count(&self) -> usize {
        self.walk().count()
    }
}

/// Iterator returned by [`Section::walk`].
pub struct SectionWalk<'a> {
    stack: Vec<&'a Section>,
}

impl<'a> SectionWalk<'a> {
    pub(crate) fn over(roots: &'a [Section]) -> Self {
        Self {
            stack: roots.iter().rev().collect(),
        }
    }
}

impl<'a> Iterator for SectionWalk<'a> {
    type Item = &'a Section;

    fn next(&mut self) -> Option<Self::Item> {
        let section = self.stack.pop()?;
        self.stack.extend(section.sections.iter().rev());
        Some(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_walk_is_pre_order() {
        let mut root = Section::new(id(1), "root");
        let mut a = Section::new(id(2), "a");
        a.sections.push(Section::new(id(3), "a1"));
        root.sections.push(a);
        root.sections.push(Section::new(id(4), "b"));

        let names: Vec<&str> = root.walk().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["root", "a", "a1", "b"]);
        assert_eq!(root.count(), 4);
    }
}
