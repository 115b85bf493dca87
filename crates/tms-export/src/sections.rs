//! Section tree building.
//!
//! Vendors describe folders either as a flat list with parent pointers
//! (TestRail sections, Zephyr folders) or as paths (Azure DevOps area paths,
//! Allure custom fields). Both shapes end up in one [`SectionTree`].

use std::collections::HashMap;
use tms_models::{stable_id, EntityKind, Section};
use tracing::warn;
use uuid::Uuid;

/// Name of the section used when an entity has no usable location.
pub const DEFAULT_SECTION_NAME: &str = "Imported";

const PATH_SEPARATOR: char = '\u{1f}';

/// A vendor folder with a parent pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSection {
    pub source_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    /// Position among siblings.
    pub order: i64,
}

impl FlatSection {
    pub fn new(source_id: impl Into<String>, parent_id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            parent_id,
            name: name.into(),
            order: 0,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

#[derive(Debug)]
struct Node {
    id: Uuid,
    name: String,
    order: i64,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Section tree under construction.
#[derive(Debug)]
pub struct SectionTree {
    scope: String,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    by_source: HashMap<String, usize>,
    by_path: HashMap<String, usize>,
    next_order: i64,
    warnings: Vec<String>,
}

impl SectionTree {
    /// Create an empty tree; `scope` feeds the stable section ids.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            nodes: Vec::new(),
            roots: Vec::new(),
            by_source: HashMap::new(),
            by_path: HashMap::new(),
            next_order: 0,
            warnings: Vec::new(),
        }
    }

    /// Build a tree from a flat folder list.
    pub fn from_flat(scope: impl Into<String>, flat: Vec<FlatSection>) -> Self {
        let mut tree = Self::new(scope);
        tree.add_flat(None, flat);
        tree
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Problems found while building (orphans, cycles, duplicates).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Id of a section added through [`SectionTree::add_flat`].
    pub fn id_for(&self, source_id: &str) -> Option<Uuid> {
        self.by_source.get(source_id).map(|&idx| self.nodes[idx].id)
    }

    /// Add flat sections. Sections without a known parent go under `under`
    /// (a section already in the tree) or to the root level.
    ///
    /// Unknown parents and parent cycles do not fail the build: the affected
    /// section is attached at the top and a warning is recorded. Each section
    /// is placed exactly once.
    pub fn add_flat(&mut self, under: Option<Uuid>, flat: Vec<FlatSection>) {
        let under = under.and_then(|id| self.nodes.iter().position(|n| n.id == id));
        let start = self.nodes.len();
        let mut wanted_parent: Vec<(usize, Option<String>)> = Vec::new();

        for section in flat {
            if self.by_source.contains_key(&section.source_id) {
                self.warn(format!("Duplicate section {} ignored", section.source_id));
                continue;
            }
            let id = stable_id(
                EntityKind::Section,
                &self.scope,
                &format!("src:{}", section.source_id),
            );
            let idx = self.push_node(id, &section.name, section.order);
            self.by_source.insert(section.source_id.clone(), idx);
            wanted_parent.push((idx, section.parent_id.filter(|p| *p != section.source_id)));
        }

        for (idx, parent) in wanted_parent {
            let Some(parent) = parent else { continue };
            match self.by_source.get(&parent) {
                Some(&p) => self.nodes[idx].parent = Some(p),
                None => {
                    let name = self.nodes[idx].name.clone();
                    self.warn(format!(
                        "Section '{name}' has unknown parent {parent}; attached at top level"
                    ));
                }
            }
        }

        self.break_cycles(start);

        for idx in start..self.nodes.len() {
            match self.nodes[idx].parent {
                Some(p) => self.nodes[p].children.push(idx),
                None => match under {
                    Some(u) => {
                        self.nodes[idx].parent = Some(u);
                        self.nodes[u].children.push(idx);
                    }
                    None => self.roots.push(idx),
                },
            }
        }
    }

    /// Get or create a top-level section.
    pub fn ensure_root(&mut self, name: &str) -> Uuid {
        self.ensure_path(&[name])
    }

    /// Get or create the section at `segments`, creating missing ancestors.
    /// Blank segments are skipped; an empty path maps to the default section.
    pub fn ensure_path<S: AsRef<str>>(&mut self, segments: &[S]) -> Uuid {
        let mut clean = segments
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty());

        let first = clean.next().unwrap_or(DEFAULT_SECTION_NAME);
        let mut key = first.to_string();
        let mut idx = self.ensure_path_node(None, &key, first);
        for segment in clean {
            key.push(PATH_SEPARATOR);
            key.push_str(segment);
            idx = self.ensure_path_node(Some(idx), &key, segment);
        }
        self.nodes[idx].id
    }

    /// Node for the path `key`, created under `parent` when new.
    fn ensure_path_node(&mut self, parent: Option<usize>, key: &str, name: &str) -> usize {
        if let Some(&idx) = self.by_path.get(key) {
            return idx;
        }
        let id = stable_id(EntityKind::Section, &self.scope, &format!("path:{key}"));
        let order = self.next_order;
        self.next_order += 1;
        let idx = self.push_node(id, name, order);
        self.nodes[idx].parent = parent;
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        self.by_path.insert(key.to_string(), idx);
        idx
    }

    /// Materialize the tree; children are ordered by `order`, then name.
    pub fn into_sections(self) -> Vec<Section> {
        let mut roots = self.roots.clone();
        self.sort(&mut roots);
        roots.iter().map(|&idx| self.build(idx)).collect()
    }

    fn build(&self, idx: usize) -> Section {
        let node = &self.nodes[idx];
        let mut section = Section::new(node.id, node.name.clone());
        let mut children = node.children.clone();
        self.sort(&mut children);
        section.sections = children.iter().map(|&c| self.build(c)).collect();
        section
    }

    fn sort(&self, indices: &mut [usize]) {
        indices.sort_by(|&a, &b| {
            let (a, b) = (&self.nodes[a], &self.nodes[b]);
            a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name))
        });
    }

    fn push_node(&mut self, id: Uuid, name: &str, order: i64) -> usize {
        let name = if name.trim().is_empty() {
            DEFAULT_SECTION_NAME.to_string()
        } else {
            name.trim().to_string()
        };
        self.nodes.push(Node {
            id,
            name,
            order,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Walks parent chains of nodes added since `start`, cutting the first
    /// link that closes a loop.
    fn break_cycles(&mut self, start: usize) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Done; self.nodes.len()];
        for mark in marks.iter_mut().skip(start) {
            *mark = Mark::Unvisited;
        }

        for idx in start..self.nodes.len() {
            let mut path = Vec::new();
            let mut current = idx;
            loop {
                match marks[current] {
                    Mark::Done => break,
                    Mark::OnPath => {
                        let name = self.nodes[current].name.clone();
                        self.nodes[current].parent = None;
                        self.warn(format!(
                            "Section '{name}' is part of a parent cycle; attached at top level"
                        ));
                        break;
                    }
                    Mark::Unvisited => {
                        marks[current] = Mark::OnPath;
                        path.push(current);
                        match self.nodes[current].parent {
                            Some(parent) => current = parent,
                            None => break,
                        }
                    }
                }
            }
            for visited in path {
                marks[visited] = Mark::Done;
            }
        }
    }

    fn warn(&mut self, message: String) {
        warn!(scope = %self.scope, "{message}");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(id: &str, parent: Option<&str>, name: &str) -> FlatSection {
        FlatSection::new(id, parent.map(str::to_string), name)
    }

    fn names(sections: &[Section]) -> Vec<String> {
        sections.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_builds_nested_tree_in_order() {
        let tree = SectionTree::from_flat(
            "testrail:1",
            vec![
                flat("3", Some("1"), "Payment").with_order(2),
                flat("1", None, "Checkout"),
                flat("2", Some("1"), "Cart").with_order(1),
                flat("4", None, "Account"),
            ],
        );
        assert!(tree.warnings().is_empty());
        let sections = tree.into_sections();
        assert_eq!(names(&sections), vec!["Account", "Checkout"]);
        assert_eq!(names(&sections[1].sections), vec!["Cart", "Payment"]);
    }

    #[test]
    fn test_ids_are_stable_across_builds() {
        let a = SectionTree::from_flat("s", vec![flat("1", None, "A")]);
        let b = SectionTree::from_flat("s", vec![flat("1", None, "Renamed")]);
        assert_eq!(a.id_for("1"), b.id_for("1"));
        assert!(a.id_for("2").is_none());
    }

    #[test]
    fn test_orphan_attached_at_top_level() {
        let tree = SectionTree::from_flat("s", vec![flat("1", Some("missing"), "Lost")]);
        assert_eq!(tree.warnings().len(), 1);
        let sections = tree.into_sections();
        assert_eq!(names(&sections), vec!["Lost"]);
    }

    #[test]
    fn test_parent_cycle_is_broken() {
        let tree = SectionTree::from_flat(
            "s",
            vec![
                flat("1", Some("3"), "A"),
                flat("2", Some("1"), "B"),
                flat("3", Some("2"), "C"),
                flat("4", Some("4"), "Self"),
            ],
        );
        assert_eq!(tree.warnings().len(), 1);
        let sections = tree.into_sections();
        let total: usize = sections.iter().map(Section::count).sum();
        assert_eq!(total, 4);
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn test_flat_sections_under_existing_root() {
        let mut tree = SectionTree::new("s");
        let suite = tree.ensure_root("Suite 1");
        tree.add_flat(Some(suite), vec![flat("10", None, "Login"), flat("11", Some("10"), "SSO")]);
        let sections = tree.into_sections();
        assert_eq!(sections.len(), 1);
        assert_eq!(names(&sections[0].sections), vec!["Login"]);
        assert_eq!(names(&sections[0].sections[0].sections), vec!["SSO"]);
    }

    #[test]
    fn test_ensure_path_reuses_nodes() {
        let mut tree = SectionTree::new("s");
        let a = tree.ensure_path(&["Shop", "Checkout"]);
        let b = tree.ensure_path(&["Shop", " Checkout "]);
        let c = tree.ensure_path(&["Shop", "Account"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tree.len(), 3);

        let empty: [&str; 0] = [];
        let default = tree.ensure_path(&empty);
        assert_eq!(default, tree.ensure_root(DEFAULT_SECTION_NAME));

        let sections = tree.into_sections();
        assert_eq!(names(&sections), vec!["Shop", DEFAULT_SECTION_NAME]);
        assert_eq!(names(&sections[0].sections), vec!["Checkout", "Account"]);
    }

    #[test]
    fn test_ensure_path_skips_blank_segments() {
        let mut tree = SectionTree::new("s");
        let nested = tree.ensure_path(&["", "Shop", "  ", "Checkout"]);
        assert_eq!(nested, tree.ensure_path(&["Shop", "Checkout"]));
        assert_eq!(tree.ensure_path(&[" ", ""]), tree.ensure_root(DEFAULT_SECTION_NAME));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_duplicate_source_ids_ignored() {
        let tree = SectionTree::from_flat("s", vec![flat("1", None, "A"), flat("1", None, "B")]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.warnings().len(), 1);
    }
}
