//! Stable identifiers for exported entities.
//!
//! Every entity id in an export is derived from the vendor's own identifier,
//! so exporting the same project twice yields the same ids and re-imports can
//! be diffed entity by entity.

use uuid::Uuid;

/// Namespace for all derived ids.
pub const NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a5e_93d4_4b7e_8a1f_0c3d_5e7b_9a21);

/// Kind of entity an id is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A section (folder, suite, area path node).
    Section,
    /// A test case.
    TestCase,
    /// A shared step.
    SharedStep,
    /// A custom attribute definition.
    Attribute,
}

impl EntityKind {
    /// Short tag mixed into the derived id.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::TestCase => "testcase",
            Self::SharedStep => "sharedstep",
            Self::Attribute => "attribute",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Derives the id of a vendor object.
///
/// `scope` identifies the source project (usually `<platform>:<project>`),
/// `source_id` the object inside it.
pub fn stable_id(kind: EntityKind, scope: &str, source_id: &str) -> Uuid {
    let name = format!("{}:{scope}:{source_id}", kind.tag());
    Uuid::new_v5(&NAMESPACE, name.as_bytes())
}

/// Builds the scope string used by [`stable_id`].
pub fn scope(platform: &str, project: &str) -> String {
    format!("{}:{}", platform.to_lowercase(), project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = stable_id(EntityKind::TestCase, "testrail:1", "42");
        let b = stable_id(EntityKind::TestCase, "testrail:1", "42");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stable_id_depends_on_kind_and_scope() {
        let case = stable_id(EntityKind::TestCase, "testrail:1", "42");
        let section = stable_id(EntityKind::Section, "testrail:1", "42");
        let other_project = stable_id(EntityKind::TestCase, "testrail:2", "42");
        assert_ne!(case, section);
        assert_ne!(case, other_project);
    }

    #[test]
    fn test_scope_lowercases_platform() {
        assert_eq!(scope("TestRail", "P1"), "testrail:P1");
    }
}
