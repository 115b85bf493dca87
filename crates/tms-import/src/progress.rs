//! Import phases reported through [`tms_models::Progress`].

/// Import phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Connecting,
    ImportingAttributes,
    ImportingSections,
    ImportingSharedSteps,
    ImportingTestCases,
    Complete,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::ImportingAttributes => write!(f, "Importing attributes"),
            Self::ImportingSections => write!(f, "Importing sections"),
            Self::ImportingSharedSteps => write!(f, "Importing shared steps"),
            Self::ImportingTestCases => write!(f, "Importing test cases"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}
