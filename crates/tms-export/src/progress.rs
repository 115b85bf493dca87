//! Export phases reported through [`tms_models::Progress`].

/// Phases of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    /// Connecting and looking up the project.
    Connecting,
    /// Fetching folders, suites or area paths.
    FetchingSections,
    /// Fetching custom field definitions.
    FetchingAttributes,
    /// Converting test cases.
    ExportingTestCases,
    /// Fetching and converting shared steps.
    ExportingSharedSteps,
    /// Writing `main.json`.
    WritingRoot,
    /// Export complete.
    Complete,
}

impl std::fmt::Display for ExportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::FetchingSections => write!(f, "Fetching sections"),
            Self::FetchingAttributes => write!(f, "Fetching attributes"),
            Self::ExportingTestCases => write!(f, "Exporting test cases"),
            Self::ExportingSharedSteps => write!(f, "Exporting shared steps"),
            Self::WritingRoot => write!(f, "Writing project"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}
