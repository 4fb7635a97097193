//! Domain error taxonomy (spec §7). Every failure that can surface from a run
//! RPC is one of these kinds; the RPC layer turns them into a category-prefixed
//! string in the reply's `error` field rather than an RPC-level failure.

use thiserror::Error;

/// A step tag attached to `ReconcileFailure` so callers can tell
/// `namespace error` from `AWS role error` etc, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Namespace,
    IamRole,
    Credentials,
    PluginCache,
}

impl ReconcileStep {
    pub fn label(self) -> &'static str {
        match self {
            ReconcileStep::Namespace => "namespace error",
            ReconcileStep::IamRole => "AWS role error",
            ReconcileStep::Credentials => "AWS credentials error",
            ReconcileStep::PluginCache => "plugin cache error",
        }
    }
}

impl std::fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0} does not exist")]
    NotFound(String),

    #[error("{step}: {source}")]
    ReconcileFailure {
        step: ReconcileStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("job creation error: {0}")]
    BuildFailure(anyhow::Error),

    #[error("kubernetes job error: {0}")]
    SubmitFailure(anyhow::Error),

    #[error("job timed out after 15 minutes")]
    Timeout,

    /// Job reached a terminal `Failed` state. Harvested logs (if any) travel
    /// alongside this error rather than inside it; see `RunOutcome`.
    #[error("job execution failed")]
    EngineFailure,

    #[error("failed to stream log chunk: {0}")]
    StreamFailure(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutorError {
    pub fn reconcile(step: ReconcileStep, source: impl Into<anyhow::Error>) -> Self {
        ExecutorError::ReconcileFailure { step, source: source.into() }
    }

    /// Renders the message the way the RPC layer places it in a reply's
    /// `error` field, e.g. `"AWS role error: role already exists"`.
    pub fn to_reply_message(&self) -> String {
        match self {
            ExecutorError::ReconcileFailure { step, source } => format!("{}: {}", step.label(), source),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
