use thiserror::Error;

/// Fatal conditions of a pipeline run
///
/// Data-quality gaps (unpriced events, missing contacts) are never errors;
/// they travel in the returned reports.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load {stream}: {source:#}")]
    Load {
        stream: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to prepare export table '{table}': {source:#}")]
    ExportSetup {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to export batch {batch_index} into '{table}': {source:#}")]
    Export {
        table: String,
        batch_index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Every batch is committed; only the `export_runs` entry is missing
    #[error("exported into '{table}' but failed to record the run: {source:#}")]
    Audit {
        table: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn load(stream: &'static str, source: anyhow::Error) -> Self {
        PipelineError::Load { stream, source }
    }

    /// True for failures that happened before anything was written
    pub fn is_load(&self) -> bool {
        matches!(self, PipelineError::Load { .. })
    }

    pub fn is_export(&self) -> bool {
        matches!(
            self,
            PipelineError::Export { .. } | PipelineError::ExportSetup { .. }
        )
    }
}
