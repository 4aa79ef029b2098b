use thiserror::Error;

/// Failure of a reference-data lookup. Always scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("unknown legacy challenge type code {0}")]
    Type(i64),
    #[error("unknown legacy resource role code {0}")]
    Role(i64),
    #[error("no timeline template for legacy challenge type code {0}")]
    Timeline(i64),
}

/// Failure while processing a single entity. Recorded on the progress record,
/// never propagated out of the batch loop.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("legacy challenge {0} has no detail rows (deleted upstream?)")]
    MissingDetail(i64),
    #[error("malformed legacy data: {0}")]
    MalformedData(String),
    #[error("legacy source error: {0:#}")]
    Upstream(anyhow::Error),
    #[error("modernized store error: {0:#}")]
    Store(anyhow::Error),
}

impl EntityError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "lookup",
            Self::MissingDetail(_) => "missing_detail",
            Self::MalformedData(_) => "malformed_data",
            Self::Upstream(_) => "upstream",
            Self::Store(_) => "store",
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003StateCorrupt,
    E004ReferenceLoad,
    E005ProgressIo,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003StateCorrupt => "E003_STATE_CORRUPT",
            Self::E004ReferenceLoad => "E004_REFERENCE_LOAD",
            Self::E005ProgressIo => "E005_PROGRESS_IO",
        }
    }
}
