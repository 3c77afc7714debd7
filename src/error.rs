use super::record::{RecordId, VersionRole};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum VersionError {
    #[error(
        "type `{0}` has no approved_version_id link, so its editable or approved versions cannot be accessed"
    )]
    ApprovedVersionLinkMissing(String),
    #[error("the editable version of {approved} failed to be created: {source}")]
    DraftCreation {
        approved: RecordId,
        source: Box<VersionError>,
    },
    #[error("could not create previously-approved version of {approved}: {source}")]
    HistoricVersionCreation {
        approved: RecordId,
        source: Box<VersionError>,
    },
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("record {0} is not a previously-approved version")]
    NotHistoric(RecordId),
    #[error("record {record} is a {role} version and cannot be used here")]
    InvalidRole { record: RecordId, role: VersionRole },
    #[error("record {0} is marked as both a draft and a previously-approved version")]
    ConflictingLinks(RecordId),
    #[error("type `{0}` is not registered")]
    UnknownType(String),
    #[error("type `{type_name}` has no association `{association}`")]
    UnknownAssociation {
        type_name: String,
        association: String,
    },
    #[error("invalid type configuration: {0}")]
    Configuration(String),
    #[error("`{hook}` hook failed for {record}: {source}")]
    Hook {
        hook: &'static str,
        record: RecordId,
        source: BoxError,
    },
    #[error("store error: {0}")]
    Store(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("invalid engine config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl VersionError {
    pub(crate) fn hook(hook: &'static str, record: RecordId, err: anyhow::Error) -> Self {
        VersionError::Hook {
            hook,
            record,
            source: err.into(),
        }
    }
}

impl From<sled::transaction::TransactionError<VersionError>> for VersionError {
    fn from(err: sled::transaction::TransactionError<VersionError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => VersionError::Store(err),
        }
    }
}
