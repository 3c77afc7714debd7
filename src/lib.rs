pub mod config;
pub mod diff;
pub mod draft;
pub mod duplicate;
pub mod error;
pub mod history;
pub mod publish;
pub mod record;
pub mod registry;
pub mod service;
pub mod store;
pub mod text_diff;

pub use config::{DiffConfig, EngineConfig, StoreConfig};
pub use diff::{AttributeDiff, DiffNode, DiffOptions, EditableStatus, TypeInfo};
pub use error::VersionError;
pub use record::{Record, RecordId, TimeStamp, Value, VersionRole};
pub use registry::{Association, Cardinality, Registry, TypeConfig, VersionPolicy};
pub use service::VersionService;
pub use text_diff::{TextDiffer, TextFormat, WordDiffer};
