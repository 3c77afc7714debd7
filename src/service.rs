//! Service layer API for versioned records
//!
//! The draft, publish, history and diff operations are implemented on
//! [`VersionService`] in their own modules; this module holds the plain record
//! operations and the role interrogators they share.
use super::config::EngineConfig;
use super::error::VersionError;
use super::record::{Record, RecordId, TimeStamp};
use super::registry::Registry;
use super::store::{Store, Tx, TxResult, abort};
use super::text_diff::{TextDiffer, TextFormat, WordDiffer};
use std::sync::Arc;
use tracing::debug;

pub struct VersionService {
    instance: Arc<sled::Db>,
    store: Store,
    pub(crate) registry: Registry,
    pub(crate) text_differ: Box<dyn TextDiffer>,
    pub(crate) text_format: TextFormat,
}

impl VersionService {
    pub fn new(instance: Arc<sled::Db>, registry: Registry) -> Result<Self, VersionError> {
        let store = Store::open(&instance)?;
        Ok(Self {
            instance,
            store,
            registry,
            text_differ: Box::new(WordDiffer),
            text_format: TextFormat::default(),
        })
    }

    /// Opens the database described by `config` and builds a service on it.
    pub fn from_config(config: &EngineConfig, registry: Registry) -> Result<Self, VersionError> {
        let instance = Arc::new(config.store.open()?);
        let mut service = Self::new(instance, registry)?;
        service.text_format = config.diff.text_format;
        Ok(service)
    }

    pub fn with_text_differ(mut self, differ: Box<dyn TextDiffer>) -> Self {
        self.text_differ = differ;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn transaction<T>(
        &self,
        f: impl Fn(&Tx<'_>) -> TxResult<T>,
    ) -> Result<T, VersionError> {
        self.store.transaction(&self.registry, f)
    }

    /// Stores a new record as given.
    pub fn create(&self, record: Record) -> Result<Record, VersionError> {
        self.transaction(|tx| tx.put(&record))?;
        debug!(record = %record.id, type_name = %record.type_name, "record created");
        Ok(record)
    }

    pub fn get(&self, id: RecordId) -> Result<Option<Record>, VersionError> {
        self.transaction(|tx| tx.get(id))
    }

    pub fn find(&self, id: RecordId) -> Result<Record, VersionError> {
        self.get(id)?.ok_or(VersionError::NotFound(id))
    }

    /// Persists changes to an existing record, refreshing `updated_at`.
    ///
    /// Returns `Ok(false)` without writing anything when the record is a
    /// previously-approved version and its type does not allow those to change.
    pub fn save(&self, record: &mut Record) -> Result<bool, VersionError> {
        let config = self.registry.config_for(record)?;
        let mut updated = record.clone();
        updated.updated_at = TimeStamp::new();

        // the stored role is checked in the same transaction as the write
        let saved = self.transaction(|tx| {
            let stored = tx.get(updated.id)?;
            let historic = updated.is_historic() || stored.as_ref().is_some_and(Record::is_historic);
            if historic && !config.allows_historic_edits() {
                return Ok(false);
            }
            tx.put(&updated)?;
            Ok(true)
        })?;

        if saved {
            *record = updated;
        } else {
            debug!(record = %record.id, "refusing to save previously-approved version");
        }
        Ok(saved)
    }

    /// Deletes a record, its association members and any drafts of it.
    pub fn delete(&self, id: RecordId) -> Result<bool, VersionError> {
        Ok(self.transaction(|tx| tx.delete(id))?.is_some())
    }

    /// Members of a has-many association, in insertion order.
    pub fn children(&self, parent: &Record, association: &str) -> Result<Vec<Record>, VersionError> {
        let assoc = self.registry.config_for(parent)?.association(association)?;
        self.transaction(|tx| tx.children(parent.id, assoc))
    }

    /// The member of a has-one association, if any.
    pub fn child(&self, parent: &Record, association: &str) -> Result<Option<Record>, VersionError> {
        Ok(self.children(parent, association)?.into_iter().next())
    }

    pub fn drafts_of(&self, approved: RecordId) -> Result<Vec<Record>, VersionError> {
        self.transaction(|tx| tx.drafts_of(approved))
    }

    pub fn all_of_type(&self, type_name: &str) -> Result<Vec<Record>, VersionError> {
        self.store.all_of_type(type_name)
    }

    pub fn flush(&self) -> Result<usize, VersionError> {
        Ok(self.instance.flush()?)
    }

    /// Whether the record is the draft of some approved record.
    pub fn is_draft(&self, record: &Record) -> Result<bool, VersionError> {
        self.registry.config_for(record)?.ensure_version_link()?;
        Ok(record.is_draft())
    }

    /// Whether the record is an approved record with a live draft.
    pub fn has_draft(&self, record: &Record) -> Result<bool, VersionError> {
        if self.is_draft(record)? {
            return Ok(false);
        }
        Ok(!self.drafts_of(record.id)?.is_empty())
    }

    /// Whether the record is an archived, previously-approved state of another.
    pub fn is_previous_version(&self, record: &Record) -> Result<bool, VersionError> {
        let config = self.registry.config_for(record)?;
        Ok(config.tracks_history_for(record)
            && !self.is_draft(record)?
            && record.current_approved_version_id.is_some())
    }

    /// The approved counterpart of a draft; any other record is returned as is.
    pub fn approved_version(&self, record: &Record) -> Result<Record, VersionError> {
        match record.approved_version_id {
            Some(approved) => self.find(approved),
            None => Ok(record.clone()),
        }
    }
}

/// Loads a record that must currently be approved.
pub(crate) fn fetch_approved(tx: &Tx<'_>, id: RecordId) -> TxResult<Record> {
    let record = tx.fetch(id)?;
    let role = record.role().map_err(abort)?;
    if role != crate::record::VersionRole::Approved {
        return Err(abort(VersionError::InvalidRole { record: id, role }));
    }
    Ok(record)
}
