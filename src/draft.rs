//! Locating and creating the editable version of an approved record
use super::duplicate::{CloneMode, copy_members, copy_root};
use super::error::VersionError;
use super::record::{Record, RecordId, Value};
use super::service::{VersionService, fetch_approved};
use super::store::{Tx, TxResult, abort, wrap_abort};
use tracing::{debug, info};

impl VersionService {
    /// The version of `record` that edits should be made to.
    ///
    /// Types that do not require approval are edited in place, so the approved
    /// record is returned. A draft is its own editable version. Otherwise the
    /// approved record's draft is returned, created on first use.
    pub fn editable_version(&self, record: &Record) -> Result<Record, VersionError> {
        let config = self.registry.config_for(record)?;
        let approved = self.approved_version(record)?;
        if !config.requires_approval_for(&approved) {
            return Ok(approved);
        }
        if record.is_draft() {
            return Ok(record.clone());
        }
        self.get_or_create_draft(approved.id)
    }

    /// Returns the existing draft of an approved record or creates one.
    ///
    /// Lookup and creation share a transaction, so callers going through this
    /// method never create a second draft for the same record.
    pub fn get_or_create_draft(&self, approved: RecordId) -> Result<Record, VersionError> {
        let (draft, created) = self.transaction(|tx| {
            let approved = fetch_approved(tx, approved)?;
            let config = tx.registry().config_for(&approved).map_err(abort)?;
            if !config.requires_approval_for(&approved) {
                return Ok((approved, false));
            }
            match tx.drafts_of(approved.id)?.into_iter().next() {
                Some(draft) => Ok((draft, false)),
                None => Ok((create_draft_in(tx, &approved)?, true)),
            }
        })?;

        if created {
            info!(%approved, draft = %draft.id, "draft created");
        } else {
            debug!(%approved, draft = %draft.id, "reusing existing draft");
        }
        Ok(draft)
    }

    /// Creates a new draft without looking for an existing one.
    ///
    /// Two callers doing this for the same record end up with two drafts; the
    /// next publish collapses them.
    pub fn create_draft(&self, approved: RecordId) -> Result<Record, VersionError> {
        let draft = self.transaction(|tx| {
            let approved = fetch_approved(tx, approved)?;
            create_draft_in(tx, &approved)
        })?;
        info!(%approved, draft = %draft.id, "draft created");
        Ok(draft)
    }
}

pub(crate) fn create_draft_in(tx: &Tx<'_>, approved: &Record) -> TxResult<Record> {
    let config = tx.registry().config_for(approved).map_err(abort)?;
    config.ensure_version_link().map_err(abort)?;

    build_draft(tx, approved).map_err(|err| {
        wrap_abort(err, |source| VersionError::DraftCreation {
            approved: approved.id,
            source: Box::new(source),
        })
    })
}

fn build_draft(tx: &Tx<'_>, approved: &Record) -> TxResult<Record> {
    let config = tx.registry().config_for(approved).map_err(abort)?;

    let mut draft = copy_root(config, approved, CloneMode::Draft);
    for name in config.nullified_attributes() {
        draft.attributes.insert(name.clone(), Value::Null);
    }
    tx.put(&draft)?;
    copy_members(tx, approved, draft.id, CloneMode::Draft)?;

    let draft_id = draft.id;
    config
        .version_policy()
        .after_create_draft(&mut draft)
        .map_err(|err| abort(VersionError::hook("after_create_draft", draft_id, err)))?;
    tx.put(&draft)?;
    Ok(draft)
}
