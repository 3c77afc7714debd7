//! Previously-approved versions of a record
use super::duplicate::{CloneMode, copy_member, copy_members, copy_root};
use super::error::VersionError;
use super::publish::merge_attributes;
use super::record::{Record, RecordId, TimeStamp};
use super::service::{VersionService, fetch_approved};
use super::store::{Tx, TxResult, abort, wrap_abort};
use tracing::info;

impl VersionService {
    /// The most recently archived version of an approved record.
    pub fn previous_version(&self, approved: RecordId) -> Result<Option<Record>, VersionError> {
        Ok(self.previous_versions(approved)?.into_iter().next())
    }

    /// Every archived version of an approved record, newest first.
    pub fn previous_versions(&self, approved: RecordId) -> Result<Vec<Record>, VersionError> {
        let mut history = self.transaction(|tx| tx.history_of(approved))?;
        history.reverse();
        Ok(history)
    }

    /// Restores a previously-approved version as the approved state.
    ///
    /// The state being replaced is archived first (for types that track
    /// history), any draft of the approved record is discarded, and the
    /// approved record's members are replaced by copies of the historic
    /// version's members. The historic version itself is left untouched.
    pub fn make_current(&self, historic: RecordId) -> Result<Record, VersionError> {
        let record = self.find(historic)?;
        let Some(approved_id) = record.current_approved_version_id else {
            return Err(VersionError::NotHistoric(historic));
        };

        self.transaction(|tx| restore_in(tx, &record, approved_id))?;
        info!(%historic, approved = %approved_id, "previous version made current");
        self.find(approved_id)
    }
}

fn restore_in(tx: &Tx<'_>, historic: &Record, approved_id: RecordId) -> TxResult<()> {
    let mut approved = fetch_approved(tx, approved_id)?;
    let config = tx.registry().config_for(&approved).map_err(abort)?;

    if config.tracks_history_for(&approved) {
        archive_in(tx, &approved)?;
    }

    merge_attributes(config, &mut approved, historic);
    approved.updated_at = TimeStamp::new();
    tx.put(&approved)?;

    for assoc in config.editable_target_associations() {
        let replaced = tx.children(approved.id, assoc)?;
        for member in tx.children(historic.id, assoc)? {
            copy_member(tx, &member, assoc, approved.id, CloneMode::Snapshot)?;
        }
        for member in replaced {
            tx.delete(member.id)?;
        }
    }

    for draft in tx.drafts_of(approved.id)? {
        tx.delete(draft.id)?;
    }
    Ok(())
}

/// Archives the current state of an approved record, members included, as a
/// new historic version.
pub(crate) fn archive_in(tx: &Tx<'_>, approved: &Record) -> TxResult<Record> {
    snapshot(tx, approved).map_err(|err| {
        wrap_abort(err, |source| VersionError::HistoricVersionCreation {
            approved: approved.id,
            source: Box::new(source),
        })
    })
}

fn snapshot(tx: &Tx<'_>, approved: &Record) -> TxResult<Record> {
    let config = tx.registry().config_for(approved).map_err(abort)?;
    let historic = copy_root(config, approved, CloneMode::Snapshot);
    tx.put(&historic)?;
    copy_members(tx, approved, historic.id, CloneMode::Snapshot)?;
    Ok(historic)
}
