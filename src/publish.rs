//! Publishing a draft into its approved record
//!
//! A publish runs as one transaction: the approved record's previous state is
//! archived (for types that track history), the draft's attributes are merged
//! onto the approved record, the draft's association members are moved over
//! to replace the approved ones, and every draft of the record is deleted.
//! Nothing of a failed publish is left behind.
use super::error::VersionError;
use super::history::archive_in;
use super::record::{Record, RecordId, TimeStamp, Value};
use super::registry::{Association, TypeConfig};
use super::service::{VersionService, fetch_approved};
use super::store::{Tx, TxResult, abort};
use tracing::{debug, error, info, warn};

/// State threaded through one publish.
pub(crate) struct PublishContext<'a> {
    pub approved: RecordId,
    pub draft: &'a Record,
    pub published_at: TimeStamp<chrono::Utc>,
}

/// What a committed publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublishOutcome {
    pub drafts_removed: usize,
    pub archived: Option<RecordId>,
}

impl VersionService {
    /// Promotes the draft of an approved record (or of the given draft's
    /// approved record) and returns the reloaded approved record.
    ///
    /// Types that do not require approval, and records without a draft, are
    /// returned unchanged. The `after_publish` hook runs after the commit; its
    /// failure is reported but does not undo the publish.
    pub fn publish(&self, id: RecordId) -> Result<Record, VersionError> {
        let record = self.find(id)?;
        let approved = self.approved_version(&record)?;
        let config = self.registry.config_for(&approved)?;
        if !config.requires_approval_for(&approved) {
            debug!(approved = %approved.id, "changes do not require approval, nothing to publish");
            return Ok(approved);
        }

        let outcome = self.transaction(|tx| publish_in(tx, approved.id))?;
        let Some(outcome) = outcome else {
            debug!(approved = %approved.id, "no draft to publish");
            return Ok(approved);
        };
        if outcome.drafts_removed > 1 {
            warn!(
                approved = %approved.id,
                drafts = outcome.drafts_removed,
                "collapsed duplicate drafts while publishing"
            );
        }
        info!(
            approved = %approved.id,
            archived = ?outcome.archived,
            "draft published"
        );

        let published = self.find(approved.id)?;
        if let Err(err) = config.version_policy().after_publish(&published) {
            error!(approved = %published.id, error = %err, "after_publish hook failed");
            return Err(VersionError::hook("after_publish", published.id, err));
        }
        Ok(published)
    }
}

/// Runs the publish steps inside `tx`. Returns `None` when there is no draft.
pub(crate) fn publish_in(tx: &Tx<'_>, approved_id: RecordId) -> TxResult<Option<PublishOutcome>> {
    let mut approved = fetch_approved(tx, approved_id)?;
    let drafts = tx.drafts_of(approved.id)?;
    let Some(draft) = drafts.first() else {
        return Ok(None);
    };
    let config = tx.registry().config_for(&approved).map_err(abort)?;

    let archived = if config.tracks_history_for(&approved) {
        Some(archive_in(tx, &approved)?.id)
    } else {
        None
    };

    let ctx = PublishContext {
        approved: approved.id,
        draft,
        published_at: TimeStamp::new(),
    };
    merge_attributes(config, &mut approved, ctx.draft);
    config
        .version_policy()
        .before_publish(&mut approved)
        .map_err(|err| abort(VersionError::hook("before_publish", approved_id, err)))?;
    approved.updated_at = ctx.published_at.clone();
    tx.put(&approved)?;

    for assoc in config.editable_target_associations() {
        replace_members(tx, assoc, ctx.draft.id, &ctx)?;
    }

    // every draft goes, duplicates from concurrent creation included
    for draft in &drafts {
        tx.delete(draft.id)?;
    }

    Ok(Some(PublishOutcome {
        drafts_removed: drafts.len(),
        archived,
    }))
}

/// Copies the approvable attributes of `source` onto `target`. Attributes
/// missing on the source are removed from the target.
pub(crate) fn merge_attributes(config: &TypeConfig, target: &mut Record, source: &Record) {
    for name in config.usable_approvable_attributes(&[&*target, source]) {
        match source.attributes.get(&name) {
            Some(value) => {
                target.attributes.insert(name, value.clone());
            }
            None => {
                target.attributes.remove(&name);
            }
        }
    }
}

/// Swaps the approved record's members of `assoc` for the members currently
/// attached to `donor`.
fn replace_members(
    tx: &Tx<'_>,
    assoc: &Association,
    donor: RecordId,
    ctx: &PublishContext<'_>,
) -> TxResult<()> {
    let replaced = tx.children(ctx.approved, assoc)?;

    for member in tx.children(donor, assoc)? {
        adopt(tx, member, assoc, ctx)?;
    }
    for member in replaced {
        tx.delete(member.id)?;
    }
    Ok(())
}

/// Re-points a member at the approved record and promotes it, and everything
/// below it, from draft to approved.
fn adopt(tx: &Tx<'_>, mut member: Record, assoc: &Association, ctx: &PublishContext<'_>) -> TxResult<()> {
    member
        .attributes
        .insert(assoc.foreign_key.clone(), Value::Ref(ctx.approved));
    member.updated_at = ctx.published_at.clone();
    member.approved_version_id = None;
    tx.put(&member)?;
    release_descendants(tx, &member)
}

fn release_descendants(tx: &Tx<'_>, record: &Record) -> TxResult<()> {
    let config = tx.registry().config_for(record).map_err(abort)?;
    for assoc in config.editable_target_associations() {
        for mut member in tx.children(record.id, assoc)? {
            if member.approved_version_id.take().is_some() {
                tx.put(&member)?;
            }
            release_descendants(tx, &member)?;
        }
    }
    Ok(())
}
