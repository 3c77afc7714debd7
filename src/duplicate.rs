//! Deep copies of a record and its editable-target associations
use super::record::{Record, RecordId, TimeStamp, Value};
use super::registry::{Association, TypeConfig};
use super::store::{Tx, TxResult, abort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneMode {
    /// Working copy: every copied node points back at its source.
    Draft,
    /// Frozen copy: nodes keep their timestamps and carry no draft link.
    Snapshot,
}

/// Copies the root record only. The caller is responsible for persisting it.
///
/// The copy keeps the foreign keys tying it to a parent. The store never lists
/// a root draft or a snapshot as that parent's member.
pub(crate) fn copy_root(config: &TypeConfig, source: &Record, mode: CloneMode) -> Record {
    let mut copy = copy_node(config, source, mode);
    if mode == CloneMode::Snapshot {
        copy.approved_version_id = None;
        copy.current_approved_version_id = Some(source.id);
    }
    copy
}

/// Copies every editable-target member of `source` (recursively) and attaches
/// the copies to `target`.
pub(crate) fn copy_members(
    tx: &Tx<'_>,
    source: &Record,
    target: RecordId,
    mode: CloneMode,
) -> TxResult<()> {
    let config = tx.registry().config_for(source).map_err(abort)?;

    for assoc in config.editable_target_associations() {
        for member in tx.children(source.id, assoc)? {
            copy_member(tx, &member, assoc, target, mode)?;
        }
    }
    Ok(())
}

/// Copies one association member, and its own members, under `target`.
pub(crate) fn copy_member(
    tx: &Tx<'_>,
    member: &Record,
    assoc: &Association,
    target: RecordId,
    mode: CloneMode,
) -> TxResult<Record> {
    let config = tx.registry().config_for(member).map_err(abort)?;
    let mut copy = copy_node(config, member, mode);
    copy.attributes
        .insert(assoc.foreign_key.clone(), Value::Ref(target));
    tx.put(&copy)?;
    copy_members(tx, member, copy.id, mode)?;
    Ok(copy)
}

fn copy_node(config: &TypeConfig, source: &Record, mode: CloneMode) -> Record {
    let mut copy = source.clone();
    copy.id = RecordId::new();
    copy.current_approved_version_id = None;
    match mode {
        CloneMode::Draft => {
            copy.approved_version_id = config.tracks_version_link().then_some(source.id);
            let now = TimeStamp::new();
            copy.created_at = now.clone();
            copy.updated_at = now;
        }
        CloneMode::Snapshot => {
            copy.approved_version_id = None;
        }
    }
    copy
}
