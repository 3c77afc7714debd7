//! sled-backed record store
//!
//! Records live in the `records` tree keyed by their id. The `links` tree holds
//! the reverse lookups the engine needs (drafts, history and association
//! members of a record). Indexes are kept in step with the records on every
//! write, inside the same transaction.
//!
//! An index list under `key` is stored as a head entry `key` holding the next
//! free slot and the live member count, one `key/#{slot}` entry per member in
//! insertion order, and a `key/@{member}` entry pointing a member back at its
//! slot. Linking and unlinking touch a fixed number of entries; reading walks
//! the slots. Once a list empties, its head goes and slots start over.
//!
//! Historic versions, and drafts whose parent is not itself a draft, are never
//! indexed as association members. Their foreign keys still name the parent.
use super::error::VersionError;
use super::record::{Record, RecordId, Value};
use super::registry::{Association, Registry};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};

const RECORDS_TREE: &str = "records";
const LINKS_TREE: &str = "links";

pub(crate) type TxError = ConflictableTransactionError<VersionError>;
pub(crate) type TxResult<T> = Result<T, TxError>;

pub(crate) fn abort(err: impl Into<VersionError>) -> TxError {
    ConflictableTransactionError::Abort(err.into())
}

/// Rewraps an aborting error, leaving conflicts for sled to retry.
pub(crate) fn wrap_abort(err: TxError, wrap: impl FnOnce(VersionError) -> VersionError) -> TxError {
    match err {
        ConflictableTransactionError::Abort(err) => ConflictableTransactionError::Abort(wrap(err)),
        other => other,
    }
}

pub struct Store {
    records: Tree,
    links: Tree,
}

/// A view over both trees inside one transaction.
pub(crate) struct Tx<'a> {
    records: &'a TransactionalTree,
    links: &'a TransactionalTree,
    registry: &'a Registry,
}

impl Store {
    pub fn open(db: &Db) -> Result<Self, VersionError> {
        Ok(Self {
            records: db.open_tree(RECORDS_TREE)?,
            links: db.open_tree(LINKS_TREE)?,
        })
    }

    /// Runs `f` atomically over both trees. sled may run the closure more than
    /// once when it conflicts with a concurrent writer.
    pub(crate) fn transaction<T>(
        &self,
        registry: &Registry,
        f: impl Fn(&Tx<'_>) -> TxResult<T>,
    ) -> Result<T, VersionError> {
        let result = (&self.records, &self.links).transaction(|(records, links)| {
            let tx = Tx {
                records,
                links,
                registry,
            };
            f(&tx)
        });
        Ok(result?)
    }

    /// Every stored record of a type, in id order.
    pub fn all_of_type(&self, type_name: &str) -> Result<Vec<Record>, VersionError> {
        let mut found = vec![];
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            let record: Record = minicbor::decode(&bytes)?;
            if record.type_name == type_name {
                found.push(record);
            }
        }
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Tx<'_> {
    pub(crate) fn registry(&self) -> &Registry {
        self.registry
    }

    pub(crate) fn get(&self, id: RecordId) -> TxResult<Option<Record>> {
        match self.records.get(id.as_bytes())? {
            Some(bytes) => {
                let record: Record = minicbor::decode(&bytes).map_err(abort)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn fetch(&self, id: RecordId) -> TxResult<Record> {
        self.get(id)?
            .ok_or_else(|| abort(VersionError::NotFound(id)))
    }

    /// Inserts or replaces a record and brings every index in line with it.
    pub(crate) fn put(&self, record: &Record) -> TxResult<()> {
        record.role().map_err(abort)?;
        self.registry.config_for(record).map_err(abort)?;

        let previous = self.get(record.id)?;
        self.reindex(previous.as_ref(), Some(record))?;

        self.records
            .insert(&record.id.as_bytes()[..], encode(record)?)?;
        Ok(())
    }

    /// Removes a record together with its association members and drafts.
    /// Historic versions of the record are left in place.
    pub(crate) fn delete(&self, id: RecordId) -> TxResult<Option<Record>> {
        let Some(record) = self.get(id)? else {
            return Ok(None);
        };
        let config = self.registry.config_for(&record).map_err(abort)?;

        for assoc in config.associations() {
            for child in self.member_ids(id, assoc)? {
                self.delete(child)?;
            }
        }
        for draft in self.ids(&link_key("draft", id))? {
            self.delete(draft)?;
        }

        self.reindex(Some(&record), None)?;
        self.records.remove(&id.as_bytes()[..])?;
        Ok(Some(record))
    }

    pub(crate) fn children(&self, parent: RecordId, assoc: &Association) -> TxResult<Vec<Record>> {
        self.load_all(self.member_ids(parent, assoc)?)
    }

    /// Drafts of an approved record, oldest first.
    pub(crate) fn drafts_of(&self, approved: RecordId) -> TxResult<Vec<Record>> {
        self.load_all(self.ids(&link_key("draft", approved))?)
    }

    /// Historic versions of an approved record, in the order they were archived.
    pub(crate) fn history_of(&self, approved: RecordId) -> TxResult<Vec<Record>> {
        self.load_all(self.ids(&link_key("history", approved))?)
    }

    fn member_ids(&self, parent: RecordId, assoc: &Association) -> TxResult<Vec<RecordId>> {
        self.ids(&child_key(parent, &assoc.target_type, &assoc.foreign_key))
    }

    fn load_all(&self, ids: Vec<RecordId>) -> TxResult<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn reindex(&self, old: Option<&Record>, new: Option<&Record>) -> TxResult<()> {
        self.relink(
            "draft",
            old.and_then(|r| r.approved_version_id),
            new.and_then(|r| r.approved_version_id),
            old.or(new),
        )?;
        self.relink(
            "history",
            old.and_then(|r| r.current_approved_version_id),
            new.and_then(|r| r.current_approved_version_id),
            old.or(new),
        )?;

        let Some(subject) = old.or(new) else {
            return Ok(());
        };
        for assoc in self.registry.incoming(&subject.type_name) {
            let before = old
                .and_then(|r| r.get(&assoc.foreign_key))
                .and_then(Value::as_ref_id);
            let after = match new {
                Some(record) => self.member_of(record, assoc)?,
                None => None,
            };
            if let Some(parent) = before {
                if Some(parent) != after {
                    self.unlink(
                        child_key(parent, &subject.type_name, &assoc.foreign_key),
                        subject.id,
                    )?;
                }
            }
            if let Some(parent) = after {
                self.link(
                    child_key(parent, &subject.type_name, &assoc.foreign_key),
                    subject.id,
                )?;
            }
        }
        Ok(())
    }

    /// The parent `record` is listed under for `assoc`, if any.
    fn member_of(&self, record: &Record, assoc: &Association) -> TxResult<Option<RecordId>> {
        let Some(parent) = record
            .get(&assoc.foreign_key)
            .and_then(Value::as_ref_id)
        else {
            return Ok(None);
        };
        if record.is_historic() {
            return Ok(None);
        }
        // a root draft still names its approved record's parent
        if record.is_draft() {
            if let Some(owner) = self.get(parent)? {
                if !owner.is_draft() {
                    return Ok(None);
                }
            }
        }
        Ok(Some(parent))
    }

    fn relink(
        &self,
        prefix: &str,
        before: Option<RecordId>,
        after: Option<RecordId>,
        subject: Option<&Record>,
    ) -> TxResult<()> {
        let Some(subject) = subject else {
            return Ok(());
        };
        if before == after {
            return Ok(());
        }
        if let Some(target) = before {
            self.unlink(link_key(prefix, target), subject.id)?;
        }
        if let Some(target) = after {
            self.link(link_key(prefix, target), subject.id)?;
        }
        Ok(())
    }

    fn ids(&self, key: &[u8]) -> TxResult<Vec<RecordId>> {
        let Some((next, _)) = self.head(key)? else {
            return Ok(vec![]);
        };
        let mut ids = vec![];
        for slot in 0..next {
            if let Some(bytes) = self.links.get(slot_key(key, slot))? {
                ids.push(minicbor::decode(&bytes).map_err(abort)?);
            }
        }
        Ok(ids)
    }

    /// Next free slot and live member count of a list.
    fn head(&self, key: &[u8]) -> TxResult<Option<(u64, u64)>> {
        match self.links.get(key)? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    fn link(&self, key: Vec<u8>, id: RecordId) -> TxResult<()> {
        let member = member_key(&key, id);
        if self.links.get(&member)?.is_some() {
            return Ok(());
        }
        let (next, live) = self.head(&key)?.unwrap_or((0, 0));
        self.links.insert(slot_key(&key, next), encode(&id)?)?;
        self.links.insert(member, encode(&next)?)?;
        self.links.insert(key, encode(&(next + 1, live + 1))?)?;
        Ok(())
    }

    fn unlink(&self, key: Vec<u8>, id: RecordId) -> TxResult<()> {
        let Some(bytes) = self.links.remove(member_key(&key, id))? else {
            return Ok(());
        };
        let slot: u64 = minicbor::decode(&bytes).map_err(abort)?;
        self.links.remove(slot_key(&key, slot))?;
        match self.head(&key)? {
            Some((next, live)) if live > 1 => {
                self.links.insert(key, encode(&(next, live - 1))?)?;
            }
            _ => {
                self.links.remove(key)?;
            }
        }
        Ok(())
    }
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> TxResult<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| abort(VersionError::Encode(e.to_string())))
}

fn slot_key(key: &[u8], slot: u64) -> Vec<u8> {
    let mut slot_key = key.to_vec();
    slot_key.extend_from_slice(b"/#");
    slot_key.extend_from_slice(&slot.to_be_bytes());
    slot_key
}

fn member_key(key: &[u8], id: RecordId) -> Vec<u8> {
    let mut member_key = key.to_vec();
    member_key.extend_from_slice(b"/@");
    member_key.extend_from_slice(id.as_bytes());
    member_key
}

fn link_key(prefix: &str, id: RecordId) -> Vec<u8> {
    let mut key = format!("{prefix}/").into_bytes();
    key.extend_from_slice(id.as_bytes());
    key
}

fn child_key(parent: RecordId, target_type: &str, foreign_key: &str) -> Vec<u8> {
    let mut key = link_key("child", parent);
    key.extend_from_slice(format!("/{target_type}/{foreign_key}").as_bytes());
    key
}
