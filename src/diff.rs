//! Differences between an approved record and its draft
//!
//! A diff is a tree: one [`DiffNode`] per record, holding the attributes that
//! differ (or all of them, on request) and, recursively, one node per member
//! of each editable-target association whose type tracks draft links.
//!
//! Members are classified against their counterpart on the other side:
//! a draft member with no approved counterpart is `Added`; an approved member
//! whose draft is gone, or detached from its parent, is `Deleted`; otherwise
//! the member is `Changed` when a non-key attribute differs and `Unchanged`
//! when none does. Unchanged members are only reported when asked for or when
//! one of their own members changed.
use super::error::VersionError;
use super::record::{ID_ATTRIBUTE, Record, Value};
use super::registry::{Association, TypeConfig};
use super::service::VersionService;
use super::store::{Tx, TxResult, abort};
use super::text_diff::{TextDiffer, TextFormat};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableStatus {
    Unchanged,
    Changed,
    Added,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDiff {
    pub live: Option<Value>,
    pub editable: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffNode {
    pub type_info: TypeInfo,
    pub status: EditableStatus,
    pub attributes: BTreeMap<String, AttributeDiff>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub associations: BTreeMap<String, Vec<DiffNode>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Recurse into editable-target associations.
    pub include_associations: bool,
    /// Report unchanged attributes and unchanged members too.
    pub include_unchanged: bool,
    /// Render a word diff for changed text attributes.
    pub include_text_diff: bool,
    pub text_format: TextFormat,
}

impl DiffNode {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDiff> {
        self.attributes.get(name)
    }

    /// Members of an association, empty when the association was not reported.
    pub fn members(&self, association: &str) -> &[DiffNode] {
        self.associations
            .get(association)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Finds a member by the live or editable value of one of its attributes.
    pub fn find_member(&self, association: &str, attribute: &str, value: &Value) -> Option<&DiffNode> {
        self.members(association).iter().find(|node| {
            node.attribute(attribute).is_some_and(|diff| {
                diff.live.as_ref() == Some(value) || diff.editable.as_ref() == Some(value)
            })
        })
    }
}

impl VersionService {
    /// Diff options carrying the configured text format.
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            text_format: self.text_format,
            ..DiffOptions::default()
        }
    }

    /// Diffs an approved record (or the approved record behind a draft)
    /// against its draft. The draft is created if it does not exist yet.
    pub fn diff(&self, record: &Record, options: &DiffOptions) -> Result<DiffNode, VersionError> {
        let approved = self.approved_version(record)?;
        let draft = self.editable_version(&approved)?;
        self.diff_pair(&approved, &draft, options)
    }

    /// Diffs an already resolved pair. Never creates drafts.
    pub fn diff_pair(
        &self,
        approved: &Record,
        draft: &Record,
        options: &DiffOptions,
    ) -> Result<DiffNode, VersionError> {
        self.transaction(|tx| {
            let builder = DiffBuilder {
                tx,
                options,
                text_differ: self.text_differ.as_ref(),
            };
            let config = tx.registry().config_for(approved).map_err(abort)?;
            builder.node(config, Some(approved), Some(draft), None)
        })
    }
}

struct DiffBuilder<'a> {
    tx: &'a Tx<'a>,
    options: &'a DiffOptions,
    text_differ: &'a dyn TextDiffer,
}

impl DiffBuilder<'_> {
    fn node(
        &self,
        config: &TypeConfig,
        live: Option<&Record>,
        editable: Option<&Record>,
        parent_key: Option<&str>,
    ) -> TxResult<DiffNode> {
        let present: Vec<&Record> = live.into_iter().chain(editable).collect();

        let mut attributes = BTreeMap::new();
        let mut changed = false;
        for name in config.diff_relevant_attributes(&present, parent_key) {
            let live_value = live.map(|record| record.field(&name));
            let editable_value = editable.map(|record| record.field(&name));
            let differs = live_value != editable_value;
            if differs && name != ID_ATTRIBUTE {
                changed = true;
            }
            if differs || self.options.include_unchanged {
                let diff = self.render(live_value.as_ref(), editable_value.as_ref());
                attributes.insert(
                    name,
                    AttributeDiff {
                        live: live_value,
                        editable: editable_value,
                        diff,
                    },
                );
            }
        }

        let status = match (live, editable) {
            (None, _) => EditableStatus::Added,
            (Some(_), None) => EditableStatus::Deleted,
            (Some(_), Some(editable)) if parent_key.is_some_and(|key| editable.field(key).is_null()) => {
                EditableStatus::Deleted
            }
            _ if changed => EditableStatus::Changed,
            _ => EditableStatus::Unchanged,
        };

        let mut associations = BTreeMap::new();
        if self.options.include_associations {
            for assoc in config.editable_target_associations() {
                let target = self
                    .tx
                    .registry()
                    .get(&assoc.target_type)
                    .map_err(abort)?;
                if !target.tracks_version_link() {
                    continue;
                }
                let members = self.members(target, assoc, live, editable)?;
                if !members.is_empty() || self.options.include_unchanged {
                    associations.insert(assoc.name.clone(), members);
                }
            }
        }

        Ok(DiffNode {
            type_info: TypeInfo {
                type_name: config.name().to_string(),
            },
            status,
            attributes,
            associations,
        })
    }

    fn members(
        &self,
        config: &TypeConfig,
        assoc: &Association,
        live: Option<&Record>,
        editable: Option<&Record>,
    ) -> TxResult<Vec<DiffNode>> {
        let live_members = match live {
            Some(record) => self.tx.children(record.id, assoc)?,
            None => vec![],
        };
        let editable_members = match editable {
            Some(record) => self.tx.children(record.id, assoc)?,
            None => vec![],
        };
        let key = Some(assoc.foreign_key.as_str());

        // records that skip approval are diffed against themselves
        let is_counterpart = |candidate: &Record, member: &Record| {
            candidate.id == member.id || candidate.approved_version_id == Some(member.id)
        };

        let mut nodes = vec![];
        for member in &live_members {
            let counterpart = match editable_members
                .iter()
                .find(|candidate| is_counterpart(candidate, member))
            {
                Some(found) => Some(found.clone()),
                // a draft detached from its parent no longer shows up as a member
                None if editable.is_some() => self
                    .tx
                    .drafts_of(member.id)?
                    .into_iter()
                    .find(|draft| draft.field(&assoc.foreign_key).is_null()),
                None => None,
            };
            let node = self.node(config, Some(member), counterpart.as_ref(), key)?;
            // unchanged members stay when something below them changed
            if self.options.include_unchanged
                || node.status != EditableStatus::Unchanged
                || !node.associations.is_empty()
            {
                nodes.push(node);
            }
        }
        for member in editable_members.iter().filter(|candidate| {
            candidate.approved_version_id.is_none()
                && !live_members.iter().any(|member| member.id == candidate.id)
        }) {
            nodes.push(self.node(config, None, Some(member), key)?);
        }
        Ok(nodes)
    }

    fn render(&self, live: Option<&Value>, editable: Option<&Value>) -> Option<String> {
        if !self.options.include_text_diff {
            return None;
        }
        match (live, editable) {
            (Some(Value::Text(live)), Some(Value::Text(editable)))
                if !live.is_empty() && !editable.is_empty() =>
            {
                Some(
                    self.text_differ
                        .diff(live, editable, self.options.text_format),
                )
            }
            _ => None,
        }
    }
}
