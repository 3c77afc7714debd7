//! Per-type versioning configuration and the registry that holds it
//!
//! Every versionable type is declared once, at startup, through a [`TypeConfig`].
//! Associations are described explicitly (name, cardinality, target type and
//! foreign key); nothing is discovered at call time.
use super::error::VersionError;
use super::record::{ID_ATTRIBUTE, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Columns the engine owns; never copied between versions.
pub const LINK_COLUMNS: [&str; 3] = [
    ID_ATTRIBUTE,
    "approved_version_id",
    "current_approved_version_id",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    HasMany,
    HasOne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub name: String,
    pub cardinality: Cardinality,
    pub target_type: String,
    pub foreign_key: String,
}

/// Strategy injected per type. The defaults read the static configuration and
/// make every hook a no-op.
pub trait VersionPolicy: Send + Sync {
    fn requires_approval(&self, config: &TypeConfig, _record: &Record) -> bool {
        config.requires_approval
    }
    fn tracks_history(&self, config: &TypeConfig, _record: &Record) -> bool {
        config.tracks_history
    }
    /// Runs on a freshly created draft before it is written back.
    fn after_create_draft(&self, _draft: &mut Record) -> anyhow::Result<()> {
        Ok(())
    }
    /// Runs on the approved record after the draft's attributes were merged in.
    fn before_publish(&self, _approved: &mut Record) -> anyhow::Result<()> {
        Ok(())
    }
    /// Runs on the reloaded approved record once the publish has committed.
    fn after_publish(&self, _approved: &Record) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DefaultPolicy;

impl VersionPolicy for DefaultPolicy {}

#[derive(Clone)]
pub struct TypeConfig {
    name: String,
    approvable_attributes: Option<BTreeSet<String>>, // None means every persisted attribute
    associations: Vec<Association>,
    editable_targets: Option<Vec<String>>, // None means every declared association
    nullify_on_draft_create: BTreeSet<String>,
    requires_approval: bool,
    tracks_history: bool,
    allow_historic_edits: bool,
    tracks_version_link: bool,
    policy: Arc<dyn VersionPolicy>,
}

impl TypeConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            approvable_attributes: None,
            associations: vec![],
            editable_targets: None,
            nullify_on_draft_create: BTreeSet::new(),
            requires_approval: true,
            tracks_history: false,
            allow_historic_edits: false,
            tracks_version_link: true,
            policy: Arc::new(DefaultPolicy),
        }
    }
    pub fn approvable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approvable_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }
    pub fn has_many(self, name: &str, target_type: &str, foreign_key: &str) -> Self {
        self.associate(name, Cardinality::HasMany, target_type, foreign_key)
    }
    pub fn has_one(self, name: &str, target_type: &str, foreign_key: &str) -> Self {
        self.associate(name, Cardinality::HasOne, target_type, foreign_key)
    }
    fn associate(
        mut self,
        name: &str,
        cardinality: Cardinality,
        target_type: &str,
        foreign_key: &str,
    ) -> Self {
        self.associations.push(Association {
            name: name.to_string(),
            cardinality,
            target_type: target_type.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }
    /// Restricts draft propagation to the named associations.
    pub fn editable_targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.editable_targets = Some(names.into_iter().map(Into::into).collect());
        self
    }
    pub fn nullify_on_draft_create<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nullify_on_draft_create = attributes.into_iter().map(Into::into).collect();
        self
    }
    pub fn requires_approval(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }
    pub fn tracks_history(mut self, tracked: bool) -> Self {
        self.tracks_history = tracked;
        self
    }
    pub fn allow_historic_edits(mut self, allowed: bool) -> Self {
        self.allow_historic_edits = allowed;
        self
    }
    /// Declares that the type has no approved_version_id column.
    pub fn without_version_link(mut self) -> Self {
        self.tracks_version_link = false;
        self
    }
    pub fn policy(mut self, policy: Arc<dyn VersionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }
    pub fn association(&self, name: &str) -> Result<&Association, VersionError> {
        self.associations
            .iter()
            .find(|assoc| assoc.name == name)
            .ok_or_else(|| VersionError::UnknownAssociation {
                type_name: self.name.clone(),
                association: name.to_string(),
            })
    }
    pub fn editable_target_associations(&self) -> Vec<&Association> {
        match &self.editable_targets {
            Some(names) => self
                .associations
                .iter()
                .filter(|assoc| names.contains(&assoc.name))
                .collect(),
            None => self.associations.iter().collect(),
        }
    }
    pub fn nullified_attributes(&self) -> &BTreeSet<String> {
        &self.nullify_on_draft_create
    }
    pub fn tracks_version_link(&self) -> bool {
        self.tracks_version_link
    }
    pub fn allows_historic_edits(&self) -> bool {
        self.allow_historic_edits
    }
    pub fn requires_approval_for(&self, record: &Record) -> bool {
        self.policy.requires_approval(self, record)
    }
    pub fn tracks_history_for(&self, record: &Record) -> bool {
        self.policy.tracks_history(self, record)
    }
    pub fn version_policy(&self) -> &dyn VersionPolicy {
        self.policy.as_ref()
    }

    /// Fails with `ApprovedVersionLinkMissing` unless the type declared the link.
    pub fn ensure_version_link(&self) -> Result<(), VersionError> {
        if self.tracks_version_link {
            Ok(())
        } else {
            Err(VersionError::ApprovedVersionLinkMissing(self.name.clone()))
        }
    }

    /// Attributes copied between versions. Engine-owned columns are never part
    /// of the set; foreign keys to a parent are, so a draft can move a record.
    pub fn usable_approvable_attributes(&self, records: &[&Record]) -> BTreeSet<String> {
        let base: BTreeSet<String> = match &self.approvable_attributes {
            Some(attributes) => attributes.clone(),
            None => records
                .iter()
                .flat_map(|record| record.attributes.keys().cloned())
                .collect(),
        };
        base.into_iter()
            .filter(|name| !LINK_COLUMNS.contains(&name.as_str()))
            .collect()
    }

    /// Attributes shown in a diff: the approvable set plus the id. A member's
    /// key to the parent it was reached through is left out.
    pub fn diff_relevant_attributes(
        &self,
        records: &[&Record],
        parent_key: Option<&str>,
    ) -> Vec<String> {
        let mut attributes = self.usable_approvable_attributes(records);
        attributes.remove("updated_at");
        if let Some(key) = parent_key {
            attributes.remove(key);
        }
        attributes.insert(ID_ATTRIBUTE.to_string());
        attributes.into_iter().collect()
    }
}

impl fmt::Debug for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeConfig")
            .field("name", &self.name)
            .field("approvable_attributes", &self.approvable_attributes)
            .field("associations", &self.associations)
            .field("editable_targets", &self.editable_targets)
            .field("nullify_on_draft_create", &self.nullify_on_draft_create)
            .field("requires_approval", &self.requires_approval)
            .field("tracks_history", &self.tracks_history)
            .field("allow_historic_edits", &self.allow_historic_edits)
            .field("tracks_version_link", &self.tracks_version_link)
            .finish_non_exhaustive()
    }
}

/// Static map of type name to configuration, built once at startup.
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, TypeConfig>,
    // target type -> associations pointing at it, deduplicated by foreign key
    incoming: BTreeMap<String, Vec<Association>>,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    types: Vec<TypeConfig>,
}

impl RegistryBuilder {
    pub fn register(mut self, config: TypeConfig) -> Self {
        self.types.push(config);
        self
    }

    pub fn build(self) -> Result<Registry, VersionError> {
        let mut types = BTreeMap::new();
        for config in self.types {
            if types.contains_key(&config.name) {
                return Err(VersionError::Configuration(format!(
                    "type `{}` registered twice",
                    config.name
                )));
            }
            types.insert(config.name.clone(), config);
        }

        let mut incoming: BTreeMap<String, Vec<Association>> = BTreeMap::new();
        for config in types.values() {
            if let Some(names) = &config.editable_targets {
                if let Some(name) = names.iter().find(|name| config.association(name).is_err()) {
                    return Err(VersionError::Configuration(format!(
                        "`{}` lists editable target `{name}` which is not a declared association",
                        config.name
                    )));
                }
            }
            for assoc in &config.associations {
                if !types.contains_key(&assoc.target_type) {
                    return Err(VersionError::Configuration(format!(
                        "association `{}.{}` targets unregistered type `{}`",
                        config.name, assoc.name, assoc.target_type
                    )));
                }
                let entry = incoming.entry(assoc.target_type.clone()).or_default();
                if !entry.iter().any(|known| known.foreign_key == assoc.foreign_key) {
                    entry.push(assoc.clone());
                }
            }
        }

        Ok(Registry { types, incoming })
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }
    pub fn get(&self, type_name: &str) -> Result<&TypeConfig, VersionError> {
        self.types
            .get(type_name)
            .ok_or_else(|| VersionError::UnknownType(type_name.to_string()))
    }
    pub fn config_for(&self, record: &Record) -> Result<&TypeConfig, VersionError> {
        self.get(&record.type_name)
    }
    /// Associations whose members are records of `target_type`.
    pub fn incoming(&self, target_type: &str) -> &[Association] {
        self.incoming
            .get(target_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
