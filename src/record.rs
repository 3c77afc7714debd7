//! Versionable records, their identities and the values they carry
use super::error::VersionError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid7::{Uuid, uuid7};

/// Name under which a record's own id shows up in attribute listings and diffs.
pub const ID_ATTRIBUTE: &str = "id";

// newtype wrapper over uuid because Uuid doesn't implement minicbor or serde traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(Uuid);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

/// A single attribute value. Foreign keys are stored as `Ref`.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    #[n(0)]
    Null,
    #[n(1)]
    Bool(#[n(0)] bool),
    #[n(2)]
    Int(#[n(0)] i64),
    #[n(3)]
    Float(#[n(0)] f64),
    #[n(4)]
    Text(#[n(0)] String),
    #[n(5)]
    Time(#[n(0)] TimeStamp<Utc>),
    #[n(6)]
    Ref(#[n(0)] RecordId),
}

/// Which of the three roles a record plays for its approved counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRole {
    Approved,
    Draft,
    Historic,
}

// key is the record id, value is this struct encoded into cbor
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Record {
    #[n(0)]
    pub id: RecordId,
    #[n(1)]
    pub type_name: String,
    #[n(2)]
    pub attributes: BTreeMap<String, Value>,
    #[n(3)]
    pub approved_version_id: Option<RecordId>, // set only on drafts
    #[n(4)]
    pub current_approved_version_id: Option<RecordId>, // set only on historic versions
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub updated_at: TimeStamp<Utc>,
}

impl RecordId {
    pub fn new() -> Self {
        Self(uuid7())
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
    pub fn as_ref_id(&self) -> Option<RecordId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

impl Record {
    /// A fresh approved record of the given type with no attributes.
    pub fn new(type_name: &str) -> Self {
        let now = TimeStamp::new();
        Self {
            id: RecordId::new(),
            type_name: type_name.to_string(),
            attributes: BTreeMap::new(),
            approved_version_id: None,
            current_approved_version_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.assign(name, value);
        self
    }
    pub fn assign(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_string(), value.into());
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }
    /// Reads an attribute for comparison purposes: the id is exposed as a `Ref`
    /// and missing attributes read as `Null`.
    pub fn field(&self, name: &str) -> Value {
        if name == ID_ATTRIBUTE {
            return Value::Ref(self.id);
        }
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }
    pub fn is_draft(&self) -> bool {
        self.approved_version_id.is_some()
    }
    pub fn is_historic(&self) -> bool {
        self.current_approved_version_id.is_some()
    }
    pub fn role(&self) -> Result<VersionRole, VersionError> {
        match (self.approved_version_id, self.current_approved_version_id) {
            (None, None) => Ok(VersionRole::Approved),
            (Some(_), None) => Ok(VersionRole::Draft),
            (None, Some(_)) => Ok(VersionRole::Historic),
            (Some(_), Some(_)) => Err(VersionError::ConflictingLinks(self.id)),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = <Uuid as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RecordId(s.parse()?))
    }
}

impl fmt::Display for VersionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRole::Approved => f.write_str("approved"),
            VersionRole::Draft => f.write_str("draft"),
            VersionRole::Historic => f.write_str("historic"),
        }
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Value::Ref(value)
    }
}
impl From<TimeStamp<Utc>> for Value {
    fn from(value: TimeStamp<Utc>) -> Self {
        Value::Time(value)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<C> minicbor::Encode<C> for RecordId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        minicbor::Encode::encode(self.0.as_bytes(), e, ctx)
    }
}

impl<'b, C> minicbor::Decode<'b, C> for RecordId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let digest: [u8; 16] = d.decode()?;

        Ok(RecordId(Uuid::from(digest)))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl serde::Serialize for RecordId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl serde::Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.to_rfc3339())
    }
}
