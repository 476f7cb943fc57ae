// src/document.rs
//! Document identity, typed field values and the per-type field descriptor table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit primary key of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Smallest possible id; lower bound for composite index keys
    pub const MIN: DocumentId = DocumentId(Uuid::from_u128(0));
    /// Largest possible id; upper bound for composite index keys
    pub const MAX: DocumentId = DocumentId(Uuid::from_u128(u128::MAX));

    /// Fresh random (v4) id
    pub fn new() -> Self {
        DocumentId(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        DocumentId(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        DocumentId(uuid)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A storable document type.
///
/// The collection owns the id: `set_id` is called on insert when `id()` is
/// `None`, and on update to pin the replacement to the existing key.
/// `schema()` lists the fields queries and indexes may refer to.
pub trait Document: Clone + Send + Sync + 'static {
    fn id(&self) -> Option<DocumentId>;

    fn set_id(&mut self, id: DocumentId);

    fn schema() -> Schema<Self>
    where
        Self: Sized;
}

/// Declared value type of an indexable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    String,
    Id,
}

impl FieldKind {
    /// Whether a constant of this value can be compared against a field of this kind
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (FieldKind::Bool, FieldValue::Bool(_))
                | (FieldKind::Int, FieldValue::Int(_))
                | (FieldKind::Int, FieldValue::Float(_))
                | (FieldKind::Float, FieldValue::Int(_))
                | (FieldKind::Float, FieldValue::Float(_))
                | (FieldKind::String, FieldValue::String(_))
                | (FieldKind::Id, FieldValue::Id(_))
        )
    }
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

/// Field value - used both as index key and as the query interpreter's value type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    String(String),
    Id(DocumentId),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::String(_) => 3,
            FieldValue::Id(_) => 4,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: Null < Bool < numbers < String < Id.
/// Int and Float compare numerically with each other.
impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            (Int(a), Float(b)) => cmp_int_float(*a, b.0),
            (Float(a), Int(b)) => cmp_int_float(*b, a.0).reverse(),
            (String(a), String(b)) => a.cmp(b),
            (Id(a), Id(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Exact `i64` vs `f64` comparison; NaN sorts above every integer.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float past i64::MAX
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() || float >= UPPER {
        return Ordering::Less;
    }
    if float < -UPPER {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let fraction = float - whole;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        unequal => unequal,
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x.0),
            FieldValue::String(s) => write!(f, "{:?}", s),
            FieldValue::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(OrderedFloat(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<DocumentId> for FieldValue {
    fn from(value: DocumentId) -> Self {
        FieldValue::Id(value)
    }
}

impl<V: Into<FieldValue>> From<Option<V>> for FieldValue {
    fn from(value: Option<V>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Reads one field out of a document
pub type FieldAccessor<T> = fn(&T) -> FieldValue;

/// One entry of a [`Schema`]
pub struct FieldDescriptor<T> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub accessor: FieldAccessor<T>,
}

impl<T> FieldDescriptor<T> {
    pub fn value_of(&self, doc: &T) -> FieldValue {
        (self.accessor)(doc)
    }
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        FieldDescriptor {
            name: self.name,
            kind: self.kind,
            accessor: self.accessor,
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Field-descriptor table of a document type.
///
/// Queries and index definitions resolve field names here; a name that is
/// not in the table cannot be filtered, sorted or indexed on.
///
/// ```ignore
/// Schema::builder()
///     .field("name", FieldKind::String, |p: &Person| p.name.clone().into())
///     .field("age", FieldKind::Int, |p: &Person| p.age.into())
///     .build()
/// ```
pub struct Schema<T> {
    fields: BTreeMap<&'static str, FieldDescriptor<T>>,
}

impl<T> Schema<T> {
    pub fn builder() -> SchemaBuilder<T> {
        SchemaBuilder {
            fields: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.get(name)
    }

    pub fn value_of(&self, doc: &T, name: &str) -> Option<FieldValue> {
        self.fields.get(name).map(|descriptor| descriptor.value_of(doc))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.values()).finish()
    }
}

pub struct SchemaBuilder<T> {
    fields: BTreeMap<&'static str, FieldDescriptor<T>>,
}

impl<T> SchemaBuilder<T> {
    /// Register a field; a later registration under the same name replaces the earlier one
    pub fn field(mut self, name: &'static str, kind: FieldKind, accessor: FieldAccessor<T>) -> Self {
        self.fields.insert(
            name,
            FieldDescriptor {
                name,
                kind,
                accessor,
            },
        );
        self
    }

    pub fn build(self) -> Schema<T> {
        Schema {
            fields: self.fields,
        }
    }
}
