//! Boundary with the managed document store.
//!
//! The store offers live listeners and one-shot reads over collections of
//! JSON documents, with equality/range filters and an optional ordering.
//! Ordered queries need a declared index; without one the store rejects the
//! query with [`StoreErrorCode::FailedPrecondition`].

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub data: Map<String, Value>,
}

impl RawDocument {
    /// Non-object `data` is stored as an empty document.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { id: id.into(), data }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

pub type Snapshot = Vec<RawDocument>;

/// Live listener output. Dropping the stream releases the listener.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreErrorCode {
    Unavailable,
    DeadlineExceeded,
    FailedPrecondition,
    PermissionDenied,
    NotFound,
    Internal,
    Unknown,
}

impl StoreErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreErrorCode::Unavailable => "unavailable",
            StoreErrorCode::DeadlineExceeded => "deadline-exceeded",
            StoreErrorCode::FailedPrecondition => "failed-precondition",
            StoreErrorCode::PermissionDenied => "permission-denied",
            StoreErrorCode::NotFound => "not-found",
            StoreErrorCode::Internal => "internal",
            StoreErrorCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_index(collection: &str, field: &str) -> Self {
        Self::new(
            StoreErrorCode::FailedPrecondition,
            format!("The query requires an index on {collection}.{field}"),
        )
    }

    /// The store cannot serve this query shape; the caller should degrade.
    pub fn is_failed_precondition(&self) -> bool {
        self.code == StoreErrorCode::FailedPrecondition
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            StoreErrorCode::Unavailable | StoreErrorCode::DeadlineExceeded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn matches(&self, doc: &RawDocument) -> bool {
        let Some(actual) = doc.field(&self.field) else {
            return false;
        };
        let ordering = compare_values(Some(actual), Some(&self.value));
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Lte => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl CollectionQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Same collection and filters, no ordering: servable without an index.
    pub fn without_ordering(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            filters: self.filters.clone(),
            order_by: None,
        }
    }

    pub fn matches(&self, doc: &RawDocument) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Apply filters and ordering to an unfiltered collection snapshot.
    pub fn evaluate(&self, documents: impl IntoIterator<Item = RawDocument>) -> Snapshot {
        let mut selected: Snapshot = documents.into_iter().filter(|d| self.matches(d)).collect();
        if let Some(order) = &self.order_by {
            sort_documents(&mut selected, order);
        }
        selected
    }
}

impl fmt::Display for CollectionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        for filter in &self.filters {
            write!(f, " where {} {} {}", filter.field, filter.op.sql(), filter.value)?;
        }
        if let Some(order) = &self.order_by {
            write!(f, " order by {} {:?}", order.field, order.direction)?;
        }
        Ok(())
    }
}

/// Client-side ordering used when the store could not order for us.
/// Equal keys fall back to document id so the result is deterministic.
pub fn sort_documents(documents: &mut Snapshot, order: &OrderBy) {
    documents.sort_by(|a, b| {
        let primary = compare_values(a.field(&order.field), b.field(&order.field));
        let primary = match order.direction {
            Direction::Asc => primary,
            Direction::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// `(seconds, nanoseconds)` of a store timestamp object, in either the
/// `seconds` or the `_seconds` spelling.
fn timestamp_parts(value: &Value) -> Option<(i64, i64)> {
    let part = |names: [&str; 2]| names.iter().find_map(|name| value.get(*name)?.as_i64());
    let seconds = part(["seconds", "_seconds"])?;
    Some((seconds, part(["nanoseconds", "_nanoseconds"]).unwrap_or(0)))
}

/// Total order over JSON values: missing/null, bool, number, string, other.
/// Timestamp objects compare chronologically.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_)))
            if timestamp_parts(x).is_some() && timestamp_parts(y).is_some() =>
        {
            timestamp_parts(x).cmp(&timestamp_parts(y))
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_)))
        | (Some(x @ Value::Array(_)), Some(y @ Value::Array(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a live listener. Errors may arrive immediately or as stream items.
    async fn subscribe(&self, query: &CollectionQuery) -> Result<SnapshotStream, StoreError>;

    async fn query(&self, query: &CollectionQuery) -> Result<Snapshot, StoreError>;
}
