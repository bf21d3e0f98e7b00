//! Live streams
//!
//! A live stream is a keyed, ordered collection that the server never
//! keeps a snapshot of. Between renders it accumulates a log of inserts,
//! deletes and an optional reset; on render the log is folded into a
//! comprehension diff and cleared.
//!
//! The log is write-only. It can be read back exactly once per render,
//! through [`LiveStream::consume`], after [`LiveStream::mark_consumable`]:
//!
//! ```text
//! Pending --mark_consumable--> Consumable --consume--> Consumed
//!    ^                                                    |
//!    +------------------ mark_consumable -----------------+
//! ```
//!
//! Author: Moroya Sakamoto

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::rendered::Comprehension;

/// Maps an item to its stable DOM id
pub type DomIdFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

type ResolveFn<T> = Arc<dyn Fn(&T) -> Result<String, StreamError> + Send + Sync>;

/// Position sentinel: append at the end
pub const APPEND: i64 = -1;

/// Misconfiguration or misuse of a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The default dom id needs an `id` field on every item
    #[error("stream `{stream}`: item {item} has no usable `id` field; configure a dom_id function")]
    MissingId { stream: String, item: String },
    /// Iterated without `mark_consumable`, or iterated twice in one pass
    #[error("stream `{stream}` can only be consumed once per render, after mark_consumable")]
    NotConsumable { stream: String },
}

/// Where a stream stands in the one-shot read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consumption {
    /// Accumulating; reads are refused
    #[default]
    Pending,
    /// Armed for exactly one read
    Consumable,
    /// Read this pass; reads are refused until re-armed
    Consumed,
}

/// Stream-wide defaults
pub struct StreamOptions<T> {
    /// Custom dom id; default is `"{name}-{item.id}"`
    pub dom_id: Option<DomIdFn<T>>,
    /// Limit applied to the initial items
    pub limit: Option<i64>,
    /// Initial items only update rows the client already has
    pub update_only: bool,
}

impl<T> Default for StreamOptions<T> {
    fn default() -> Self {
        Self {
            dom_id: None,
            limit: None,
            update_only: false,
        }
    }
}

impl<T> Clone for StreamOptions<T> {
    fn clone(&self) -> Self {
        Self {
            dom_id: self.dom_id.clone(),
            limit: self.limit,
            update_only: self.update_only,
        }
    }
}

impl<T> fmt::Debug for StreamOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("dom_id", &self.dom_id.as_ref().map(|_| "<fn>"))
            .field("limit", &self.limit)
            .field("update_only", &self.update_only)
            .finish()
    }
}

impl<T> StreamOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dom_id(mut self, dom_id: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.dom_id = Some(Arc::new(dom_id));
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn update_only(mut self, update_only: bool) -> Self {
        self.update_only = update_only;
        self
    }
}

/// Per-insert placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Target index; [`APPEND`] (-1) appends, 0 prepends
    pub at: i64,
    /// Positive keeps the first `limit` rows, negative the last `|limit|`
    pub limit: Option<i64>,
    /// Only update an existing row, never add one
    pub update_only: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            at: APPEND,
            limit: None,
            update_only: false,
        }
    }
}

impl InsertOptions {
    pub fn at(at: i64) -> Self {
        Self {
            at,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn update_only(mut self, update_only: bool) -> Self {
        self.update_only = update_only;
        self
    }
}

/// One insert as sent to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInsert {
    pub dom_id: String,
    pub at: i64,
    pub limit: Option<i64>,
    pub update_only: bool,
}

/// Folded stream log, attached to a comprehension diff
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamPatch {
    /// Stream name, used as the stream ref on the wire
    pub name: String,
    /// Inserts in presentation order, one per rendered row
    pub inserts: Vec<StreamInsert>,
    /// Deleted dom ids, most recent first
    pub deletes: Vec<String>,
    /// Client must clear the collection before applying the rest
    pub reset: bool,
}

impl StreamPatch {
    /// Patch with nothing pending
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True if applying this patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && !self.reset
    }
}

#[derive(Debug, Clone)]
struct PendingInsert<T> {
    dom_id: String,
    at: i64,
    item: T,
    limit: Option<i64>,
    update_only: bool,
}

/// Keyed insert/delete/reset log for one named collection.
///
/// Owned by a single render root and mutated only between its renders.
pub struct LiveStream<T> {
    name: String,
    dom_id: ResolveFn<T>,
    /// Oldest first; walked newest first when consumed
    inserts: Vec<PendingInsert<T>>,
    /// Oldest first; emitted newest first
    deletes: Vec<String>,
    reset: bool,
    consumption: Consumption,
}

impl<T> fmt::Debug for LiveStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveStream")
            .field("name", &self.name)
            .field("inserts", &self.inserts.len())
            .field("deletes", &self.deletes.len())
            .field("reset", &self.reset)
            .field("consumption", &self.consumption)
            .finish()
    }
}

/// `"{name}-{id}"` from the item's serialized `id` field
fn default_dom_id<T: Serialize>(name: &str, item: &T) -> Result<String, StreamError> {
    let missing = |item: String| StreamError::MissingId {
        stream: String::from(name),
        item,
    };
    let value = serde_json::to_value(item).map_err(|e| missing(e.to_string()))?;
    match value.get("id") {
        Some(serde_json::Value::String(id)) => Ok(format!("{name}-{id}")),
        Some(serde_json::Value::Number(id)) => Ok(format!("{name}-{id}")),
        _ => Err(missing(value.to_string())),
    }
}

impl<T: Serialize + 'static> LiveStream<T> {
    /// Create a stream whose dom ids come from `options.dom_id`, or from
    /// each item's `id` field when none is given.
    ///
    /// Every initial item is queued as an append with the stream's
    /// limit and update_only defaults.
    pub fn new(
        name: impl Into<String>,
        items: impl IntoIterator<Item = T>,
        options: StreamOptions<T>,
    ) -> Result<Self, StreamError> {
        let name = name.into();
        let dom_id: ResolveFn<T> = match options.dom_id.clone() {
            Some(custom) => Arc::new(move |item: &T| Ok(custom(item))),
            None => {
                let prefix = name.clone();
                Arc::new(move |item: &T| default_dom_id(&prefix, item))
            }
        };
        let mut stream = Self::empty(name, dom_id);
        let defaults = initial_insert(&options);
        for item in items {
            stream.insert_item(item, defaults)?;
        }
        Ok(stream)
    }
}

impl<T: 'static> LiveStream<T> {
    /// Create a stream with an explicit dom id function; items need not
    /// be serializable.
    pub fn with_dom_id(
        name: impl Into<String>,
        dom_id: impl Fn(&T) -> String + Send + Sync + 'static,
        items: impl IntoIterator<Item = T>,
        options: StreamOptions<T>,
    ) -> Self {
        let dom_id: DomIdFn<T> = Arc::new(dom_id);
        let resolve = dom_id.clone();
        let mut stream = Self::empty(name.into(), Arc::new(move |item: &T| Ok(resolve(item))));
        let defaults = initial_insert(&options);
        for item in items {
            let id = dom_id(&item);
            stream.push_insert(id, item, defaults);
        }
        stream
    }
}

fn initial_insert<T>(options: &StreamOptions<T>) -> InsertOptions {
    InsertOptions {
        at: APPEND,
        limit: options.limit,
        update_only: options.update_only,
    }
}

impl<T> LiveStream<T> {
    fn empty(name: String, dom_id: ResolveFn<T>) -> Self {
        Self {
            name,
            dom_id,
            inserts: Vec::new(),
            deletes: Vec::new(),
            reset: false,
            consumption: Consumption::Pending,
        }
    }

    fn push_insert(&mut self, dom_id: String, item: T, options: InsertOptions) {
        self.inserts.push(PendingInsert {
            dom_id,
            at: options.at,
            item,
            limit: options.limit,
            update_only: options.update_only,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consumption(&self) -> Consumption {
        self.consumption
    }

    /// True if the client will be told to clear the collection
    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// Compute the dom id this stream assigns to `item`
    pub fn dom_id(&self, item: &T) -> Result<String, StreamError> {
        (self.dom_id)(item)
    }

    /// Queue an insert. A later insert of the same dom id wins.
    pub fn insert_item(&mut self, item: T, options: InsertOptions) -> Result<(), StreamError> {
        let dom_id = self.dom_id(&item)?;
        self.push_insert(dom_id, item, options);
        Ok(())
    }

    /// Queue removal of `item`'s row
    pub fn delete_item(&mut self, item: &T) -> Result<(), StreamError> {
        let dom_id = self.dom_id(item)?;
        self.delete_item_by_dom_id(dom_id);
        Ok(())
    }

    pub fn delete_item_by_dom_id(&mut self, dom_id: impl Into<String>) {
        self.deletes.push(dom_id.into());
    }

    /// Clear the client collection before the pending inserts/deletes
    /// are applied. Pending operations are kept.
    pub fn reset(&mut self) {
        self.reset = true;
    }

    /// Arm the stream for one read. Idempotent.
    pub fn mark_consumable(&mut self) {
        self.consumption = Consumption::Consumable;
    }

    /// Drop everything pending after it has been folded into a diff.
    /// Does not re-arm consumption.
    pub fn prune(&mut self) {
        self.inserts.clear();
        self.deletes.clear();
        self.reset = false;
    }

    /// Newest insert per dom id, in presentation order
    fn deduped(&self) -> Vec<&PendingInsert<T>> {
        let mut seen = HashSet::new();
        let mut kept: Vec<&PendingInsert<T>> = self
            .inserts
            .iter()
            .rev()
            .filter(|insert| seen.insert(insert.dom_id.as_str()))
            .collect();
        kept.reverse();
        kept
    }

    /// The render read: `(dom_id, item)` pairs, newest insert per dom id,
    /// in presentation order.
    ///
    /// Fails unless the stream was armed with `mark_consumable` since its
    /// last read.
    pub fn consume(&mut self) -> Result<Vec<(&str, &T)>, StreamError> {
        if self.consumption != Consumption::Consumable {
            warn!(stream = %self.name, state = ?self.consumption, "stream read refused");
            return Err(StreamError::NotConsumable {
                stream: self.name.clone(),
            });
        }
        self.consumption = Consumption::Consumed;
        Ok(self
            .deduped()
            .into_iter()
            .map(|insert| (insert.dom_id.as_str(), &insert.item))
            .collect())
    }

    /// Pending operations as sent on the wire
    pub fn to_patch(&self) -> StreamPatch {
        StreamPatch {
            name: self.name.clone(),
            inserts: self
                .deduped()
                .into_iter()
                .map(|insert| StreamInsert {
                    dom_id: insert.dom_id.clone(),
                    at: insert.at,
                    limit: insert.limit,
                    update_only: insert.update_only,
                })
                .collect(),
            deletes: self.deletes.iter().rev().cloned().collect(),
            reset: self.reset,
        }
    }
}

impl Comprehension {
    /// Fold a live stream into a comprehension.
    ///
    /// Reads the stream (it must be consumable), renders one row per
    /// surviving insert with `render_row(dom_id, item)`, attaches the
    /// stream patch and prunes the stream.
    pub fn from_stream<T, S, F>(
        statics: impl IntoIterator<Item = S>,
        stream: &mut LiveStream<T>,
        mut render_row: F,
    ) -> Result<Self, StreamError>
    where
        S: Into<String>,
        F: FnMut(&str, &T) -> Vec<String>,
    {
        let rows: Vec<Vec<String>> = stream
            .consume()?
            .into_iter()
            .map(|(dom_id, item)| render_row(dom_id, item))
            .collect();
        let patch = stream.to_patch();
        debug!(
            stream = %patch.name,
            inserts = patch.inserts.len(),
            deletes = patch.deletes.len(),
            reset = patch.reset,
            "folded stream"
        );
        stream.prune();
        Ok(Comprehension::new(statics, rows).with_stream(patch))
    }
}
