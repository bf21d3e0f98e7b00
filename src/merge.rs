//! Client-side merge
//!
//! Reference model of what a remote client keeps: the merged render tree.
//! Wire diffs are folded into it one by one and it can be rendered back
//! to HTML, so a sequence of partial diffs can be checked against a fresh
//! full render.
//!
//! Merge rules:
//! - a node diff carrying statics replaces the node
//! - a node diff without statics merges into the node already held, and
//!   fails if there is none (the server believed the client had it)
//! - `""` clears a slot
//! - plain comprehensions replace their rows; stream comprehensions apply
//!   reset, deletes, then inserts by dom id
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::trace;

use crate::diff::{WireDiff, WireValue};
use crate::stream::{StreamInsert, StreamPatch};

/// A diff the client cannot apply: client and server are out of sync
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// Partial diff for a node the client does not hold
    #[error("no statics known at `{path}`")]
    MissingStatics { path: String },
    /// Diff kind does not match the node held at that position
    #[error("diff at `{path}` does not match the node held there")]
    KindMismatch { path: String },
    /// Stream rows and stream inserts do not pair up
    #[error("stream at `{path}` has {inserts} inserts for {rows} rows")]
    StreamRows {
        path: String,
        inserts: usize,
        rows: usize,
    },
}

/// One row of a comprehension held by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRow {
    /// Set for stream rows
    pub dom_id: Option<String>,
    pub values: Vec<String>,
}

/// Comprehension held by the client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientList {
    statics: Vec<String>,
    rows: Vec<ClientRow>,
}

impl ClientList {
    pub fn rows(&self) -> &[ClientRow] {
        &self.rows
    }

    /// Dom ids of stream rows, in order
    pub fn dom_ids(&self) -> Vec<&str> {
        self.rows.iter().filter_map(|r| r.dom_id.as_deref()).collect()
    }

    fn replace_rows(&mut self, rows: &[Vec<String>]) {
        self.rows = rows
            .iter()
            .map(|values| ClientRow {
                dom_id: None,
                values: values.clone(),
            })
            .collect();
    }

    fn apply_stream(
        &mut self,
        patch: &StreamPatch,
        rows: &[Vec<String>],
        path: &str,
    ) -> Result<(), MergeError> {
        if patch.inserts.len() != rows.len() {
            return Err(MergeError::StreamRows {
                path: String::from(path),
                inserts: patch.inserts.len(),
                rows: rows.len(),
            });
        }
        if patch.reset {
            self.rows.clear();
        }
        for dom_id in &patch.deletes {
            self.rows.retain(|row| row.dom_id.as_deref() != Some(dom_id.as_str()));
        }
        for (insert, values) in patch.inserts.iter().zip(rows) {
            self.apply_insert(insert, values);
        }
        Ok(())
    }

    fn apply_insert(&mut self, insert: &StreamInsert, values: &[String]) {
        let existing = self
            .rows
            .iter()
            .position(|row| row.dom_id.as_deref() == Some(insert.dom_id.as_str()));
        match existing {
            Some(pos) => self.rows[pos].values = values.to_vec(),
            None if insert.update_only => {
                trace!(dom_id = %insert.dom_id, "update_only insert for unknown row skipped");
                return;
            }
            None => {
                let row = ClientRow {
                    dom_id: Some(insert.dom_id.clone()),
                    values: values.to_vec(),
                };
                match usize::try_from(insert.at) {
                    Ok(at) if at <= self.rows.len() => self.rows.insert(at, row),
                    _ => self.rows.push(row),
                }
            }
        }
        if let Some(limit) = insert.limit {
            let keep = limit.unsigned_abs() as usize;
            if self.rows.len() > keep {
                if limit >= 0 {
                    self.rows.truncate(keep);
                } else {
                    let excess = self.rows.len() - keep;
                    self.rows.drain(..excess);
                }
            }
        }
    }

    fn write_html(&self, out: &mut String) {
        for row in &self.rows {
            interleave(&self.statics, out, |i, out| {
                if let Some(value) = row.values.get(i) {
                    out.push_str(value);
                }
            });
        }
    }
}

/// Slot content held by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNode {
    Text(String),
    Tree(ClientTree),
    List(ClientList),
}

impl ClientNode {
    pub fn as_tree(&self) -> Option<&ClientTree> {
        match self {
            ClientNode::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ClientList> {
        match self {
            ClientNode::List(list) => Some(list),
            _ => None,
        }
    }

    fn write_html(&self, out: &mut String) {
        match self {
            ClientNode::Text(text) => out.push_str(text),
            ClientNode::Tree(tree) => tree.write_html(out),
            ClientNode::List(list) => list.write_html(out),
        }
    }
}

/// Merged render tree held by the client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientTree {
    statics: Vec<String>,
    slots: BTreeMap<usize, ClientNode>,
}

impl ClientTree {
    /// Build from a first-render diff (must carry statics).
    pub fn from_diff(diff: &WireDiff) -> Result<Self, MergeError> {
        let mut tree = ClientTree::default();
        tree.apply_at(diff, "")?;
        Ok(tree)
    }

    /// Merge the next diff for this root.
    pub fn apply(&mut self, diff: &WireDiff) -> Result<(), MergeError> {
        self.apply_at(diff, "")
    }

    pub fn statics(&self) -> &[String] {
        &self.statics
    }

    pub fn slot(&self, index: usize) -> Option<&ClientNode> {
        self.slots.get(&index)
    }

    /// Render the merged tree.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        interleave(&self.statics, out, |i, out| {
            if let Some(node) = self.slots.get(&i) {
                node.write_html(out);
            }
        });
    }

    fn apply_at(&mut self, diff: &WireDiff, path: &str) -> Result<(), MergeError> {
        if diff.is_comprehension() {
            return Err(MergeError::KindMismatch {
                path: String::from(path),
            });
        }
        match &diff.statics {
            Some(statics) => {
                self.statics = statics.clone();
                self.slots.clear();
            }
            None if self.statics.is_empty() => {
                return Err(MergeError::MissingStatics {
                    path: String::from(path),
                });
            }
            None => {}
        }
        for (&index, value) in &diff.slots {
            let path = format!("{path}/{index}");
            self.apply_slot(index, value, &path)?;
        }
        Ok(())
    }

    fn apply_slot(&mut self, index: usize, value: &WireValue, path: &str) -> Result<(), MergeError> {
        let diff = match value {
            WireValue::Text(text) if text.is_empty() => {
                self.slots.remove(&index);
                return Ok(());
            }
            WireValue::Text(text) => {
                self.slots.insert(index, ClientNode::Text(text.clone()));
                return Ok(());
            }
            WireValue::Diff(diff) => diff,
        };

        if diff.is_comprehension() {
            if let Some(statics) = &diff.statics {
                let list = ClientList {
                    statics: statics.clone(),
                    rows: Vec::new(),
                };
                self.slots.insert(index, ClientNode::List(list));
            }
            let list = match self.slots.get_mut(&index) {
                Some(ClientNode::List(list)) => list,
                None => return Err(missing(path)),
                Some(_) => return Err(mismatch(path)),
            };
            let rows = diff.dynamics.as_deref().unwrap_or_default();
            return match &diff.stream {
                Some(patch) => list.apply_stream(patch, rows, path),
                None => {
                    list.replace_rows(rows);
                    Ok(())
                }
            };
        }

        if diff.statics.is_some() {
            self.slots.insert(index, ClientNode::Tree(ClientTree::default()));
        }
        match self.slots.get_mut(&index) {
            Some(ClientNode::Tree(tree)) => tree.apply_at(diff, path),
            None => Err(missing(path)),
            Some(_) => Err(mismatch(path)),
        }
    }
}

fn missing(path: &str) -> MergeError {
    MergeError::MissingStatics {
        path: String::from(path),
    }
}

fn mismatch(path: &str) -> MergeError {
    MergeError::KindMismatch {
        path: String::from(path),
    }
}

/// Write `statics[0] slot(0) statics[1] ... statics[n]`.
fn interleave(statics: &[String], out: &mut String, mut slot: impl FnMut(usize, &mut String)) {
    for (i, fragment) in statics.iter().enumerate() {
        out.push_str(fragment);
        if i + 1 < statics.len() {
            slot(i, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_rendered;
    use crate::fingerprint::FingerprintTree;
    use crate::rendered::{Comprehension, Dynamic, Rendered};

    fn text(s: &str) -> WireValue {
        WireValue::Text(String::from(s))
    }

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| String::from(*s)).collect()
    }

    fn node(statics: &[&str], slots: Vec<(usize, WireValue)>) -> WireDiff {
        WireDiff {
            statics: Some(strings(statics)),
            slots: slots.into_iter().collect(),
            ..WireDiff::default()
        }
    }

    fn partial(slots: Vec<(usize, WireValue)>) -> WireDiff {
        WireDiff {
            slots: slots.into_iter().collect(),
            ..WireDiff::default()
        }
    }

    fn insert(dom_id: &str, at: i64, limit: Option<i64>) -> StreamInsert {
        StreamInsert {
            dom_id: String::from(dom_id),
            at,
            limit,
            update_only: false,
        }
    }

    fn stream_diff(statics: bool, inserts: Vec<StreamInsert>, deletes: &[&str], reset: bool) -> WireDiff {
        let rows = inserts.iter().map(|i| vec![i.dom_id.to_uppercase()]).collect();
        WireDiff {
            statics: statics.then(|| strings(&["<li>", "</li>"])),
            dynamics: Some(rows),
            stream: Some(StreamPatch {
                name: String::from("s"),
                inserts,
                deletes: strings(deletes),
                reset,
            }),
            ..WireDiff::default()
        }
    }

    fn list_root(list: WireDiff) -> WireDiff {
        node(&["<ul>", "</ul>"], vec![(0, WireValue::Diff(list))])
    }

    fn ids(tree: &ClientTree) -> Vec<String> {
        tree.slot(0)
            .and_then(ClientNode::as_list)
            .map(|l| l.dom_ids().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    // ── Template nodes ─────────────────────────────────────────────────

    #[test]
    fn test_from_diff_renders() {
        let tree = ClientTree::from_diff(&node(&["<p>", "</p>"], vec![(0, text("hi"))])).unwrap();
        assert_eq!(tree.to_html(), "<p>hi</p>");
        assert_eq!(tree.statics(), &strings(&["<p>", "</p>"])[..]);
    }

    #[test]
    fn test_from_partial_diff_fails() {
        let err = ClientTree::from_diff(&partial(vec![(0, text("x"))])).unwrap_err();
        assert_eq!(
            err,
            MergeError::MissingStatics {
                path: String::new()
            }
        );
    }

    #[test]
    fn test_partial_updates_slot() {
        let mut tree =
            ClientTree::from_diff(&node(&["<p>", "</p>"], vec![(0, text("hi"))])).unwrap();
        tree.apply(&partial(vec![(0, text("bye"))])).unwrap();
        assert_eq!(tree.to_html(), "<p>bye</p>");
        tree.apply(&WireDiff::default()).unwrap();
        assert_eq!(tree.to_html(), "<p>bye</p>");
    }

    #[test]
    fn test_tombstone_clears_slot() {
        let mut tree =
            ClientTree::from_diff(&node(&["<p>", "</p>"], vec![(0, text("hi"))])).unwrap();
        tree.apply(&partial(vec![(0, text(""))])).unwrap();
        assert_eq!(tree.to_html(), "<p></p>");
        assert!(tree.slot(0).is_none());
    }

    #[test]
    fn test_partial_nested_without_node_is_desync() {
        let mut tree = ClientTree::from_diff(&node(&["<div>", "</div>"], vec![])).unwrap();
        let err = tree
            .apply(&partial(vec![(0, WireValue::Diff(partial(vec![(0, text("x"))])))]))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::MissingStatics {
                path: String::from("/0")
            }
        );
    }

    #[test]
    fn test_partial_list_into_text_slot_mismatch() {
        let mut tree =
            ClientTree::from_diff(&node(&["<div>", "</div>"], vec![(0, text("t"))])).unwrap();
        let list = WireDiff {
            dynamics: Some(vec![]),
            ..WireDiff::default()
        };
        let err = tree.apply(&partial(vec![(0, WireValue::Diff(list))])).unwrap_err();
        assert!(matches!(err, MergeError::KindMismatch { .. }));
    }

    #[test]
    fn test_new_statics_replace_node() {
        let mut tree =
            ClientTree::from_diff(&node(&["<b>", "|", "</b>"], vec![(0, text("1")), (1, text("2"))]))
                .unwrap();
        tree.apply(&node(&["<i>", "</i>"], vec![(0, text("3"))])).unwrap();
        assert_eq!(tree.to_html(), "<i>3</i>");
    }

    // ── Plain comprehensions ───────────────────────────────────────────

    #[test]
    fn test_plain_rows_replaced() {
        let first = WireDiff {
            statics: Some(strings(&["<li>", "</li>"])),
            dynamics: Some(vec![strings(&["a"]), strings(&["b"])]),
            ..WireDiff::default()
        };
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();
        assert_eq!(tree.to_html(), "<ul><li>a</li><li>b</li></ul>");

        let next = WireDiff {
            dynamics: Some(vec![strings(&["c"])]),
            ..WireDiff::default()
        };
        tree.apply(&partial(vec![(0, WireValue::Diff(next))])).unwrap();
        assert_eq!(tree.to_html(), "<ul><li>c</li></ul>");
    }

    // ── Streams ────────────────────────────────────────────────────────

    #[test]
    fn test_stream_appends_and_prepends() {
        let first = stream_diff(true, vec![insert("a", -1, None), insert("b", -1, None)], &[], false);
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();
        let next = stream_diff(false, vec![insert("c", 0, None)], &[], false);
        tree.apply(&partial(vec![(0, WireValue::Diff(next))])).unwrap();
        assert_eq!(ids(&tree), vec!["c", "a", "b"]);
        assert_eq!(tree.to_html(), "<ul><li>C</li><li>A</li><li>B</li></ul>");
    }

    #[test]
    fn test_stream_existing_id_updates_in_place() {
        let first = stream_diff(true, vec![insert("a", -1, None), insert("b", -1, None)], &[], false);
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();
        let mut next = stream_diff(false, vec![insert("a", -1, None)], &[], false);
        next.dynamics = Some(vec![strings(&["A2"])]);
        tree.apply(&partial(vec![(0, WireValue::Diff(next))])).unwrap();
        assert_eq!(ids(&tree), vec!["a", "b"]);
        assert_eq!(tree.to_html(), "<ul><li>A2</li><li>B</li></ul>");
    }

    #[test]
    fn test_stream_deletes_and_reset() {
        let first = stream_diff(true, vec![insert("a", -1, None), insert("b", -1, None)], &[], false);
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();

        let del = stream_diff(false, vec![], &["a"], false);
        tree.apply(&partial(vec![(0, WireValue::Diff(del))])).unwrap();
        assert_eq!(ids(&tree), vec!["b"]);

        let reset = stream_diff(false, vec![insert("z", -1, None)], &[], true);
        tree.apply(&partial(vec![(0, WireValue::Diff(reset))])).unwrap();
        assert_eq!(ids(&tree), vec!["z"]);
    }

    #[test]
    fn test_stream_limits() {
        let first = stream_diff(
            true,
            vec![insert("a", -1, None), insert("b", -1, None), insert("c", -1, Some(-2))],
            &[],
            false,
        );
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();
        assert_eq!(ids(&tree), vec!["b", "c"]);

        let next = stream_diff(false, vec![insert("d", 0, Some(2))], &[], false);
        tree.apply(&partial(vec![(0, WireValue::Diff(next))])).unwrap();
        assert_eq!(ids(&tree), vec!["d", "b"]);
    }

    #[test]
    fn test_stream_update_only_skips_unknown() {
        let first = stream_diff(true, vec![insert("a", -1, None)], &[], false);
        let mut tree = ClientTree::from_diff(&list_root(first)).unwrap();
        let mut ghost = insert("g", -1, None);
        ghost.update_only = true;
        let next = stream_diff(false, vec![ghost], &[], false);
        tree.apply(&partial(vec![(0, WireValue::Diff(next))])).unwrap();
        assert_eq!(ids(&tree), vec!["a"]);
    }

    #[test]
    fn test_stream_rows_must_pair_with_inserts() {
        let mut bad = stream_diff(true, vec![insert("a", -1, None)], &[], false);
        bad.dynamics = Some(vec![]);
        let err = ClientTree::from_diff(&list_root(bad)).unwrap_err();
        assert!(matches!(err, MergeError::StreamRows { inserts: 1, rows: 0, .. }));
    }

    // ── Against the diff engine ────────────────────────────────────────

    #[test]
    fn test_merged_html_matches_full_render() {
        let view = |title: &str, show: bool, items: &[&str]| {
            let badge = if show {
                Dynamic::Nested(Rendered::new(["<em>", "</em>"], vec![Dynamic::literal("new")]))
            } else {
                Dynamic::Absent
            };
            let list = Comprehension::new(
                ["<li>", "</li>"],
                items.iter().map(|i| vec![String::from(*i)]).collect(),
            );
            Rendered::new(
                ["<h1>", "</h1>", "<ul>", "</ul>"],
                vec![Dynamic::literal(title), badge, list.into()],
            )
        };

        let renders = [
            view("a", true, &["x"]),
            view("a", false, &["x", "y"]),
            view("b", false, &["x", "y"]),
            view("b", true, &[]),
        ];

        let mut print = FingerprintTree::Empty;
        let mut client: Option<ClientTree> = None;
        for rendered in &renders {
            let (diff, next) = diff_rendered(rendered, &print).unwrap();
            print = next;
            match client.as_mut() {
                Some(tree) => tree.apply(&diff).unwrap(),
                None => client = Some(ClientTree::from_diff(&diff).unwrap()),
            }
            assert_eq!(client.as_ref().unwrap().to_html(), rendered.to_html());
        }
    }
}
