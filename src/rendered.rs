//! Rendered tree model
//!
//! One render pass of a compiled template: static fragments interleaved
//! with dynamic slots. A slot holds escaped text, a nested tree, a
//! comprehension (repeated template), or nothing at all.
//!
//! `statics.len() == dynamics.len() + 1` always: fragment `i` sits right
//! before slot `i`, the last fragment trails the final slot.
//!
//! Author: Moroya Sakamoto

use crate::fingerprint::{fingerprint_statics, Fingerprint};
use crate::stream::StreamPatch;

/// Content of one dynamic slot
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    /// Already-escaped text
    Literal(String),
    /// Nested template
    Nested(Rendered),
    /// Repeated template over a collection
    Comprehension(Comprehension),
    /// Slot renders nothing (false conditional, missing assign)
    Absent,
}

impl Dynamic {
    pub fn literal(text: impl Into<String>) -> Self {
        Dynamic::Literal(text.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Dynamic::Absent)
    }
}

impl From<Rendered> for Dynamic {
    fn from(rendered: Rendered) -> Self {
        Dynamic::Nested(rendered)
    }
}

impl From<Comprehension> for Dynamic {
    fn from(comprehension: Comprehension) -> Self {
        Dynamic::Comprehension(comprehension)
    }
}

impl From<Option<String>> for Dynamic {
    fn from(text: Option<String>) -> Self {
        text.map_or(Dynamic::Absent, Dynamic::Literal)
    }
}

/// One render of a template node
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Static fragments, one more than there are slots
    pub statics: Vec<String>,
    /// Dynamic slots, identified by position
    pub dynamics: Vec<Dynamic>,
    /// Template identity: equal iff same statics and slot count
    pub fingerprint: Fingerprint,
}

impl Rendered {
    /// Build a node whose fingerprint is derived from its statics.
    pub fn new<S: Into<String>>(
        statics: impl IntoIterator<Item = S>,
        dynamics: Vec<Dynamic>,
    ) -> Self {
        let statics: Vec<String> = statics.into_iter().map(Into::into).collect();
        let fingerprint = fingerprint_statics(&statics);
        Self {
            statics,
            dynamics,
            fingerprint,
        }
    }

    /// Build a node with a fingerprint assigned by the template compiler.
    pub fn with_fingerprint<S: Into<String>>(
        fingerprint: Fingerprint,
        statics: impl IntoIterator<Item = S>,
        dynamics: Vec<Dynamic>,
    ) -> Self {
        Self {
            statics: statics.into_iter().map(Into::into).collect(),
            dynamics,
            fingerprint,
        }
    }

    /// Number of dynamic slots
    pub fn slot_count(&self) -> usize {
        self.dynamics.len()
    }

    /// Shallow fencepost check (this node only)
    pub fn is_well_formed(&self) -> bool {
        self.statics.len() == self.dynamics.len() + 1
    }

    /// Get a slot by index
    pub fn slot(&self, index: usize) -> Option<&Dynamic> {
        self.dynamics.get(index)
    }

    /// Full HTML of this render, with no diffing.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        for (i, fragment) in self.statics.iter().enumerate() {
            out.push_str(fragment);
            match self.dynamics.get(i) {
                Some(Dynamic::Literal(text)) => out.push_str(text),
                Some(Dynamic::Nested(nested)) => nested.write_html(out),
                Some(Dynamic::Comprehension(c)) => c.write_html(out),
                Some(Dynamic::Absent) | None => {}
            }
        }
    }
}

/// Repeated template: shared statics, one row of text values per item
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Comprehension {
    /// Static fragments shared by every row
    pub statics: Vec<String>,
    /// One row per item; each row has `statics.len() - 1` values
    pub dynamics: Vec<Vec<String>>,
    /// Pending stream patch when the source is a live stream
    pub stream: Option<StreamPatch>,
}

impl Comprehension {
    pub fn new<S: Into<String>>(
        statics: impl IntoIterator<Item = S>,
        dynamics: Vec<Vec<String>>,
    ) -> Self {
        Self {
            statics: statics.into_iter().map(Into::into).collect(),
            dynamics,
            stream: None,
        }
    }

    pub fn with_stream(mut self, patch: StreamPatch) -> Self {
        self.stream = Some(patch);
        self
    }

    /// Number of rendered rows
    pub fn row_count(&self) -> usize {
        self.dynamics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dynamics.is_empty()
    }

    /// True if this comprehension was folded from a live stream
    pub fn is_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Values each row must carry
    pub fn row_width(&self) -> usize {
        self.statics.len().saturating_sub(1)
    }

    /// Rows rendered back to back. For a stream this is only the
    /// pending batch, not what the client holds.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        for row in &self.dynamics {
            for (i, fragment) in self.statics.iter().enumerate() {
                out.push_str(fragment);
                if let Some(value) = row.get(i) {
                    out.push_str(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_fingerprint() {
        let a = Rendered::new(["<p>", "</p>"], vec![Dynamic::literal("hi")]);
        let b = Rendered::new(["<p>", "</p>"], vec![Dynamic::literal("bye")]);
        assert_eq!(a.fingerprint, b.fingerprint, "same template, same fingerprint");
    }

    #[test]
    fn test_branches_get_distinct_fingerprints() {
        let yes = Rendered::new(["<b>", "</b>"], vec![Dynamic::literal("x")]);
        let no = Rendered::new(["<i>", "</i>"], vec![Dynamic::literal("x")]);
        assert_ne!(yes.fingerprint, no.fingerprint);
    }

    #[test]
    fn test_slot_count_changes_fingerprint() {
        let one = Rendered::new(["a", "b"], vec![Dynamic::Absent]);
        let two = Rendered::new(["a", "b", ""], vec![Dynamic::Absent, Dynamic::Absent]);
        assert_ne!(one.fingerprint, two.fingerprint);
    }

    #[test]
    fn test_with_fingerprint_keeps_given_value() {
        let r = Rendered::with_fingerprint(7, ["x"], vec![]);
        assert_eq!(r.fingerprint, 7);
        assert_eq!(r.slot_count(), 0);
    }

    #[test]
    fn test_well_formed() {
        let good = Rendered::new(["<p>", "</p>"], vec![Dynamic::Absent]);
        assert!(good.is_well_formed());
        let bad = Rendered::new(["<p>"], vec![Dynamic::Absent]);
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_slot_lookup() {
        let r = Rendered::new(["", "", ""], vec![Dynamic::literal("a"), Dynamic::Absent]);
        assert_eq!(r.slot(0), Some(&Dynamic::literal("a")));
        assert!(r.slot(1).unwrap().is_absent());
        assert!(r.slot(2).is_none());
    }

    #[test]
    fn test_dynamic_conversions() {
        let nested: Dynamic = Rendered::new(["x"], vec![]).into();
        assert!(matches!(nested, Dynamic::Nested(_)));
        let list: Dynamic = Comprehension::new(["<li>", "</li>"], vec![]).into();
        assert!(matches!(list, Dynamic::Comprehension(_)));
        assert!(Dynamic::from(None::<String>).is_absent());
        assert_eq!(Dynamic::from(Some(String::from("t"))), Dynamic::literal("t"));
    }

    #[test]
    fn test_comprehension_rows() {
        let c = Comprehension::new(
            ["<li>", ":", "</li>"],
            vec![
                vec![String::from("1"), String::from("a")],
                vec![String::from("2"), String::from("b")],
            ],
        );
        assert_eq!(c.row_count(), 2);
        assert_eq!(c.row_width(), 2);
        assert!(!c.is_empty());
        assert!(!c.is_stream());
    }

    #[test]
    fn test_to_html_interleaves() {
        let list = Comprehension::new(
            ["<li>", "</li>"],
            vec![vec![String::from("a")], vec![String::from("b")]],
        );
        let r = Rendered::new(
            ["<h1>", "</h1>", "", "<ul>", "</ul>"],
            vec![
                Dynamic::literal("t"),
                Dynamic::Absent,
                Rendered::new(["<em>", "</em>"], vec![Dynamic::literal("x")]).into(),
                list.into(),
            ],
        );
        assert_eq!(
            r.to_html(),
            "<h1>t</h1><em>x</em><ul><li>a</li><li>b</li></ul>"
        );
    }

    #[test]
    fn test_comprehension_row_width_of_empty_statics() {
        let c = Comprehension::default();
        assert_eq!(c.row_width(), 0);
        assert!(c.is_empty());
    }
}
