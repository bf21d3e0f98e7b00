//! Render diff engine
//!
//! Compares a freshly rendered tree with the fingerprint tree kept from
//! the previous pass and produces:
//! - the wire diff: only the slots that changed, statics only where the
//!   client has not seen the template yet
//! - the fingerprint tree to keep for the next pass
//!
//! The engine is pure. On error the caller's previous fingerprint tree is
//! untouched and must be reused (or dropped to force a full render).
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{error, trace};

use crate::fingerprint::{digest_rows, digest_text, FingerprintTree};
use crate::rendered::{Comprehension, Dynamic, Rendered};
use crate::stream::StreamPatch;

/// Malformed render input. Always a bug in the producer of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// `statics.len() != dynamics.len() + 1`
    #[error("rendered node has {statics} static fragments for {dynamics} dynamic slots")]
    ShapeMismatch { statics: usize, dynamics: usize },
    /// A comprehension row does not fill every slot of its template
    #[error("comprehension row {row} has {found} values, template expects {expected}")]
    ComprehensionShape {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A comprehension with no static fragments at all
    #[error("comprehension has no static fragments")]
    EmptyStatics,
}

/// Value of one changed slot in a wire diff
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Literal text; the empty string also clears a slot that went absent
    Text(String),
    /// Nested template or comprehension diff
    Diff(WireDiff),
}

impl WireValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s),
            WireValue::Diff(_) => None,
        }
    }

    pub fn as_diff(&self) -> Option<&WireDiff> {
        match self {
            WireValue::Diff(d) => Some(d),
            WireValue::Text(_) => None,
        }
    }
}

/// Minimal structural patch for one node.
///
/// A template node diff uses `slots` (+ `statics` when the client needs
/// them). A comprehension diff uses `dynamics` (+ `statics`, `stream`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireDiff {
    /// Changed slots by index; unchanged slots are omitted
    pub slots: BTreeMap<usize, WireValue>,
    /// Template statics, sent only when the template is new to the client
    pub statics: Option<Vec<String>>,
    /// Comprehension rows
    pub dynamics: Option<Vec<Vec<String>>>,
    /// Stream insert/delete/reset patch
    pub stream: Option<StreamPatch>,
}

impl WireDiff {
    /// True if nothing needs to be sent
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
            && self.statics.is_none()
            && self.dynamics.is_none()
            && self.stream.is_none()
    }

    /// True if this is a comprehension diff
    pub fn is_comprehension(&self) -> bool {
        self.dynamics.is_some()
    }

    pub fn slot(&self, index: usize) -> Option<&WireValue> {
        self.slots.get(&index)
    }
}

/// Diff a root template node against the previous fingerprint tree.
///
/// Returns the wire diff and the fingerprint tree to keep.
pub fn diff_rendered(
    new: &Rendered,
    prior: &FingerprintTree,
) -> Result<(WireDiff, FingerprintTree), DiffError> {
    traverse_rendered(new, prior)
}

/// Diff any slot value against its previous state.
///
/// `None` means nothing to send. The returned tree is `Empty` when the
/// slot rendered nothing.
pub fn diff(
    new: &Dynamic,
    prior: &FingerprintTree,
) -> Result<(Option<WireValue>, FingerprintTree), DiffError> {
    let prior = (!prior.is_empty()).then_some(prior);
    let (value, print) = diff_entry(new, prior)?;
    Ok((value, print.unwrap_or_default()))
}

fn traverse_rendered(
    rendered: &Rendered,
    prior: &FingerprintTree,
) -> Result<(WireDiff, FingerprintTree), DiffError> {
    if !rendered.is_well_formed() {
        error!(
            statics = rendered.statics.len(),
            dynamics = rendered.dynamics.len(),
            "malformed rendered node"
        );
        return Err(DiffError::ShapeMismatch {
            statics: rendered.statics.len(),
            dynamics: rendered.dynamics.len(),
        });
    }

    match prior {
        FingerprintTree::Node {
            fingerprint,
            children,
        } if *fingerprint == rendered.fingerprint => {
            let (slots, children) = traverse_dynamic(&rendered.dynamics, Some(children))?;
            let diff = WireDiff {
                slots,
                ..WireDiff::default()
            };
            Ok((
                diff,
                FingerprintTree::Node {
                    fingerprint: *fingerprint,
                    children,
                },
            ))
        }
        _ => {
            trace!(fingerprint = rendered.fingerprint, "new template, sending statics");
            let (slots, children) = traverse_dynamic(&rendered.dynamics, None)?;
            let diff = WireDiff {
                slots,
                statics: Some(rendered.statics.clone()),
                ..WireDiff::default()
            };
            Ok((
                diff,
                FingerprintTree::Node {
                    fingerprint: rendered.fingerprint,
                    children,
                },
            ))
        }
    }
}

type Traversed = (
    BTreeMap<usize, WireValue>,
    BTreeMap<usize, FingerprintTree>,
);

/// Walk the slots of one node.
///
/// A slot enters the diff only if it produced something to send, and
/// enters the new children only if it rendered something. Slots that
/// went absent drop out of the children, so their next appearance is
/// treated as brand new.
fn traverse_dynamic(
    dynamics: &[Dynamic],
    prior: Option<&BTreeMap<usize, FingerprintTree>>,
) -> Result<Traversed, DiffError> {
    let mut slots = BTreeMap::new();
    let mut children = BTreeMap::new();

    for (counter, entry) in dynamics.iter().enumerate() {
        let child = prior.and_then(|c| c.get(&counter));
        let (value, print) = diff_entry(entry, child)?;
        if let Some(value) = value {
            slots.insert(counter, value);
        }
        if let Some(print) = print {
            children.insert(counter, print);
        }
    }

    Ok((slots, children))
}

fn diff_entry(
    entry: &Dynamic,
    prior: Option<&FingerprintTree>,
) -> Result<(Option<WireValue>, Option<FingerprintTree>), DiffError> {
    match entry {
        Dynamic::Absent => {
            // Something was there last time: clear it explicitly.
            let value = prior.map(|_| {
                trace!("slot went absent, sending tombstone");
                WireValue::Text(String::new())
            });
            Ok((value, None))
        }
        Dynamic::Literal(text) => {
            let digest = digest_text(text);
            let value = match prior {
                Some(FingerprintTree::Leaf { digest: seen }) if *seen == digest => None,
                _ => Some(WireValue::Text(text.clone())),
            };
            Ok((value, Some(FingerprintTree::Leaf { digest })))
        }
        Dynamic::Nested(rendered) => {
            let (diff, print) =
                traverse_rendered(rendered, prior.unwrap_or(&FingerprintTree::Empty))?;
            let value = (!diff.is_empty()).then_some(WireValue::Diff(diff));
            Ok((value, Some(print)))
        }
        Dynamic::Comprehension(comprehension) => {
            let (diff, print) = traverse_comprehension(comprehension, prior)?;
            Ok((diff.map(WireValue::Diff), Some(print)))
        }
    }
}

/// Diff one comprehension slot.
///
/// A comprehension's statics are taken as fixed by its parent template's
/// fingerprint: under a `Comprehension` prior of the same kind, changed
/// rows are resent without statics, so a template that swaps the row
/// statics of a slot without changing its own statics is not supported.
///
/// Switching a slot between a plain list and a stream is treated like a
/// new comprehension and resent with statics.
fn traverse_comprehension(
    comprehension: &Comprehension,
    prior: Option<&FingerprintTree>,
) -> Result<(Option<WireDiff>, FingerprintTree), DiffError> {
    check_rows(comprehension)?;

    // Stream rows are a patch, not a snapshot: only the statics identify them.
    let stream = comprehension.is_stream();
    let digest = if stream {
        digest_rows(&comprehension.statics, &[])
    } else {
        digest_rows(&comprehension.statics, &comprehension.dynamics)
    };
    let print = FingerprintTree::Comprehension { digest, stream };

    let diff = match prior {
        Some(FingerprintTree::Comprehension {
            digest: seen,
            stream: was_stream,
        }) if *was_stream == stream => {
            let changed = match &comprehension.stream {
                Some(patch) => !patch.is_empty(),
                None => *seen != digest,
            };
            changed.then(|| WireDiff {
                dynamics: Some(render_items(&comprehension.dynamics)),
                stream: comprehension.stream.clone(),
                ..WireDiff::default()
            })
        }
        _ => Some(WireDiff {
            statics: Some(comprehension.statics.clone()),
            dynamics: Some(render_items(&comprehension.dynamics)),
            stream: comprehension.stream.clone(),
            ..WireDiff::default()
        }),
    };

    Ok((diff, print))
}

fn check_rows(comprehension: &Comprehension) -> Result<(), DiffError> {
    if comprehension.statics.is_empty() {
        error!("comprehension without statics");
        return Err(DiffError::EmptyStatics);
    }
    let expected = comprehension.row_width();
    for (row, values) in comprehension.dynamics.iter().enumerate() {
        if values.len() != expected {
            error!(row, expected, found = values.len(), "malformed comprehension row");
            return Err(DiffError::ComprehensionShape {
                row,
                expected,
                found: values.len(),
            });
        }
    }
    Ok(())
}

/// Rows are already text; the whole list is resent when it changes.
fn render_items(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    rows.to_vec()
}
