//! Render roots
//!
//! A root is one independently rendered view or component. It keeps the
//! fingerprint tree of its last render and turns each new render into a
//! wire diff against it. Roots share nothing, so separate roots can render
//! on separate threads; `&mut self` keeps the renders of one root in order.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;
use tracing::{debug, debug_span};

use crate::diff::{diff_rendered, DiffError, WireDiff};
use crate::fingerprint::FingerprintTree;
use crate::rendered::Rendered;
use crate::stream::StreamError;

/// Anything that can fail while producing a root's next diff
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// One view's render state
#[derive(Debug, Clone, Default)]
pub struct RenderRoot {
    /// Root name, used in logs
    name: String,
    /// Fingerprints of the last successful render
    prints: FingerprintTree,
    /// Successful renders since mount (or last reset)
    renders: u64,
}

impl RenderRoot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prints: FingerprintTree::Empty,
            renders: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Diff `rendered` against the last render and remember it.
    ///
    /// On error the stored fingerprints are left as they were, so the
    /// next render diffs against the last good one.
    pub fn render(&mut self, rendered: &Rendered) -> Result<WireDiff, RenderError> {
        let span = debug_span!("render", root = %self.name, pass = self.renders + 1);
        let _enter = span.enter();

        let (diff, prints) = diff_rendered(rendered, &self.prints)?;
        if diff.statics.is_some() {
            debug!(entries = prints.node_count(), "full render");
        } else {
            debug!(slots = diff.slots.len(), "partial render");
        }
        self.prints = prints;
        self.renders += 1;
        Ok(diff)
    }

    /// Build the view and render it in one step. The builder is where
    /// live streams get folded, so stream errors surface here as well.
    pub fn render_with<F>(&mut self, build: F) -> Result<WireDiff, RenderError>
    where
        F: FnOnce() -> Result<Rendered, StreamError>,
    {
        let rendered = build()?;
        self.render(&rendered)
    }

    /// Forget the client state; the next render is a full one.
    pub fn reset(&mut self) {
        debug!(root = %self.name, "render root reset");
        self.prints = FingerprintTree::Empty;
        self.renders = 0;
    }

    /// True once a render has succeeded (and no reset since)
    pub fn is_mounted(&self) -> bool {
        !self.prints.is_empty()
    }

    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Fingerprints of the last successful render
    pub fn prints(&self) -> &FingerprintTree {
        &self.prints
    }
}
