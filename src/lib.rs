//! ALICE-LiveDiff — Incremental Render Diffing
//!
//! Don't resend the page, resend the slots.
//!
//! Server-side change tracking for template-rendered views:
//! - Rendered trees: static fragments interleaved with dynamic slots
//! - Fingerprint trees remembering what the client already holds
//! - Minimal wire diffs (statics sent once per template, unchanged slots omitted)
//! - Live streams: append/prepend/delete/reset patches without keeping the collection
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`rendered`] | Rendered tree model (statics, dynamic slots, comprehensions) |
//! | [`fingerprint`] | FNV-1a template fingerprints and the per-root fingerprint tree |
//! | [`diff`] | Diff engine: rendered tree + old fingerprints to wire diff + new fingerprints |
//! | [`stream`] | Live stream operation log with dedup and one-shot consumption |
//! | [`codec`] | JSON wire format and compact binary encoding |
//! | [`merge`] | Client-side merge of wire diffs back into HTML |
//! | [`root`] | Per-view render root driving successive renders |
//!
//! # Quick Start
//!
//! ```
//! use alice_livediff::{ClientTree, Dynamic, RenderRoot, Rendered};
//!
//! let view = |text: &str| Rendered::new(["<p>", "</p>"], vec![Dynamic::literal(text)]);
//!
//! let mut root = RenderRoot::new("greeting");
//!
//! // First render carries the statics
//! let first = root.render(&view("hi")).unwrap();
//! assert!(first.statics.is_some());
//! let mut client = ClientTree::from_diff(&first).unwrap();
//!
//! // Same output: nothing to send
//! assert!(root.render(&view("hi")).unwrap().is_empty());
//!
//! // Changed slot: only the slot goes over the wire
//! let next = root.render(&view("bye")).unwrap();
//! assert_eq!(alice_livediff::encode_json(&next).unwrap(), r#"{"0":"bye"}"#);
//!
//! client.apply(&next).unwrap();
//! assert_eq!(client.to_html(), "<p>bye</p>");
//! ```
//!
//! Author: Moroya Sakamoto

pub mod codec;
pub mod diff;
pub mod fingerprint;
pub mod merge;
pub mod rendered;
pub mod root;
pub mod stream;

pub use codec::{decode_diff, decode_json, encode_diff, encode_json, encoded_size, CodecError};
pub use diff::{diff, diff_rendered, DiffError, WireDiff, WireValue};
pub use fingerprint::{Fingerprint, FingerprintTree};
pub use merge::{ClientList, ClientNode, ClientRow, ClientTree, MergeError};
pub use rendered::{Comprehension, Dynamic, Rendered};
pub use root::{RenderError, RenderRoot};
pub use stream::{
    Consumption, InsertOptions, LiveStream, StreamError, StreamInsert, StreamOptions, StreamPatch,
};
