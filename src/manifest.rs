//! Durable progress record: the discovered folder tree plus one status per
//! file, persisted as a human-readable markdown document.
//!
//! The document has two views of the same data, a box-drawing tree and a
//! flat checklist. Both are rendered from one [`Manifest`] on every save;
//! loading prefers the checklist and falls back to the tree.

mod model;
pub mod parse;
pub mod render;
mod store;

pub use model::{
    FileEntry, FileStatus, FolderNode, Manifest, StatusChange, StatusCounts, matches_folder,
};
pub use store::{ManifestStore, merge};
