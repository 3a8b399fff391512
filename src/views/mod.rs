//! View fragments: parsing, indexing, patching and composition.

pub mod compose;
pub mod patch;
pub mod store;
pub mod xml;
pub mod xpath;
