//! Document schemas for the shortkey mapping layer.
//!
//! A [`DocumentSchema`] maps human-readable attribute names (possibly nested
//! in embedded groups) to the short keys stored in the database, and carries
//! the [`IndexDescriptor`]s declared against those attribute names.

mod index;
mod mapping;
mod resolve;
mod schema;

pub use index::*;
pub use resolve::*;
pub use schema::*;
