// SQLite entity store
// Raw records are preserved verbatim (source_json columns); derived records
// are rebuildable from raw and cleared per scope before rebuilds.

mod annotations;
mod cursors;
mod db;
mod error;
mod queries;
mod records;
mod schema;

pub use annotations::{AnnotationReader, AnnotationWriter, WriteContext};
pub use cursors::CursorManager;
pub use db::Store;
pub use error::{Error, Result};
pub use queries::hash::DuplicateGroup;
pub use records::*;
pub use schema::SCHEMA_VERSION;
