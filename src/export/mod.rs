//! Recording export
//!
//! Saved buffer windows leave the recorder here: an immutable
//! [`ExportedFile`] handed to an [`OutputSink`].

pub mod file;
pub mod types;

pub use file::FileSink;
pub use types::{
    suggested_name, ContainerFormat, ExportError, ExportReceipt, ExportedFile, OutputSink,
};
