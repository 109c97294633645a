//! Project file workspace inside containers.

mod commands;
mod error;
mod paths;
mod service;
mod tree;

pub use commands::{FileCommands, MAX_INLINE_SCRIPT_BYTES, fits_inline, single_file_archive};
pub use error::{WorkspaceError, WorkspaceResult};
pub use paths::{EntryName, RelativePath, shell_quote, strip_content_controls, strip_control_chars};
pub use service::{DEFAULT_MAX_INLINE_WRITE_BYTES, WorkspaceService};
pub use tree::{
    FileSystemNode, ListingEntry, ListingFormat, NodeKind, build_file_tree, classify,
    parse_listing, rename_subtree,
};
