//! Partition table listing and rewriting through the external table tool.
//!
//! The tool is always asked twice: once in cylinder units (which also gives
//! the disk geometry) and once in sector units. Both answers are merged into
//! one [`Partition`](diskwright_core::Partition) list keyed by slot number.

mod reader;
mod writer;

pub use reader::{parse_listing, ListingLine};
pub use writer::serialize_table;

/// Largest slot number of the primary table.
pub const MAX_SLOTS: u8 = 4;

/// Marker printed by the table tool for a disk without a usable table.
pub(crate) const UNRECOGNIZED_TABLE: &str = "unrecognized partition table";
