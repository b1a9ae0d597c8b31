//! Partition table and disk image engine.
//!
//! A [`Disk`] is opened from a block device path, detects its geometry and
//! reads the partition table immediately, and afterwards is only changed
//! through its operations. Every operation is wrapped by the hooks of the
//! disk's [`HookRegistry`](diskwright_core::HookRegistry).

pub mod disk;
pub mod editor;
pub mod filesystem;
pub mod geometry;
pub mod image;
pub mod records;
pub mod table;

pub use disk::{Disk, DiskOptions, DiskReport};
pub use editor::PartitionRequest;
pub use image::{ImageFormat, NoProgress, ProgressObserver, ProgressUpdate, TransferState};
