pub mod node;
pub mod probe;

#[cfg(target_os = "linux")]
pub mod linux;

pub use node::{partition_node, wait_for_node, wait_for_node_removal};
pub use probe::probe_filesystem;

#[cfg(target_os = "linux")]
pub use linux::{flush_buffers, SysBlock};
