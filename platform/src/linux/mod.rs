mod device;

pub use device::{flush_buffers, SysBlock};
