pub mod config;
pub mod error;
pub mod hooks;
pub mod partition;
pub mod tool;
pub mod units;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{EngineConfig, StreamConfig, ToolPaths, WaitPolicy};
pub use error::{DiskError, Result};
pub use hooks::{DiskHook, HookRegistry, LoggingHook, OpArgs, OpOutput, Operation};
pub use partition::{
    BootCodeFamily, BootRecordKind, CoordinateSystem, DiskLabel, Extent, FilesystemKind, Geometry,
    Partition, PartitionType,
};
pub use tool::{StdinSource, StdoutSink, SystemRunner, ToolCommand, ToolOutput, ToolRunner};
pub use units::{Boundary, Unit, UnitExpr};
