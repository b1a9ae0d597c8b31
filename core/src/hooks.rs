//! Three-phase observers around every disk operation.
//!
//! A [`HookRegistry`] holds hooks in registration order. For each operation
//! the registry runs every `pre` hook (each may rewrite the arguments seen by
//! the next hook and by the operation), then the operation, then every `post`
//! hook (each may rewrite the result). When anything fails, every `error` hook
//! observes the failure and the original error is returned unchanged.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::{
    BootCodeFamily, BootRecordKind, DiskError, DiskLabel, FilesystemKind, PartitionType, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSignature,
    SetDiskLabelType,
    SetPartitionBootable,
    SetPartitionId,
    ReadPartitionTable,
    WritePartitionTable,
    DeletePartitionTable,
    ReadMasterBootRecord,
    ReadPartitionBootRecord,
    WriteMasterBootRecord,
    WritePartitionBootRecord,
    SetNtfsPartitionStartSector,
    CreatePartition,
    DeletePartition,
    CreateFilesystem,
    ResizeFilesystem,
    ShredPartition,
    FillPartition,
    SaveImage,
    RestoreImage,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetSignature => "get_signature",
            Operation::SetDiskLabelType => "set_disk_label_type",
            Operation::SetPartitionBootable => "set_partition_bootable",
            Operation::SetPartitionId => "set_partition_id",
            Operation::ReadPartitionTable => "read_partition_table",
            Operation::WritePartitionTable => "write_partition_table",
            Operation::DeletePartitionTable => "delete_partition_table",
            Operation::ReadMasterBootRecord => "read_master_boot_record",
            Operation::ReadPartitionBootRecord => "read_partition_boot_record",
            Operation::WriteMasterBootRecord => "write_master_boot_record",
            Operation::WritePartitionBootRecord => "write_partition_boot_record",
            Operation::SetNtfsPartitionStartSector => "set_ntfs_partition_start_sector",
            Operation::CreatePartition => "create_partition",
            Operation::DeletePartition => "delete_partition",
            Operation::CreateFilesystem => "create_filesystem",
            Operation::ResizeFilesystem => "resize_filesystem",
            Operation::ShredPartition => "shred_partition",
            Operation::FillPartition => "fill_partition",
            Operation::SaveImage => "save_image",
            Operation::RestoreImage => "restore_image",
        }
    }
}

/// Arguments of an operation, open to rewriting by `pre` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpArgs {
    GetSignature,
    SetDiskLabelType { label: DiskLabel },
    SetPartitionBootable { partition: u8, bootable: bool },
    SetPartitionId { partition: u8, id: PartitionType },
    ReadPartitionTable,
    WritePartitionTable,
    DeletePartitionTable,
    ReadMasterBootRecord,
    ReadPartitionBootRecord { partition: u8 },
    WriteMasterBootRecord { family: BootCodeFamily },
    WritePartitionBootRecord { partition: u8, kind: BootRecordKind },
    SetNtfsPartitionStartSector { partition: u8, sector: Option<u32> },
    CreatePartition {
        start: String,
        end: String,
        filesystem: String,
        boot: bool,
        lba: bool,
        number: Option<u8>,
    },
    DeletePartition { partition: u8 },
    CreateFilesystem { partition: u8, filesystem: FilesystemKind },
    ResizeFilesystem {
        partition: u8,
        size: Option<u64>,
        filesystem: Option<FilesystemKind>,
    },
    ShredPartition { partition: u8, iterations: u32, zero_pass: bool },
    FillPartition { partition: u8, source: PathBuf },
    SaveImage { partition: u8, target: PathBuf },
    RestoreImage { partition: u8, source: PathBuf },
}

impl OpArgs {
    pub fn operation(&self) -> Operation {
        match self {
            OpArgs::GetSignature => Operation::GetSignature,
            OpArgs::SetDiskLabelType { .. } => Operation::SetDiskLabelType,
            OpArgs::SetPartitionBootable { .. } => Operation::SetPartitionBootable,
            OpArgs::SetPartitionId { .. } => Operation::SetPartitionId,
            OpArgs::ReadPartitionTable => Operation::ReadPartitionTable,
            OpArgs::WritePartitionTable => Operation::WritePartitionTable,
            OpArgs::DeletePartitionTable => Operation::DeletePartitionTable,
            OpArgs::ReadMasterBootRecord => Operation::ReadMasterBootRecord,
            OpArgs::ReadPartitionBootRecord { .. } => Operation::ReadPartitionBootRecord,
            OpArgs::WriteMasterBootRecord { .. } => Operation::WriteMasterBootRecord,
            OpArgs::WritePartitionBootRecord { .. } => Operation::WritePartitionBootRecord,
            OpArgs::SetNtfsPartitionStartSector { .. } => Operation::SetNtfsPartitionStartSector,
            OpArgs::CreatePartition { .. } => Operation::CreatePartition,
            OpArgs::DeletePartition { .. } => Operation::DeletePartition,
            OpArgs::CreateFilesystem { .. } => Operation::CreateFilesystem,
            OpArgs::ResizeFilesystem { .. } => Operation::ResizeFilesystem,
            OpArgs::ShredPartition { .. } => Operation::ShredPartition,
            OpArgs::FillPartition { .. } => Operation::FillPartition,
            OpArgs::SaveImage { .. } => Operation::SaveImage,
            OpArgs::RestoreImage { .. } => Operation::RestoreImage,
        }
    }

    /// Error for an operation body handed arguments of another operation.
    pub fn mismatch(&self, expected: Operation) -> DiskError {
        DiskError::invalid(format!(
            "{} received arguments for {}",
            expected.name(),
            self.operation().name()
        ))
    }
}

/// Result of an operation, open to rewriting by `post` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    Unit,
    Signature(u32),
    Record(Vec<u8>),
}

pub trait DiskHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn pre(&self, _device: &Path, _args: &mut OpArgs) -> Result<()> {
        Ok(())
    }

    fn post(&self, _device: &Path, _args: &OpArgs, _output: &mut OpOutput) -> Result<()> {
        Ok(())
    }

    fn error(&self, _device: &Path, _args: &OpArgs, _error: &DiskError) {}
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn DiskHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn DiskHook>) {
        log::debug!("Registering disk hook {}", hook.name());
        self.hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(hook);
    }

    /// Removes `hook` (compared by identity). Returns whether it was registered.
    pub fn unregister(&self, hook: &Arc<dyn DiskHook>) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = hooks.len();
        hooks.retain(|registered| !Arc::ptr_eq(registered, hook));
        before != hooks.len()
    }

    pub fn clear(&self) {
        self.hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn DiskHook>> {
        self.hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Runs `body` wrapped by the three hook phases.
    ///
    /// The hook list is captured once per call so that hooks registered while
    /// an operation is running only see later operations.
    pub fn run<F>(&self, device: &Path, args: OpArgs, body: F) -> Result<OpOutput>
    where
        F: FnOnce(&OpArgs) -> Result<OpOutput>,
    {
        let hooks = self.snapshot();
        let operation = args.operation();
        let mut args = args;
        log::info!("{} on {}", operation.name(), device.display());

        let result = Self::pre_phase(&hooks, device, &mut args, operation)
            .and_then(|()| body(&args))
            .and_then(|mut output| {
                for hook in &hooks {
                    hook.post(device, &args, &mut output)?;
                }
                Ok(output)
            });

        if let Err(ref error) = result {
            log::error!("{} on {} failed: {}", operation.name(), device.display(), error);
            for hook in &hooks {
                hook.error(device, &args, error);
            }
        }

        result
    }

    fn pre_phase(
        hooks: &[Arc<dyn DiskHook>],
        device: &Path,
        args: &mut OpArgs,
        operation: Operation,
    ) -> Result<()> {
        for hook in hooks {
            hook.pre(device, args)?;
            if args.operation() != operation {
                return Err(DiskError::invalid(format!(
                    "hook {} turned {} into {}",
                    hook.name(),
                    operation.name(),
                    args.operation().name()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.snapshot().iter().map(|h| h.name().to_string()).collect();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

/// Logs every phase at info level; registered by the command-line front end.
#[derive(Debug, Default)]
pub struct LoggingHook;

impl DiskHook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn pre(&self, device: &Path, args: &mut OpArgs) -> Result<()> {
        log::info!("[{}] before {:?}", device.display(), args);
        Ok(())
    }

    fn post(&self, device: &Path, args: &OpArgs, _output: &mut OpOutput) -> Result<()> {
        log::info!("[{}] after {}", device.display(), args.operation().name());
        Ok(())
    }

    fn error(&self, device: &Path, args: &OpArgs, error: &DiskError) {
        log::warn!("[{}] {} raised: {}", device.display(), args.operation().name(), error);
    }
}
