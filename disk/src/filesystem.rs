use diskwright_core::{
    DiskError, FilesystemKind, OpArgs, OpOutput, Operation, Result, ToolCommand, ToolPaths,
};
use std::path::Path;
use std::thread;

use crate::disk::{expect_unit, Disk};

/// Attempt on which a missing node triggers a kernel table reread.
const REREAD_ATTEMPT: u32 = 3;

/// The formatting command for `kind` on `node`.
pub fn mkfs_command(tools: &ToolPaths, kind: FilesystemKind, node: &Path) -> ToolCommand {
    let command = match kind {
        FilesystemKind::Fat32 => ToolCommand::new(&tools.mkfs_vfat).args(["-F", "32"]),
        FilesystemKind::LinuxSwap => ToolCommand::new(&tools.mkswap),
        FilesystemKind::Ext2 | FilesystemKind::Ext3 | FilesystemKind::Ext4 => {
            ToolCommand::new(format!("{}{}", tools.mkfs_ext_prefix, kind.as_str())).args(["-F", "-q"])
        }
        FilesystemKind::Ntfs => ToolCommand::new(&tools.mkfs_ntfs).args(["--fast", "--force"]),
        FilesystemKind::Xfs => ToolCommand::new(&tools.mkfs_xfs).arg("-f"),
        FilesystemKind::Reiserfs => ToolCommand::new(&tools.mkfs_reiserfs).arg("-ff"),
        FilesystemKind::Reiser4 => ToolCommand::new(&tools.mkfs_reiser4).args(["-y", "-f"]),
    };
    command.arg(node.display().to_string())
}

impl Disk {
    fn await_partition_node(&self, node: &Path) -> Result<()> {
        let policy = self.config.mkfs_node_wait;
        for attempt in 1..=policy.attempts {
            if node.exists() {
                return Ok(());
            }
            log::debug!("Waiting for {} (attempt {}/{})", node.display(), attempt, policy.attempts);
            if attempt == REREAD_ATTEMPT {
                self.force_kernel_reread();
            }
            thread::sleep(policy.interval());
        }
        if node.exists() {
            Ok(())
        } else {
            Err(DiskError::DeviceNotFound(node.display().to_string()))
        }
    }

    pub fn create_filesystem(&mut self, number: u8, kind: FilesystemKind) -> Result<()> {
        let args = OpArgs::CreateFilesystem { partition: number, filesystem: kind };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::CreateFilesystem { partition, filesystem } = *args else {
                return Err(args.mismatch(Operation::CreateFilesystem));
            };
            let partition = disk.require_partition(partition)?;
            disk.await_partition_node(&partition.device)?;

            let command = mkfs_command(&disk.config.tools, filesystem, &partition.device);
            let line = command.command_line();
            log::info!("Creating {} on {}", filesystem, partition.device.display());
            disk.runner.run(command)?.check(&line)?;

            disk.read_partition_table()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::CreateFilesystem)
    }

    /// Resizes the filesystem of partition `number` to `size` bytes, by
    /// default the partition size less the configured margin. NTFS only.
    pub fn resize_filesystem(
        &mut self,
        number: u8,
        size: Option<u64>,
        filesystem: Option<FilesystemKind>,
    ) -> Result<()> {
        let args = OpArgs::ResizeFilesystem { partition: number, size, filesystem };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::ResizeFilesystem { partition, size, filesystem } = *args else {
                return Err(args.mismatch(Operation::ResizeFilesystem));
            };
            let partition = disk.require_partition(partition)?;
            let kind = match filesystem {
                Some(kind) => kind,
                None => partition.filesystem.parse()?,
            };
            if kind != FilesystemKind::Ntfs {
                return Err(DiskError::UnsupportedFilesystem(format!("resize of {}", kind)));
            }

            let size = match size {
                Some(size) => size,
                None => {
                    let current = match (disk.block_alignment, partition.sectors) {
                        (true, Some(sectors)) => sectors.size * disk.geometry.bytes_per_sector,
                        _ => partition.size,
                    };
                    current.saturating_sub(disk.config.resize_margin_bytes)
                }
            };
            if size == 0 {
                return Err(DiskError::invalid(format!(
                    "cannot resize partition {} to zero bytes",
                    partition.number
                )));
            }

            let command = ToolCommand::new(&disk.config.tools.ntfsresize)
                .args(["--force", "--size"])
                .arg(size.to_string())
                .arg(partition.device.display().to_string())
                .input("y\n");
            let line = command.command_line();
            log::info!("Resizing {} to {} bytes", partition.device.display(), size);
            disk.runner.run(command)?.check(&line)?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::ResizeFilesystem)
    }
}
