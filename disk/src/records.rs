//! Fixed-offset reads and writes of boot records.
//!
//! Offsets in the master boot record:
//!
//! | Offset              | Size | Field                              |
//! |---------------------|------|------------------------------------|
//! | 440                 | 4    | disk signature (little endian)     |
//! | 0x1BE + (n-1) * 16  | 16   | entry of partition n               |
//! | entry + 0           | 1    | boot indicator (0x80 / 0x00)       |
//! | entry + 4           | 1    | partition type code                |
//!
//! NTFS keeps the partition start ("hidden sectors") at 0x1C of its own
//! boot sector.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use diskwright_core::{
    BootCodeFamily, BootRecordKind, DiskError, OpArgs, OpOutput, Operation, PartitionType, Result,
    ToolCommand,
};
use diskwright_platform::flush_buffers;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::disk::{expect_unit, Disk};

pub const RECORD_SIZE: usize = 512;
pub const SIGNATURE_OFFSET: u64 = 440;
pub const PARTITION_TABLE_OFFSET: u64 = 0x1BE;
pub const PARTITION_ENTRY_SIZE: u64 = 16;
pub const BOOT_INDICATOR: u64 = 0;
pub const TYPE_CODE: u64 = 4;
pub const NTFS_HIDDEN_SECTORS_OFFSET: u64 = 0x1C;

const BOOTABLE: u8 = 0x80;
const SUCCESS_MARKER: &str = "successfully";

/// Byte offset of the table entry of partition `number` (1-4).
pub fn entry_offset(number: u8) -> u64 {
    PARTITION_TABLE_OFFSET + u64::from(number.saturating_sub(1)) * PARTITION_ENTRY_SIZE
}

pub fn read_signature<R: Read + Seek>(reader: &mut R) -> Result<u32> {
    reader.seek(SeekFrom::Start(SIGNATURE_OFFSET))?;
    Ok(reader.read_u32::<LittleEndian>()?)
}

pub fn read_record(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut record = vec![0u8; RECORD_SIZE];
    file.read_exact(&mut record)?;
    Ok(record)
}

fn open_for_write(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

pub fn write_byte(path: &Path, offset: u64, value: u8) -> Result<()> {
    let mut file = open_for_write(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_u8(value)?;
    file.sync_all()?;
    Ok(())
}

pub fn read_u32_le(path: &Path, offset: u64) -> Result<u32> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(file.read_u32::<LittleEndian>()?)
}

pub fn write_u32_le(path: &Path, offset: u64, value: u32) -> Result<()> {
    let mut file = open_for_write(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_u32::<LittleEndian>(value)?;
    file.sync_all()?;
    Ok(())
}

impl Disk {
    /// Flushes buffers and makes the kernel and this `Disk` see the new table.
    fn commit_record_write(&mut self) -> Result<()> {
        flush_buffers();
        self.refresh_table()
    }

    pub fn get_signature(&mut self) -> Result<u32> {
        let output = self.hooked(OpArgs::GetSignature, |disk, args| {
            if !matches!(args, OpArgs::GetSignature) {
                return Err(args.mismatch(Operation::GetSignature));
            }
            let mut file = File::open(&disk.device)?;
            Ok(OpOutput::Signature(read_signature(&mut file)?))
        })?;
        match output {
            OpOutput::Signature(signature) => {
                self.signature = signature;
                Ok(signature)
            }
            other => Err(DiskError::invalid(format!("get_signature produced {:?}", other))),
        }
    }

    pub fn read_master_boot_record(&mut self) -> Result<Vec<u8>> {
        let output = self.hooked(OpArgs::ReadMasterBootRecord, |disk, args| {
            if !matches!(args, OpArgs::ReadMasterBootRecord) {
                return Err(args.mismatch(Operation::ReadMasterBootRecord));
            }
            Ok(OpOutput::Record(read_record(&disk.device)?))
        })?;
        into_record(output, Operation::ReadMasterBootRecord)
    }

    pub fn read_partition_boot_record(&mut self, number: u8) -> Result<Vec<u8>> {
        let output = self.hooked(OpArgs::ReadPartitionBootRecord { partition: number }, |disk, args| {
            let OpArgs::ReadPartitionBootRecord { partition } = *args else {
                return Err(args.mismatch(Operation::ReadPartitionBootRecord));
            };
            let partition = disk.require_partition(partition)?;
            Ok(OpOutput::Record(read_record(&partition.device)?))
        })?;
        into_record(output, Operation::ReadPartitionBootRecord)
    }

    pub fn set_partition_bootable(&mut self, number: u8, bootable: bool) -> Result<()> {
        let args = OpArgs::SetPartitionBootable { partition: number, bootable };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::SetPartitionBootable { partition, bootable } = *args else {
                return Err(args.mismatch(Operation::SetPartitionBootable));
            };
            disk.require_partition(partition)?;
            let value = if bootable { BOOTABLE } else { 0 };
            write_byte(&disk.device, entry_offset(partition) + BOOT_INDICATOR, value)?;
            disk.commit_record_write()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::SetPartitionBootable)
    }

    pub fn set_partition_id(&mut self, number: u8, id: PartitionType) -> Result<()> {
        let output = self.hooked(OpArgs::SetPartitionId { partition: number, id }, |disk, args| {
            let OpArgs::SetPartitionId { partition, id } = *args else {
                return Err(args.mismatch(Operation::SetPartitionId));
            };
            disk.require_partition(partition)?;
            write_byte(&disk.device, entry_offset(partition) + TYPE_CODE, id.0)?;
            disk.commit_record_write()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::SetPartitionId)
    }

    /// Zeroes the whole master boot record, table included.
    pub fn delete_partition_table(&mut self) -> Result<()> {
        let output = self.hooked(OpArgs::DeletePartitionTable, |disk, args| {
            if !matches!(args, OpArgs::DeletePartitionTable) {
                return Err(args.mismatch(Operation::DeletePartitionTable));
            }
            let mut file = open_for_write(&disk.device)?;
            file.write_all(&[0u8; RECORD_SIZE])?;
            file.sync_all()?;
            disk.commit_record_write()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::DeletePartitionTable)
    }

    /// Points the NTFS boot sector of partition `number` at `sector`, or at
    /// the partition's actual start when `None`.
    pub fn set_ntfs_partition_start_sector(&mut self, number: u8, sector: Option<u32>) -> Result<()> {
        let args = OpArgs::SetNtfsPartitionStartSector { partition: number, sector };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::SetNtfsPartitionStartSector { partition, sector } = *args else {
                return Err(args.mismatch(Operation::SetNtfsPartitionStartSector));
            };
            let partition = disk.require_partition(partition)?;
            let sector = match sector {
                Some(sector) => sector,
                None => {
                    let start = partition.start_sector(&disk.geometry);
                    u32::try_from(start).map_err(|_| {
                        DiskError::invalid(format!("start sector {} does not fit the boot sector field", start))
                    })?
                }
            };

            let node = &partition.device;
            let previous = read_u32_le(node, NTFS_HIDDEN_SECTORS_OFFSET)?;
            log::info!(
                "NTFS start sector of {}: {} -> {}",
                node.display(),
                previous,
                sector
            );
            write_u32_le(node, NTFS_HIDDEN_SECTORS_OFFSET, sector)?;

            let written = read_u32_le(node, NTFS_HIDDEN_SECTORS_OFFSET)?;
            if written != sector {
                return Err(DiskError::VerificationMismatch(format!(
                    "{} reads back start sector {} after writing {}",
                    node.display(),
                    written,
                    sector
                )));
            }
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::SetNtfsPartitionStartSector)
    }

    pub fn write_master_boot_record(&mut self, family: BootCodeFamily) -> Result<()> {
        let output = self.hooked(OpArgs::WriteMasterBootRecord { family }, |disk, args| {
            let OpArgs::WriteMasterBootRecord { family } = *args else {
                return Err(args.mismatch(Operation::WriteMasterBootRecord));
            };
            let command = ToolCommand::new(&disk.config.tools.ms_sys)
                .arg(family.installer_flag())
                .arg(disk.device.display().to_string());
            let line = command.command_line();
            disk.runner.run(command)?.check(&line)?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::WriteMasterBootRecord)
    }

    pub fn write_partition_boot_record(&mut self, number: u8, kind: BootRecordKind) -> Result<()> {
        let args = OpArgs::WritePartitionBootRecord { partition: number, kind };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::WritePartitionBootRecord { partition, kind } = *args else {
                return Err(args.mismatch(Operation::WritePartitionBootRecord));
            };
            let partition = disk.require_partition(partition)?;
            let command = ToolCommand::new(&disk.config.tools.ms_sys)
                .args(["-p", kind.installer_flag()])
                .arg(partition.device.display().to_string());
            let line = command.command_line();
            let output = disk.runner.run(command)?;
            if !output.combined().contains(SUCCESS_MARKER) {
                return Err(DiskError::tool_failure(
                    &line,
                    output.code,
                    output.tail(diskwright_core::tool::OUTPUT_TAIL_LINES),
                ));
            }
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::WritePartitionBootRecord)
    }
}

fn into_record(output: OpOutput, operation: Operation) -> Result<Vec<u8>> {
    match output {
        OpOutput::Record(record) => Ok(record),
        other => Err(DiskError::invalid(format!(
            "{} produced {:?}",
            operation.name(),
            other
        ))),
    }
}
