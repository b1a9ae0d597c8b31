mod common;

use common::{read_byte, Harness, MIB};
use diskwright_core::test_utils::{failed, ok};
use diskwright_core::{
    BootCodeFamily, BootRecordKind, DiskError, DiskHook, OpArgs, OpOutput, PartitionType, Result,
};
use diskwright_disk::PartitionRequest;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn harness_with_partition() -> (Harness, diskwright_disk::Disk) {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "5", "ntfs")).unwrap();
    (harness, disk)
}

struct ForceLinuxType;

impl DiskHook for ForceLinuxType {
    fn pre(&self, _device: &Path, args: &mut OpArgs) -> Result<()> {
        if let OpArgs::SetPartitionId { id, .. } = args {
            *id = PartitionType::LINUX;
        }
        Ok(())
    }
}

struct Recorder {
    tag: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

impl DiskHook for Recorder {
    fn post(&self, _device: &Path, args: &OpArgs, _output: &mut OpOutput) -> Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("post:{}:{}", self.tag, args.operation().name()));
        Ok(())
    }

    fn error(&self, _device: &Path, args: &OpArgs, error: &DiskError) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("error:{}:{}:{}", self.tag, args.operation().name(), error));
    }
}

#[test]
fn test_signature_read_from_offset_440() {
    let harness = Harness::new(100 * MIB);
    let mut file = OpenOptions::new().write(true).open(&harness.device).unwrap();
    file.seek(SeekFrom::Start(440)).unwrap();
    file.write_all(&[0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
    drop(file);

    let mut disk = harness.open();
    assert_eq!(disk.signature(), 0xDEAD_BEEF);
    assert_eq!(disk.get_signature().unwrap(), 0xDEAD_BEEF);
}

#[test]
fn test_boot_flag_and_type_bytes() {
    let (harness, mut disk) = harness_with_partition();

    disk.set_partition_bootable(1, true).unwrap();
    assert_eq!(read_byte(&harness.device, 0x1BE), 0x80);
    assert_eq!(read_byte(&harness.device, 0x1C2), 0x00);

    disk.set_partition_id(1, PartitionType::FAT32_LBA).unwrap();
    assert_eq!(read_byte(&harness.device, 0x1C2), 0x0c);
    assert_eq!(read_byte(&harness.device, 0x1BE), 0x80);

    disk.set_partition_bootable(1, false).unwrap();
    assert_eq!(read_byte(&harness.device, 0x1BE), 0x00);
}

#[test]
fn test_pre_hook_rewrites_written_type() {
    let (harness, mut disk) = harness_with_partition();
    harness.hooks.register(Arc::new(ForceLinuxType));

    disk.set_partition_id(1, PartitionType::NTFS).unwrap();
    assert_eq!(read_byte(&harness.device, 0x1C2), 0x83);
}

#[test]
fn test_error_hooks_see_failure_once_in_order() {
    let (harness, mut disk) = harness_with_partition();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        harness.hooks.register(Arc::new(Recorder { tag, seen: Arc::clone(&seen) }));
    }

    let result = disk.set_partition_id(3, PartitionType::LINUX);
    assert!(matches!(result, Err(DiskError::PartitionNotFound(3))));

    let seen = seen.lock().unwrap();
    let errors: Vec<&String> = seen.iter().filter(|entry| entry.starts_with("error:")).collect();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].starts_with("error:first:set_partition_id:"));
    assert!(errors[1].starts_with("error:second:set_partition_id:"));
    assert!(errors[2].starts_with("error:third:set_partition_id:"));
}

#[test]
fn test_slot_out_of_range() {
    let (_harness, mut disk) = harness_with_partition();
    assert!(matches!(disk.set_partition_bootable(5, true), Err(DiskError::SlotOutOfRange(5))));
    assert!(matches!(disk.read_partition_boot_record(0), Err(DiskError::SlotOutOfRange(0))));
}

#[test]
fn test_record_reads() {
    let (harness, mut disk) = harness_with_partition();
    let mut pbr = vec![0u8; 512];
    pbr[3..11].copy_from_slice(b"NTFS    ");
    harness.make_node(1, &pbr);

    let mbr = disk.read_master_boot_record().unwrap();
    assert_eq!(mbr.len(), 512);
    assert_eq!(disk.read_partition_boot_record(1).unwrap(), pbr);
}

#[test]
fn test_delete_partition_table_zeroes_mbr() {
    let (harness, mut disk) = harness_with_partition();
    let mut file = OpenOptions::new().write(true).open(&harness.device).unwrap();
    file.write_all(&[0xAB; 512]).unwrap();
    drop(file);

    disk.delete_partition_table().unwrap();
    let bytes = std::fs::read(&harness.device).unwrap();
    assert!(bytes[..512].iter().all(|b| *b == 0));
}

#[test]
fn test_ntfs_start_sector_defaults_to_partition_start() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "1", "ntfs")).unwrap();
    disk.create_partition(PartitionRequest::new("2", "5", "ntfs")).unwrap();
    let node = harness.make_node(2, &[0u8; 512]);

    disk.set_ntfs_partition_start_sector(2, None).unwrap();
    let bytes = std::fs::read(&node).unwrap();
    assert_eq!(u32::from_le_bytes([bytes[0x1C], bytes[0x1D], bytes[0x1E], bytes[0x1F]]), 2 * 16065);

    disk.set_ntfs_partition_start_sector(2, Some(63)).unwrap();
    let bytes = std::fs::read(&node).unwrap();
    assert_eq!(&bytes[0x1C..0x20], &[63, 0, 0, 0]);
}

#[test]
fn test_boot_code_installer() {
    let (harness, mut disk) = harness_with_partition();
    harness.make_node(1, &[0u8; 512]);

    disk.write_master_boot_record(BootCodeFamily::Nt6).unwrap();
    let call = harness.runner.calls_to("ms-sys").pop().unwrap();
    assert_eq!(call.args, vec!["--mbr7".to_string(), harness.device.display().to_string()]);

    harness.runner.respond("ms-sys", &["-p"], ok("NTFS Windows 7 boot record successfully written to /dev/x1"));
    disk.write_partition_boot_record(1, BootRecordKind::Ntfs).unwrap();
    let call = harness.runner.calls_to("ms-sys").pop().unwrap();
    assert_eq!(&call.args[..2], ["-p", "--ntfs"]);

    harness.runner.respond("ms-sys", &["-p"], ok("Unable to write boot record"));
    assert!(matches!(
        disk.write_partition_boot_record(1, BootRecordKind::Fat32),
        Err(DiskError::ExternalToolFailure { .. })
    ));

    harness.runner.respond("ms-sys", &["-w"], failed(1, "not a disk"));
    assert!(matches!(
        disk.write_master_boot_record(BootCodeFamily::Auto),
        Err(DiskError::ExternalToolFailure { code: Some(1), .. })
    ));
}
