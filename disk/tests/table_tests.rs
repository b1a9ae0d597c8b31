mod common;

use common::{Harness, BYTES_PER_CYLINDER, MIB};
use diskwright_core::{CoordinateSystem, DiskError, DiskLabel, PartitionType};
use diskwright_disk::{editor::place_partition, PartitionRequest};

#[test]
fn test_blank_disk_gets_empty_table() {
    let harness = Harness::new(100 * MIB);
    let disk = harness.open();

    let geometry = disk.geometry();
    assert_eq!(geometry.size, 100 * MIB);
    assert_eq!(geometry.heads, 255);
    assert_eq!(geometry.sectors, 63);
    assert_eq!(geometry.bytes_per_cylinder, BYTES_PER_CYLINDER);
    assert_eq!(geometry.bytes_per_sector, 512);
    assert_eq!(geometry.total_cylinders, 12);
    assert_eq!(geometry.total_sectors, 204_800);
    assert!(disk.partitions().is_empty());
    assert_eq!(disk.signature(), 0);

    let writes = harness.table_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].stdin_text(), "0,0\n0,0\n0,0\n0,0\n");
}

#[test]
fn test_missing_device() {
    let harness = Harness::new(MIB);
    let result = diskwright_disk::Disk::open_with(harness.dir.path().join("absent"), harness.options(false));
    assert!(matches!(result, Err(DiskError::DeviceNotFound(_))));
}

#[test]
fn test_bootable_ntfs_half_disk() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();

    let number = disk
        .create_partition(PartitionRequest::new("0", "50%", "ntfs").boot(true).number(1))
        .unwrap();
    assert_eq!(number, 1);

    let write = harness.table_writes().pop().unwrap();
    assert!(write.has_arg("-D"));
    assert!(write.has_arg("--no-reread"));
    assert_eq!(write.stdin_text(), "0,6,7,*\n0,0\n0,0\n0,0\n");
    assert!(harness
        .runner
        .calls_to("blockdev")
        .iter()
        .any(|call| call.has_arg("--rereadpt")));

    disk.read_partition_table().unwrap();
    let partition = disk.partition(1).unwrap();
    assert!(partition.boot);
    assert_eq!(partition.part_type.to_string(), "07");
    assert_eq!((partition.cylinders.start, partition.cylinders.end), (0, 5));
    assert_eq!(partition.size, 6 * BYTES_PER_CYLINDER);
    assert_eq!(partition.filesystem, "ntfs");
    assert_eq!(partition.sectors.unwrap().start, 0);
}

#[test]
fn test_delete_tolerates_lingering_node() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "50%", "ext4")).unwrap();
    harness.make_node(1, b"still here");

    disk.delete_partition(1).unwrap();
    disk.read_partition_table().unwrap();

    assert!(disk.partitions().is_empty());
    assert!(harness.node(1).exists());
    assert_eq!(harness.table_writes().pop().unwrap().stdin_text(), "0,0\n0,0\n0,0\n0,0\n");
}

#[test]
fn test_delete_absent_partition_is_noop() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    let writes = harness.table_writes().len();

    disk.delete_partition(3).unwrap();
    assert_eq!(harness.table_writes().len(), writes);
}

#[test]
fn test_written_layout_reads_back() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    let requests = [
        PartitionRequest::new("0", "3", "ntfs").boot(true),
        PartitionRequest::new("4", "7", "linux-swap"),
        PartitionRequest::new("8", "100%", "83"),
    ];

    let mut expected = Vec::new();
    for request in &requests {
        place_partition(
            &mut expected,
            disk.device(),
            disk.geometry(),
            CoordinateSystem::Cylinders,
            request,
        )
        .unwrap();
        disk.create_partition(request.clone()).unwrap();
    }

    let read: Vec<_> = disk.partitions().to_vec();
    assert_eq!(read.len(), expected.len());
    for want in &expected {
        let got = disk.partition(want.number).unwrap();
        assert_eq!(got.cylinders, want.cylinders);
        assert_eq!(got.part_type, want.part_type);
        assert_eq!(got.boot, want.boot);
        assert_eq!(got.size, want.size);
        assert_eq!(got.device, want.device);
    }
    assert_eq!(disk.partition(3).unwrap().cylinders.end, 11);
    assert_eq!(disk.partition(2).unwrap().part_type, PartitionType::LINUX_SWAP);

    disk.read_partition_table().unwrap();
    assert_eq!(disk.partitions(), read.as_slice());
}

#[test]
fn test_every_partition_is_consistent_and_disjoint() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "25%", "ext4")).unwrap();
    disk.create_partition(PartitionRequest::new("1", "60%", "ext4")).unwrap();
    disk.create_partition(PartitionRequest::new("60%", "100%", "ext4")).unwrap();

    let partitions = disk.partitions();
    for p in partitions {
        assert!(p.cylinders.start <= p.cylinders.end);
        assert_eq!(p.size, (p.cylinders.end - p.cylinders.start + 1) * BYTES_PER_CYLINDER);
        for q in partitions.iter().filter(|q| q.number != p.number) {
            assert!(!p.cylinders.overlaps(&q.cylinders), "{} overlaps {}", p.number, q.number);
        }
    }
    // second request started inside the first and was moved past it
    assert_eq!(disk.partition(2).unwrap().cylinders.start, disk.partition(1).unwrap().cylinders.end + 1);
}

#[test]
fn test_sector_mode_table() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open_sectors();
    disk.create_partition(PartitionRequest::new("0", "20m", "fat32").lba(true))
        .unwrap();

    let write = harness.table_writes().pop().unwrap();
    assert!(write.has_arg("-uS"));
    assert!(!write.has_arg("-D"));
    assert_eq!(write.stdin_text(), "2048,38912,c\n0,0\n0,0\n0,0\n");

    let partition = disk.partition(1).unwrap();
    let sectors = partition.sectors.unwrap();
    assert_eq!((sectors.start, sectors.end), (2048, 40_959));
    assert_eq!(partition.size, 38_912 * 512);
    assert!(partition.lba);
    assert_eq!(partition.filesystem, "fat32");
}

#[test]
fn test_unrecognized_table_twice_is_parse_failure() {
    let harness = Harness::new(100 * MIB);
    harness.runner.respond_with("sfdisk", &["-f"], |_| diskwright_core::test_utils::ok(""));
    let result = diskwright_disk::Disk::open_with(&harness.device, harness.options(false));
    assert!(matches!(result, Err(DiskError::TableParseFailure { .. })));
}

#[test]
fn test_label_type() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.set_disk_label_type(DiskLabel::Msdos).unwrap();

    assert_eq!(disk.label(), Some(DiskLabel::Msdos));
    let call = harness.runner.calls_to("parted").pop().unwrap();
    assert_eq!(call.args[0], "-s");
    assert_eq!(&call.args[2..], ["mklabel", "msdos"]);
}

#[test]
fn test_table_tool_failure_carries_output() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    harness.runner.respond(
        "sfdisk",
        &["-f"],
        diskwright_core::test_utils::failed(1, "sfdisk: bad input"),
    );

    let result = disk.create_partition(PartitionRequest::new("0", "5", "ext4"));
    match result {
        Err(DiskError::ExternalToolFailure { command, code, output }) => {
            assert!(command.starts_with("sfdisk -L --no-reread -f"));
            assert_eq!(code, Some(1));
            assert_eq!(output, "sfdisk: bad input");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_cylinder_table_never_marks_lba() {
    let harness = Harness::new(100 * MIB);
    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "5", "0c").lba(true)).unwrap();

    let partition = disk.partition(1).unwrap();
    assert_eq!(partition.part_type, PartitionType::FAT32_LBA);
    assert!(!partition.lba);
}

#[test]
fn test_geometry_override_only_reaches_table_tool() {
    let mut harness = Harness::new(100 * MIB);
    harness.config.geometry_override = Some(std::path::PathBuf::from("/usr/lib/libfakegeo.so"));
    harness.config.force_geometry_override = true;
    let ambient = std::env::var_os("LD_PRELOAD");

    let mut disk = harness.open();
    disk.create_partition(PartitionRequest::new("0", "5", "ext4")).unwrap();

    let table_calls = harness.runner.calls_to("sfdisk");
    assert!(!table_calls.is_empty());
    for call in &table_calls {
        assert_eq!(call.env_value("LD_PRELOAD"), Some("/usr/lib/libfakegeo.so"));
    }
    let others: Vec<_> = harness
        .runner
        .invocations()
        .into_iter()
        .filter(|call| call.program == "blkid" || call.program == "blockdev")
        .collect();
    assert!(!others.is_empty());
    assert!(others.iter().all(|call| call.env_value("LD_PRELOAD").is_none()));
    assert_eq!(std::env::var_os("LD_PRELOAD"), ambient);
}
