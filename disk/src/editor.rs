//! Partition creation and deletion.
//!
//! Placement is a pure function over the in-memory list so that slot
//! renumbering and neighbour clamping can be reasoned about without a disk.

use diskwright_core::{
    Boundary, CoordinateSystem, DiskError, Extent, FilesystemKind, Geometry, OpArgs, OpOutput,
    Operation, Partition, PartitionType, Result, UnitExpr,
};
use diskwright_platform::{partition_node, wait_for_node_removal};
use std::path::Path;

use crate::disk::{expect_unit, Disk};
use crate::table::MAX_SLOTS;

/// Smallest start and alignment of a partition in a sector table.
pub const SECTOR_ALIGNMENT: u64 = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    pub start: String,
    pub end: String,
    /// Filesystem name or explicit two-digit type code.
    pub filesystem: String,
    pub boot: bool,
    pub lba: bool,
    pub number: Option<u8>,
}

impl PartitionRequest {
    pub fn new(start: impl Into<String>, end: impl Into<String>, filesystem: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            filesystem: filesystem.into(),
            boot: false,
            lba: false,
            number: None,
        }
    }

    pub fn boot(mut self, boot: bool) -> Self {
        self.boot = boot;
        self
    }

    pub fn lba(mut self, lba: bool) -> Self {
        self.lba = lba;
        self
    }

    pub fn number(mut self, number: u8) -> Self {
        self.number = Some(number);
        self
    }

    fn into_args(self) -> OpArgs {
        OpArgs::CreatePartition {
            start: self.start,
            end: self.end,
            filesystem: self.filesystem,
            boot: self.boot,
            lba: self.lba,
            number: self.number,
        }
    }

    fn from_args(args: &OpArgs) -> Result<Self> {
        match args {
            OpArgs::CreatePartition { start, end, filesystem, boot, lba, number } => Ok(Self {
                start: start.clone(),
                end: end.clone(),
                filesystem: filesystem.clone(),
                boot: *boot,
                lba: *lba,
                number: *number,
            }),
            other => Err(other.mismatch(Operation::CreatePartition)),
        }
    }
}

/// LBA flavour of the FAT type codes; other codes are unchanged.
fn lba_variant(part_type: PartitionType) -> PartitionType {
    match part_type.0 {
        0x0b => PartitionType::FAT32_LBA,
        0x06 => PartitionType::FAT16_LBA,
        _ => part_type,
    }
}

fn filesystem_name(request: &str, part_type: PartitionType) -> String {
    match request.parse::<FilesystemKind>() {
        Ok(kind) => kind.as_str().to_string(),
        Err(_) => part_type
            .default_filesystem()
            .unwrap_or("unknown")
            .to_string(),
    }
}

fn overlap(number: u8, reason: String) -> DiskError {
    DiskError::OverlapUnresolvable { number, reason }
}

/// Fits `request` into `partitions` and appends the resulting record.
///
/// Slots of existing partitions may be shifted up to make room. The list
/// is left untouched when placement fails.
pub fn place_partition(
    partitions: &mut Vec<Partition>,
    device: &Path,
    geometry: &Geometry,
    system: CoordinateSystem,
    request: &PartitionRequest,
) -> Result<Partition> {
    let mut part_type = PartitionType::for_filesystem(&request.filesystem)?;
    let lba = request.lba && system == CoordinateSystem::Sectors;
    if lba {
        part_type = lba_variant(part_type);
    }

    let mut start = request.start.parse::<UnitExpr>()?.to_native(geometry, system, Boundary::Start)?;
    let mut end = request.end.parse::<UnitExpr>()?.to_native(geometry, system, Boundary::End)?;

    let requested = match request.number {
        Some(number) => number,
        None => u8::try_from(partitions.len() + 1).unwrap_or(u8::MAX),
    };
    if !(1..=MAX_SLOTS).contains(&requested) {
        return Err(DiskError::SlotOutOfRange(requested));
    }

    let extent_of = |p: &Partition| -> Result<Extent> {
        p.extent(system)
            .ok_or_else(|| DiskError::invalid(format!("partition {} has no sector coordinates", p.number)))
    };

    // insert ahead of a lower-numbered partition that lies after the new one
    let mut number = requested;
    for existing in partitions.iter() {
        if existing.number < number && end <= extent_of(existing)?.start {
            number = existing.number;
        }
    }
    if number != requested {
        log::info!("Renumbering new partition from {} to {}", requested, number);
    }

    let mut placed = partitions.clone();
    if placed.iter().any(|p| p.number == number) {
        for existing in placed.iter_mut().filter(|p| p.number >= number) {
            if existing.number >= MAX_SLOTS {
                return Err(DiskError::SlotOutOfRange(existing.number + 1));
            }
            existing.number += 1;
            existing.device = partition_node(device, existing.number);
        }
    }

    let previous = placed.iter().filter(|p| p.number < number).max_by_key(|p| p.number);
    if let Some(previous) = previous {
        let previous_end = extent_of(previous)?.end;
        if start <= previous_end {
            log::info!("Start {} overlaps partition {}, moving to {}", start, previous.number, previous_end + 1);
            start = previous_end + 1;
        }
    }
    let next = placed.iter().filter(|p| p.number > number).min_by_key(|p| p.number);
    if let Some(next) = next {
        let next_start = extent_of(next)?.start;
        if end >= next_start {
            let clamped = next_start
                .checked_sub(1)
                .ok_or_else(|| overlap(number, format!("partition {} starts at 0", next.number)))?;
            log::info!("End {} overlaps partition {}, moving to {}", end, next.number, clamped);
            end = clamped;
        }
    }

    if system == CoordinateSystem::Sectors {
        start = start.max(SECTOR_ALIGNMENT).div_ceil(SECTOR_ALIGNMENT) * SECTOR_ALIGNMENT;
    }
    let last = geometry.total_units(system).saturating_sub(1);
    end = end.min(last);

    if start > end {
        return Err(overlap(number, format!("start {} is past end {}", start, end)));
    }
    let extent = Extent::new(start, end);
    for existing in &placed {
        if extent_of(existing)?.overlaps(&extent) {
            return Err(overlap(
                number,
                format!("{}-{} overlaps partition {}", start, end, existing.number),
            ));
        }
    }

    let bytes_per_cylinder = geometry.bytes_per_cylinder;
    let bytes_per_sector = geometry.bytes_per_sector;
    let (cylinders, sectors) = match system {
        CoordinateSystem::Cylinders => {
            let first_sector = start * bytes_per_cylinder / bytes_per_sector;
            let last_sector = ((end + 1) * bytes_per_cylinder / bytes_per_sector).saturating_sub(1);
            (extent, Extent::new(first_sector, last_sector))
        }
        CoordinateSystem::Sectors => {
            let first_cylinder = start * bytes_per_sector / bytes_per_cylinder;
            let last_cylinder = end * bytes_per_sector / bytes_per_cylinder;
            (Extent::new(first_cylinder, last_cylinder), extent)
        }
    };

    let partition = Partition {
        number,
        device: partition_node(device, number),
        cylinders,
        sectors: Some(sectors),
        size: extent.size * geometry.unit_bytes(system),
        part_type,
        filesystem: filesystem_name(&request.filesystem, part_type),
        boot: request.boot,
        lba,
    };
    log::info!(
        "Placed partition {} at {}-{} ({} bytes, type {})",
        number,
        start,
        end,
        partition.size,
        part_type
    );

    placed.push(partition.clone());
    *partitions = placed;
    Ok(partition)
}

impl Disk {
    /// Creates a partition and rewrites the table. Returns the slot it landed in.
    pub fn create_partition(&mut self, request: PartitionRequest) -> Result<u8> {
        let mut placed_number = 0;
        let output = self.hooked(request.into_args(), |disk, args| {
            let request = PartitionRequest::from_args(args)?;
            let system = disk.coordinate_system();
            let mut partitions = disk.partitions.clone();
            let partition = place_partition(&mut partitions, &disk.device, &disk.geometry, system, &request)?;
            placed_number = partition.number;

            disk.partitions = partitions;
            disk.write_partition_table()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::CreatePartition)?;
        Ok(placed_number)
    }

    /// Removes partition `number`. Deleting an absent partition only warns.
    pub fn delete_partition(&mut self, number: u8) -> Result<()> {
        let output = self.hooked(OpArgs::DeletePartition { partition: number }, |disk, args| {
            let OpArgs::DeletePartition { partition } = *args else {
                return Err(args.mismatch(Operation::DeletePartition));
            };
            let Some(index) = disk.partitions.iter().position(|p| p.number == partition) else {
                log::warn!("Partition {} does not exist on {}", partition, disk.device.display());
                return Ok(OpOutput::Unit);
            };

            let removed = disk.partitions.remove(index);
            disk.write_partition_table()?;
            if !wait_for_node_removal(&removed.device, disk.config.node_vanish_wait) {
                log::warn!("Partition node {} is still present", removed.device.display());
            }
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::DeletePartition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn geometry() -> Geometry {
        Geometry {
            size: 1000 * 8_225_280,
            cylinders: 1000,
            heads: 255,
            sectors: 63,
            bytes_per_cylinder: 8_225_280,
            bytes_per_sector: 512,
            total_cylinders: 1000,
            total_sectors: 1000 * 16065,
        }
    }

    fn place(partitions: &mut Vec<Partition>, request: PartitionRequest) -> Result<Partition> {
        place_partition(
            partitions,
            Path::new("/dev/sdz"),
            &geometry(),
            CoordinateSystem::Cylinders,
            &request,
        )
    }

    #[test]
    fn test_percent_range() {
        let mut partitions = Vec::new();
        let p = place(&mut partitions, PartitionRequest::new("0%", "50%", "ntfs").boot(true)).unwrap();
        assert_eq!(p.number, 1);
        assert_eq!((p.cylinders.start, p.cylinders.end), (0, 499));
        assert_eq!(p.size, 500 * 8_225_280);
        assert_eq!(p.part_type.to_string(), "07");
        assert_eq!(p.device, PathBuf::from("/dev/sdz1"));
        assert!(p.boot);
        assert_eq!(partitions.len(), 1);
    }

    #[test]
    fn test_start_clamped_after_previous() {
        let mut partitions = Vec::new();
        place(&mut partitions, PartitionRequest::new("0", "499", "ext4")).unwrap();
        let p = place(&mut partitions, PartitionRequest::new("400", "700", "ext4")).unwrap();
        assert_eq!(p.number, 2);
        assert_eq!(p.cylinders.start, 500);
        assert_eq!(p.cylinders.end, 700);
    }

    #[test]
    fn test_end_clamped_to_disk() {
        let mut partitions = Vec::new();
        let p = place(&mut partitions, PartitionRequest::new("10", "5000", "linux-swap")).unwrap();
        assert_eq!(p.cylinders.end, 999);
        assert_eq!(p.part_type, PartitionType::LINUX_SWAP);
    }

    #[test]
    fn test_end_clamped_before_next() {
        let mut partitions = Vec::new();
        place(&mut partitions, PartitionRequest::new("600", "999", "ext4").number(2)).unwrap();
        let p = place(&mut partitions, PartitionRequest::new("0", "700", "fat32").number(1)).unwrap();
        assert_eq!((p.cylinders.start, p.cylinders.end), (0, 599));
    }

    #[test]
    fn test_renumber_ahead_of_later_partition() {
        let mut partitions = Vec::new();
        place(&mut partitions, PartitionRequest::new("500", "999", "ext4")).unwrap();
        let p = place(&mut partitions, PartitionRequest::new("0", "100", "ntfs")).unwrap();

        assert_eq!(p.number, 1);
        let shifted = partitions.iter().find(|q| q.cylinders.start == 500).unwrap();
        assert_eq!(shifted.number, 2);
        assert_eq!(shifted.device, PathBuf::from("/dev/sdz2"));
    }

    #[test]
    fn test_slot_range_and_full_table() {
        let mut partitions = Vec::new();
        assert!(matches!(
            place(&mut partitions, PartitionRequest::new("0", "10", "ext4").number(5)),
            Err(DiskError::SlotOutOfRange(5))
        ));
        for (start, end) in [("0", "99"), ("100", "199"), ("200", "299"), ("300", "399")] {
            place(&mut partitions, PartitionRequest::new(start, end, "ext4")).unwrap();
        }
        assert!(matches!(
            place(&mut partitions, PartitionRequest::new("400", "499", "ext4")),
            Err(DiskError::SlotOutOfRange(5))
        ));
        assert!(matches!(
            place(&mut partitions, PartitionRequest::new("400", "499", "ext4").number(2)),
            Err(DiskError::SlotOutOfRange(5))
        ));
        assert_eq!(partitions.len(), 4);
    }

    #[test]
    fn test_unresolvable_overlap_leaves_list_untouched() {
        let mut partitions = Vec::new();
        place(&mut partitions, PartitionRequest::new("0", "999", "ext4")).unwrap();
        let before = partitions.clone();
        let result = place(&mut partitions, PartitionRequest::new("100", "200", "ext4"));
        assert!(matches!(result, Err(DiskError::OverlapUnresolvable { number: 2, .. })));
        assert_eq!(partitions, before);
    }

    #[test]
    fn test_sector_mode_alignment_and_lba() {
        let mut partitions = Vec::new();
        let p = place_partition(
            &mut partitions,
            Path::new("/dev/sdz"),
            &geometry(),
            CoordinateSystem::Sectors,
            &PartitionRequest::new("63", "1g", "0b").lba(true),
        )
        .unwrap();

        let sectors = p.sectors.unwrap();
        assert_eq!(sectors.start, 2048);
        assert_eq!(sectors.end, 2_097_151);
        assert_eq!(p.size, sectors.size * 512);
        assert_eq!(p.part_type, PartitionType::FAT32_LBA);
        assert_eq!(p.filesystem, "fat32");
        assert!(p.lba);

        let q = place_partition(
            &mut partitions,
            Path::new("/dev/sdz"),
            &geometry(),
            CoordinateSystem::Sectors,
            &PartitionRequest::new("2097152s", "2099000s", "ext4"),
        )
        .unwrap();
        assert_eq!(q.sectors.unwrap().start, 2_097_152);
    }

    #[test]
    fn test_unknown_filesystem_is_rejected() {
        let mut partitions = Vec::new();
        assert!(matches!(
            place(&mut partitions, PartitionRequest::new("0", "10", "zfs")),
            Err(DiskError::UnsupportedFilesystem(_))
        ));
    }
}
