use diskwright_core::{
    CoordinateSystem, DiskError, DiskLabel, OpArgs, OpOutput, Operation, Partition, Result, ToolCommand,
};
use std::thread;

use super::MAX_SLOTS;
use crate::disk::{expect_unit, Disk};

/// Table tool input: one `start,size,id[,*]` line per slot, `0,0` for empty slots.
pub fn serialize_table(partitions: &[Partition], system: CoordinateSystem) -> Result<String> {
    let mut script = String::new();
    for number in 1..=MAX_SLOTS {
        let Some(partition) = partitions.iter().find(|p| p.number == number) else {
            script.push_str("0,0\n");
            continue;
        };
        let extent = partition.extent(system).ok_or_else(|| {
            DiskError::invalid(format!("partition {} has no sector coordinates", number))
        })?;
        script.push_str(&format!(
            "{},{},{}{}\n",
            extent.start,
            extent.size,
            partition.part_type.script_code(),
            if partition.boot { ",*" } else { "" }
        ));
    }
    Ok(script)
}

impl Disk {
    /// Feeds `partitions` to the table tool without rereading anything.
    pub(crate) fn apply_table_script(&self, partitions: &[Partition]) -> Result<()> {
        let system = self.coordinate_system();
        let script = serialize_table(partitions, system)?;
        log::debug!("Table script for {}:\n{}", self.device.display(), script);

        let mut command = self.table_tool().args(["-L", "--no-reread", "-f"]);
        command = match system {
            CoordinateSystem::Sectors => command.arg("-uS"),
            CoordinateSystem::Cylinders if self.dos_compatibility => command.arg("-D"),
            CoordinateSystem::Cylinders => command,
        };
        let command = command.arg(self.device.display().to_string()).input(script);
        let line = command.command_line();
        self.runner.run(command)?.check(&line)?;
        Ok(())
    }

    /// Asks the kernel to reload the table. Failure is only logged.
    pub fn force_kernel_reread(&self) {
        let command = ToolCommand::new(&self.config.tools.blockdev)
            .arg("--rereadpt")
            .arg(self.device.display().to_string());
        let line = command.command_line();
        match self.runner.run(command).and_then(|output| output.check(&line)) {
            Ok(_) => {}
            Err(e) => log::warn!("Kernel reread of {} failed: {}", self.device.display(), e),
        }
    }

    /// Reread by the kernel, settle, then read the table again.
    pub(crate) fn refresh_table(&mut self) -> Result<()> {
        self.force_kernel_reread();
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.read_partition_table()
    }

    /// Replaces the on-disk table with the in-memory partition list.
    pub fn write_partition_table(&mut self) -> Result<()> {
        let output = self.hooked(OpArgs::WritePartitionTable, |disk, args| {
            if !matches!(args, OpArgs::WritePartitionTable) {
                return Err(args.mismatch(Operation::WritePartitionTable));
            }
            let partitions = disk.partitions.clone();
            disk.apply_table_script(&partitions)?;
            disk.refresh_table()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::WritePartitionTable)
    }

    pub fn set_disk_label_type(&mut self, label: DiskLabel) -> Result<()> {
        let output = self.hooked(OpArgs::SetDiskLabelType { label }, |disk, args| {
            let OpArgs::SetDiskLabelType { label } = *args else {
                return Err(args.mismatch(Operation::SetDiskLabelType));
            };
            let command = ToolCommand::new(&disk.config.tools.parted)
                .arg("-s")
                .arg(disk.device.display().to_string())
                .args(["mklabel", label.as_str()]);
            let line = command.command_line();
            disk.runner.run(command)?.check(&line)?;

            disk.label = Some(label);
            disk.refresh_table()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::SetDiskLabelType)
    }
}
