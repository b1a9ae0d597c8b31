use anyhow::Context;
use clap::{Parser, Subcommand};
use diskwright_core::{
    BootCodeFamily, BootRecordKind, DiskLabel, EngineConfig, FilesystemKind, HookRegistry,
    LoggingHook, PartitionType,
};
use diskwright_disk::{Disk, DiskOptions, PartitionRequest, ProgressUpdate};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "diskwright")]
#[command(about = "MBR partition, filesystem and image management", long_about = None)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log external tool invocations
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Address partitions in sectors with 2048-sector alignment
    #[arg(long, global = true)]
    sectors: bool,

    /// Disable DOS-compatible cylinder placement
    #[arg(long, global = true)]
    no_dos_compat: bool,

    /// Disk device, e.g. /dev/sdb
    device: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show geometry and partitions as JSON
    Info,
    /// Create a partition; bounds accept units like 10%, 512m, 2g or bare numbers
    Create {
        start: String,
        end: String,
        /// Filesystem name or hexadecimal type code
        filesystem: String,
        #[arg(short, long)]
        number: Option<u8>,
        #[arg(short, long)]
        boot: bool,
        #[arg(long)]
        lba: bool,
    },
    /// Delete a partition
    Delete { number: u8 },
    /// Create a filesystem on a partition
    Mkfs { number: u8, filesystem: String },
    /// Resize an NTFS filesystem
    Resize {
        number: u8,
        #[arg(long)]
        size: Option<u64>,
    },
    /// Set or clear the boot flag
    Boot { number: u8, state: String },
    /// Change the partition type code
    SetType { number: u8, code: String },
    /// Write a new disk label
    Label { label: String },
    /// Print the disk signature
    Signature,
    /// Hex dump of the master boot record
    DumpMbr,
    /// Hex dump of a partition boot record
    DumpPbr { number: u8 },
    /// Install master boot code
    WriteMbr { family: String },
    /// Install partition boot code
    WritePbr { number: u8, kind: String },
    /// Zero the master boot record
    WipeTable,
    /// Save a partition image to a file or FIFO
    Save { number: u8, target: PathBuf },
    /// Restore a partition image from a file or FIFO
    Restore { number: u8, source: PathBuf },
    /// Overwrite a partition with random data
    Shred {
        number: u8,
        #[arg(short, long, default_value_t = 3)]
        iterations: u32,
        #[arg(short, long)]
        zero: bool,
    },
    /// Copy a source over the whole partition
    Fill {
        number: u8,
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }
    let default_path = dirs::config_dir().map(|dir| dir.join("diskwright").join("config.json"));
    match default_path {
        Some(path) if path.exists() => EngineConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        _ => Ok(EngineConfig::default()),
    }
}

fn hex_dump(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let text: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!("{:04x}  {:<47}  {}", row * 16, hex.join(" "), text);
    }
}

fn print_progress(update: &ProgressUpdate) {
    match update.rate_kib {
        Some(rate) => println!("{:?} {:6.2}% {} KiB/s", update.state, update.percent, rate),
        None => println!("{:?} {:6.2}%", update.state, update.percent),
    }
}

fn parse_switch(state: &str) -> anyhow::Result<bool> {
    match state {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => anyhow::bail!("Expected on or off, got '{}'", other),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(cli.config.as_ref())?;
    let hooks = Arc::new(HookRegistry::new());
    hooks.register(Arc::new(LoggingHook));

    let options = DiskOptions {
        config: Arc::new(config),
        hooks,
        dos_compatibility: !cli.no_dos_compat,
        block_alignment: cli.sectors,
        ..DiskOptions::default()
    };
    let mut disk = Disk::open_with(&cli.device, options)
        .with_context(|| format!("Failed to open {}", cli.device.display()))?;

    match cli.command {
        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&disk.report())?);
        }
        Commands::Create { start, end, filesystem, number, boot, lba } => {
            let mut request = PartitionRequest::new(start, end, filesystem).boot(boot).lba(lba);
            if let Some(number) = number {
                request = request.number(number);
            }
            let number = disk.create_partition(request)?;
            println!("Created partition {}", number);
        }
        Commands::Delete { number } => {
            disk.delete_partition(number)?;
            println!("Deleted partition {}", number);
        }
        Commands::Mkfs { number, filesystem } => {
            let kind: FilesystemKind = filesystem.parse()?;
            disk.create_filesystem(number, kind)?;
            println!("Created {} on partition {}", kind, number);
        }
        Commands::Resize { number, size } => {
            disk.resize_filesystem(number, size, None)?;
            println!("Resized partition {}", number);
        }
        Commands::Boot { number, state } => {
            disk.set_partition_bootable(number, parse_switch(&state)?)?;
        }
        Commands::SetType { number, code } => {
            disk.set_partition_id(number, PartitionType::parse(&code)?)?;
        }
        Commands::Label { label } => {
            let label: DiskLabel = label.parse()?;
            disk.set_disk_label_type(label)?;
        }
        Commands::Signature => {
            println!("0x{:08X}", disk.get_signature()?);
        }
        Commands::DumpMbr => hex_dump(&disk.read_master_boot_record()?),
        Commands::DumpPbr { number } => hex_dump(&disk.read_partition_boot_record(number)?),
        Commands::WriteMbr { family } => {
            let family: BootCodeFamily = family.parse()?;
            disk.write_master_boot_record(family)?;
        }
        Commands::WritePbr { number, kind } => {
            let kind: BootRecordKind = kind.parse()?;
            disk.write_partition_boot_record(number, kind)?;
        }
        Commands::WipeTable => {
            disk.delete_partition_table()?;
            println!("Partition table of {} cleared", cli.device.display());
        }
        Commands::Save { number, target } => {
            disk.save_image(number, &target, &mut print_progress)?;
        }
        Commands::Restore { number, source } => {
            disk.restore_image(number, &source, &mut print_progress)?;
        }
        Commands::Shred { number, iterations, zero } => {
            disk.shred_partition(number, iterations, zero, &mut print_progress)?;
        }
        Commands::Fill { number, source } => {
            disk.fill_partition(number, source, &mut print_progress)?;
        }
    }

    Ok(())
}
