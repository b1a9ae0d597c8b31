#![allow(dead_code)]

use diskwright_core::test_utils::{ok, Invocation, MockRunner};
use diskwright_core::{EngineConfig, HookRegistry, ToolRunner};
use diskwright_disk::{Disk, DiskOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;
pub const SECTORS_PER_CYLINDER: u64 = 255 * 63;
pub const BYTES_PER_CYLINDER: u64 = SECTORS_PER_CYLINDER * 512;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    cylinders: (u64, u64),
    sectors: (u64, u64),
    id: String,
    boot: bool,
}

/// On-disk table as the fake table tool sees it. `None` until first written.
type TableState = Arc<Mutex<Option<Vec<Option<Slot>>>>>;

pub struct Harness {
    pub dir: TempDir,
    pub device: PathBuf,
    pub runner: Arc<MockRunner>,
    pub hooks: Arc<HookRegistry>,
    pub config: EngineConfig,
    table: TableState,
}

fn parse_script(invocation: &Invocation) -> Vec<Option<Slot>> {
    let sectors = invocation.has_arg("-uS");
    invocation
        .stdin_text()
        .lines()
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            let start: u64 = fields[0].parse().unwrap();
            let size: u64 = fields[1].parse().unwrap();
            if size == 0 {
                return None;
            }
            let end = start + size - 1;
            let (cylinders, sectors) = if sectors {
                ((start / SECTORS_PER_CYLINDER, end / SECTORS_PER_CYLINDER), (start, end))
            } else {
                (
                    (start, end),
                    (start * SECTORS_PER_CYLINDER, (end + 1) * SECTORS_PER_CYLINDER - 1),
                )
            };
            Some(Slot {
                cylinders,
                sectors,
                id: fields[2].to_string(),
                boot: fields.get(3) == Some(&"*"),
            })
        })
        .collect()
}

fn render_cylinders(device: &str, size: u64, table: &Option<Vec<Option<Slot>>>) -> String {
    let mut out = format!(
        "Disk {}: {} cylinders, 255 heads, 63 sectors/track\n\
         Units = cylinders of {} bytes, blocks of 1024 bytes, counting from 0\n\n",
        device,
        size / BYTES_PER_CYLINDER,
        BYTES_PER_CYLINDER
    );
    let Some(slots) = table else {
        out.push_str(&format!("{}: unrecognized partition table type\nNo partitions found\n", device));
        return out;
    };
    out.push_str("   Device Boot Start     End   #cyls    #blocks   Id  System\n");
    for (index, slot) in slots.iter().enumerate() {
        let number = index + 1;
        match slot {
            Some(slot) => {
                let (start, end) = slot.cylinders;
                out.push_str(&format!(
                    "{}{}   {}  {:>5}  {:>6}  {:>6}  {:>9}  {:>2}  Linux\n",
                    device,
                    number,
                    if slot.boot { "*" } else { " " },
                    start,
                    end,
                    end - start + 1,
                    (end - start + 1) * BYTES_PER_CYLINDER / 1024,
                    slot.id
                ));
            }
            None => out.push_str(&format!("{}{}          0       -       0          0    0  Empty\n", device, number)),
        }
    }
    out
}

fn render_sectors(device: &str, table: &Option<Vec<Option<Slot>>>) -> String {
    let mut out = String::from("\nUnits = sectors of 512 bytes, counting from 0\n\n");
    let Some(slots) = table else {
        out.push_str(&format!("{}: unrecognized partition table type\nNo partitions found\n", device));
        return out;
    };
    out.push_str("   Device Boot    Start       End   #sectors  Id  System\n");
    for (index, slot) in slots.iter().enumerate() {
        let number = index + 1;
        match slot {
            Some(slot) => {
                let (start, end) = slot.sectors;
                out.push_str(&format!(
                    "{}{} {} {:>9} {:>9} {:>10}  {:>2}  Linux\n",
                    device,
                    number,
                    if slot.boot { "*" } else { " " },
                    start,
                    end,
                    end - start + 1,
                    slot.id
                ));
            }
            None => out.push_str(&format!("{}{}             0         -          0   0  Empty\n", device, number)),
        }
    }
    out
}

impl Harness {
    /// Zero-filled backing file of `size` bytes with a fake table tool.
    pub fn new(size: u64) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("disk.img");
        let file = std::fs::File::create(&device).unwrap();
        file.set_len(size).unwrap();

        let runner = Arc::new(MockRunner::new());
        let table: TableState = Arc::new(Mutex::new(None));
        let name = device.display().to_string();

        let state = Arc::clone(&table);
        runner.respond_with("sfdisk", &["-f"], move |invocation| {
            *state.lock().unwrap() = Some(parse_script(invocation));
            ok("")
        });

        let state = Arc::clone(&table);
        let (device_name, disk_size) = (name.clone(), size);
        runner.respond_with("sfdisk", &["-l"], move |_| {
            ok(&render_cylinders(&device_name, disk_size, &state.lock().unwrap()))
        });

        let state = Arc::clone(&table);
        let device_name = name;
        runner.respond_with("sfdisk", &["-uS", "-l"], move |_| {
            ok(&render_sectors(&device_name, &state.lock().unwrap()))
        });

        Self {
            dir,
            device,
            runner,
            hooks: Arc::new(HookRegistry::new()),
            config: EngineConfig::without_delays(),
            table,
        }
    }

    pub fn options(&self, block_alignment: bool) -> DiskOptions {
        let runner: Arc<dyn ToolRunner> = self.runner.clone();
        DiskOptions {
            config: Arc::new(self.config.clone()),
            runner,
            hooks: Arc::clone(&self.hooks),
            dos_compatibility: true,
            block_alignment,
        }
    }

    pub fn open(&self) -> Disk {
        Disk::open_with(&self.device, self.options(false)).unwrap()
    }

    pub fn open_sectors(&self) -> Disk {
        Disk::open_with(&self.device, self.options(true)).unwrap()
    }

    pub fn node(&self, number: u8) -> PathBuf {
        PathBuf::from(format!("{}{}", self.device.display(), number))
    }

    /// Creates the node file of partition `number` holding `content`.
    pub fn make_node(&self, number: u8, content: &[u8]) -> PathBuf {
        let node = self.node(number);
        std::fs::write(&node, content).unwrap();
        node
    }

    pub fn probe_as(&self, number: u8, filesystem: &str) {
        let node = self.node(number).display().to_string();
        self.runner.respond("blkid", &[node.as_str()], ok(&format!("{}\n", filesystem)));
    }

    pub fn table_writes(&self) -> Vec<Invocation> {
        self.runner
            .calls_to("sfdisk")
            .into_iter()
            .filter(|i| i.has_arg("-f"))
            .collect()
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn read_byte(path: &Path, offset: usize) -> u8 {
    std::fs::read(path).unwrap()[offset]
}
