//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses `/proc/uptime` content, returning seconds since boot.
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))
}

/// Parsed data from `/proc/meminfo`, in kB.
///
/// `mem_available` is `None` on kernels that predate the field.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: Option<u64>,
    pub buffers: u64,
    pub cached: u64,
    pub active: u64,
    pub inactive: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut seen_total = false;

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        let Some((key, _)) = line.split_once(':') else {
            continue;
        };
        match key {
            "MemTotal" => {
                info.mem_total = parse_kb(line);
                seen_total = true;
            }
            "MemFree" => info.mem_free = parse_kb(line),
            "MemAvailable" => info.mem_available = Some(parse_kb(line)),
            "Buffers" => info.buffers = parse_kb(line),
            "Cached" => info.cached = parse_kb(line),
            "Active" => info.active = parse_kb(line),
            "Inactive" => info.inactive = parse_kb(line),
            "SwapTotal" => info.swap_total = parse_kb(line),
            "SwapFree" => info.swap_free = parse_kb(line),
            _ => {}
        }
    }

    if !seen_total {
        return Err(ParseError::new("MemTotal missing from meminfo"));
    }
    Ok(info)
}

/// Single CPU stats from `/proc/stat`, in clock ticks.
#[derive(Debug, Clone, Default)]
pub struct CpuStat {
    pub cpu_id: Option<u32>, // None for aggregate "cpu" line
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Tick counters paired with their `mode` label.
    pub fn modes(&self) -> [(&'static str, u64); 8] {
        [
            ("user", self.user),
            ("nice", self.nice),
            ("system", self.system),
            ("idle", self.idle),
            ("iowait", self.iowait),
            ("irq", self.irq),
            ("softirq", self.softirq),
            ("steal", self.steal),
        ]
    }
}

/// Parses the `cpu` lines of `/proc/stat`.
///
/// The aggregate line comes first, followed by one entry per CPU.
pub fn parse_cpu_stat(content: &str) -> Result<Vec<CpuStat>, ParseError> {
    let mut cpus = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            continue;
        };
        if !first.starts_with("cpu") {
            continue;
        }

        let cpu_id = if *first == "cpu" {
            None
        } else {
            Some(
                first
                    .strip_prefix("cpu")
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| ParseError::new(format!("invalid cpu id: {}", first)))?,
            )
        };

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        cpus.push(CpuStat {
            cpu_id,
            user: get_val(1),
            nice: get_val(2),
            system: get_val(3),
            idle: get_val(4),
            iowait: get_val(5),
            irq: get_val(6),
            softirq: get_val(7),
            steal: get_val(8),
        });
    }

    if cpus.first().is_none_or(|c| c.cpu_id.is_some()) {
        return Err(ParseError::new("aggregate cpu line missing from stat"));
    }
    Ok(cpus)
}

/// Parsed data from `/proc/loadavg`.
#[derive(Debug, Clone, Default)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// Parses `/proc/loadavg` content.
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ParseError::new("invalid loadavg format"));
    }

    let load1 = parts[0]
        .parse()
        .map_err(|_| ParseError::new("invalid load1"))?;
    let load5 = parts[1]
        .parse()
        .map_err(|_| ParseError::new("invalid load5"))?;
    let load15 = parts[2]
        .parse()
        .map_err(|_| ParseError::new("invalid load15"))?;

    Ok(LoadAvg {
        load1,
        load5,
        load15,
    })
}

// ============ Disk Stats Parser ============

/// Parsed data from `/proc/diskstats`.
#[derive(Debug, Clone, Default)]
pub struct DiskStats {
    /// Device name (sda, nvme0n1, etc.)
    pub device: String,
    /// Number of reads completed
    pub reads: u64,
    /// Number of sectors read
    pub read_sectors: u64,
    /// Time spent reading (ms)
    pub read_time: u64,
    /// Number of writes completed
    pub writes: u64,
    /// Number of sectors written
    pub write_sectors: u64,
    /// Time spent writing (ms)
    pub write_time: u64,
    /// Number of I/Os currently in progress
    pub io_in_progress: u64,
    /// Time spent doing I/Os (ms)
    pub io_time: u64,
}

/// Sector size used by `/proc/diskstats`, independent of the device.
pub const DISKSTATS_SECTOR_SIZE: u64 = 512;

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards ...]
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStats>, ParseError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue; // Skip malformed lines
        }

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        disks.push(DiskStats {
            device: parts[2].to_string(),
            reads: get_val(3),
            read_sectors: get_val(5),
            read_time: get_val(6),
            writes: get_val(7),
            write_sectors: get_val(9),
            write_time: get_val(10),
            io_in_progress: get_val(11),
            io_time: get_val(12),
        });
    }

    Ok(disks)
}

/// Extracts the major version from `/proc/sys/kernel/osrelease`
/// (e.g. `4.14.24-qnap` yields 4).
pub fn parse_kernel_major(content: &str) -> Result<u32, ParseError> {
    let release = content.trim();
    release
        .split(['.', '-'])
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::new(format!("invalid kernel release: {:?}", release)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("12345.67 98765.43\n").unwrap(), 12345.67);
        assert!(parse_uptime("").is_err());
        assert!(parse_uptime("abc 1").is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4000000 kB
";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_free, 8192000);
        assert_eq!(info.mem_available, Some(12000000));
        assert_eq!(info.cached, 2048000);
        assert_eq!(info.active, 4096000);
        assert_eq!(info.swap_free, 4000000);
    }

    #[test]
    fn test_parse_meminfo_without_available() {
        let info = parse_meminfo("MemTotal: 1024 kB\nMemFree: 512 kB\n").unwrap();
        assert_eq!(info.mem_available, None);
        assert!(parse_meminfo("MemFree: 512 kB\n").is_err());
    }

    #[test]
    fn test_parse_cpu_stat() {
        let content = "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 5000 250 1500 40000 500 100 50 0 0 0
cpu1 5000 250 1500 40000 500 100 50 0 0 0
intr 1000000 50 0 0
ctxt 500000
btime 1700000000
";
        let cpus = parse_cpu_stat(content).unwrap();
        assert_eq!(cpus.len(), 3);
        assert_eq!(cpus[0].cpu_id, None);
        assert_eq!(cpus[0].user, 10000);
        assert_eq!(cpus[0].idle, 80000);
        assert_eq!(cpus[1].cpu_id, Some(0));
        assert_eq!(cpus[2].cpu_id, Some(1));
        assert_eq!(cpus[0].modes()[6], ("softirq", 100));
    }

    #[test]
    fn test_parse_cpu_stat_requires_aggregate() {
        assert!(parse_cpu_stat("ctxt 1\n").is_err());
        assert!(parse_cpu_stat("cpu0 1 2 3 4\n").is_err());
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.15 0.10 0.05 1/150 1234\n").unwrap();
        assert_eq!(load.load1, 0.15);
        assert_eq!(load.load5, 0.10);
        assert_eq!(load.load15, 0.05);
        assert!(parse_loadavg("0.15").is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000
   7       0 loop0 1 2
";
        let disks = parse_diskstats(content).unwrap();
        assert_eq!(disks.len(), 3);
        assert_eq!(disks[0].device, "sda");
        assert_eq!(disks[0].reads, 12345);
        assert_eq!(disks[0].read_sectors, 987654);
        assert_eq!(disks[0].write_sectors, 456789);
        assert_eq!(disks[2].device, "nvme0n1");
        assert_eq!(disks[2].io_in_progress, 5);
        assert_eq!(disks[2].io_time, 15000);
    }

    #[test]
    fn test_parse_kernel_major() {
        assert_eq!(parse_kernel_major("4.14.24-qnap\n").unwrap(), 4);
        assert_eq!(parse_kernel_major("5.10.60").unwrap(), 5);
        assert!(parse_kernel_major("qnap").is_err());
    }
}
