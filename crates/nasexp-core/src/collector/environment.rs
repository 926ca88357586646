//! Discovery of slow-changing host facts, cached for a TTL.
//!
//! Discovery runs vendor tools and walks `/dev` and `/sys`, which is too
//! expensive to repeat on every scrape. The engine refreshes the snapshot
//! in full when it expires and never while probes are running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::collector::procfs::parser::parse_kernel_major;
use crate::collector::traits::{CommandRunner, FileSystem};

pub const TOOL_GETSYSINFO: &str = "getsysinfo";
pub const TOOL_HAL_APP: &str = "hal_app";
pub const TOOL_NVME: &str = "nvme";
pub const TOOL_DMSETUP: &str = "dmsetup";

const KNOWN_TOOLS: [&str; 4] = [TOOL_GETSYSINFO, TOOL_HAL_APP, TOOL_NVME, TOOL_DMSETUP];

const NET_DIR: &str = "/sys/class/net";
const DEV_DIR: &str = "/dev";
const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// Default lifetime of a discovery snapshot.
pub const DEFAULT_ENVIRONMENT_TTL: Duration = Duration::from_secs(5 * 60);

/// A storage enclosure reported by `hal_app --se_enum`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub id: String,
    pub name: String,
    pub fan_count: u32,
}

/// A dm-cache target reported by `dmsetup ls --target cache`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmCacheClient {
    pub name: String,
    pub minor: u32,
}

/// Discovered host facts. Empty until the first refresh.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    pub hostname: String,
    /// Logical tool name to resolved path. Absent tools have no entry.
    pub tool_paths: BTreeMap<String, PathBuf>,
    /// Whole-disk block devices (`sdX`, `nvmeXnY`), sorted.
    pub devices: Vec<String>,
    pub nvme_devices: Vec<String>,
    /// Ethernet interfaces (`eth*`), sorted.
    pub interfaces: Vec<String>,
    pub enclosures: Vec<Enclosure>,
    pub dm_cache_clients: Vec<DmCacheClient>,
    pub kernel_major: Option<u32>,
    /// Disk bays reported by `getsysinfo hdnum`.
    pub hd_count: u32,
    /// System fans reported by `getsysinfo sysfannum`.
    pub fan_count: u32,
}

impl EnvironmentSnapshot {
    pub fn tool_path(&self, tool: &str) -> Option<&Path> {
        self.tool_paths.get(tool).map(PathBuf::as_path)
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tool_paths.contains_key(tool)
    }

    /// Runs discovery. Each field is filled independently: a failed lookup
    /// leaves only that field empty.
    pub fn discover(
        fs: &dyn FileSystem,
        commands: &dyn CommandRunner,
        hostname_override: Option<&str>,
    ) -> Self {
        let mut env = EnvironmentSnapshot {
            hostname: discover_hostname(commands, hostname_override),
            ..Default::default()
        };

        for tool in KNOWN_TOOLS {
            match commands.look_path(tool) {
                Some(path) => {
                    debug!(tool, path = %path.display(), "found tool");
                    env.tool_paths.insert(tool.to_string(), path);
                }
                None => debug!(tool, "tool not installed"),
            }
        }

        if let Some(getsysinfo) = env.tool_path(TOOL_GETSYSINFO).map(Path::to_path_buf) {
            env.hd_count = run_count(commands, &getsysinfo, "hdnum");
            env.fan_count = run_count(commands, &getsysinfo, "sysfannum");
        }

        env.interfaces = list_names(fs, NET_DIR, |name| name.starts_with("eth"));
        env.devices = list_names(fs, DEV_DIR, is_whole_disk);
        env.nvme_devices = env
            .devices
            .iter()
            .filter(|d| d.starts_with("nvme"))
            .cloned()
            .collect();

        if let Some(hal_app) = env.tool_path(TOOL_HAL_APP).map(Path::to_path_buf) {
            match commands.run(&hal_app, &["--se_enum"]) {
                Ok(out) => env.enclosures = parse_enclosures(&out),
                Err(e) => warn!(error = %e, "failed to enumerate enclosures"),
            }
        }

        if let Some(dmsetup) = env.tool_path(TOOL_DMSETUP).map(Path::to_path_buf) {
            match commands.run(&dmsetup, &["ls", "--target", "cache"]) {
                Ok(out) => env.dm_cache_clients = parse_dm_cache_clients(&out),
                Err(e) => warn!(error = %e, "failed to list dm-cache targets"),
            }
        }

        match fs.read_to_string(Path::new(OSRELEASE_PATH)) {
            Ok(content) => match parse_kernel_major(&content) {
                Ok(major) => env.kernel_major = Some(major),
                Err(e) => warn!(error = %e, "failed to parse kernel release"),
            },
            Err(e) => warn!(error = %e, "failed to read kernel release"),
        }

        info!(
            hostname = %env.hostname,
            devices = ?env.devices,
            interfaces = ?env.interfaces,
            enclosures = env.enclosures.len(),
            dm_caches = env.dm_cache_clients.len(),
            kernel_major = ?env.kernel_major,
            "environment discovered"
        );

        env
    }
}

fn discover_hostname(commands: &dyn CommandRunner, hostname_override: Option<&str>) -> String {
    if let Some(name) = hostname_override.filter(|h| !h.is_empty()) {
        return name.to_string();
    }
    match commands.run(Path::new("hostname"), &[]) {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "failed to determine hostname");
            String::new()
        }
    }
}

fn run_count(commands: &dyn CommandRunner, program: &Path, arg: &str) -> u32 {
    match commands.run(program, &[arg]) {
        Ok(out) => out.trim().parse().unwrap_or_else(|_| {
            warn!(arg, output = %out, "unexpected count from getsysinfo");
            0
        }),
        Err(e) => {
            warn!(arg, error = %e, "getsysinfo count failed");
            0
        }
    }
}

fn list_names(fs: &dyn FileSystem, dir: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let entries = match fs.read_dir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir, error = %e, "failed to list directory");
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| keep(n))
        .collect();
    names.sort();
    names
}

/// `sda`..`sdz` and `nvme0n1`-style namespaces; partitions are excluded.
fn is_whole_disk(name: &str) -> bool {
    (name.starts_with("sd") && name.len() == 3) || (name.starts_with("nvme") && name.len() == 7)
}

/// Parses `hal_app --se_enum` output: one enclosure per line as
/// comma-separated `key=value` pairs.
pub fn parse_enclosures(output: &str) -> Vec<Enclosure> {
    let mut enclosures = Vec::new();
    for line in output.lines() {
        let fields: BTreeMap<&str, &str> = line
            .split(',')
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let Some(id) = fields.get("enc_sys_id").filter(|id| !id.is_empty()) else {
            continue;
        };
        enclosures.push(Enclosure {
            id: id.to_string(),
            name: fields
                .get("enc_name")
                .filter(|n| !n.is_empty())
                .unwrap_or(id)
                .to_string(),
            fan_count: fields
                .get("max_fan_num")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
        });
    }
    enclosures
}

/// Parses `dmsetup ls --target cache` output, e.g. `CG0\t(253:4)`.
pub fn parse_dm_cache_clients(output: &str) -> Vec<DmCacheClient> {
    output
        .lines()
        .filter_map(|line| {
            let (name, dev) = line.trim().split_once(char::is_whitespace)?;
            let dev = dev.trim().strip_prefix('(')?.strip_suffix(')')?;
            let (_, minor) = dev.split_once(':')?;
            Some(DmCacheClient {
                name: name.to_string(),
                minor: minor.trim().parse().ok()?,
            })
        })
        .collect()
}

/// An [`EnvironmentSnapshot`] with its expiry.
#[derive(Debug)]
pub struct EnvironmentCache {
    snapshot: EnvironmentSnapshot,
    expiry: Option<Instant>,
    ttl: Duration,
}

impl EnvironmentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: EnvironmentSnapshot::default(),
            expiry: None,
            ttl,
        }
    }

    pub fn snapshot(&self) -> &EnvironmentSnapshot {
        &self.snapshot
    }

    /// True when never refreshed or the TTL has elapsed.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.expiry.is_none_or(|expiry| now >= expiry)
    }

    /// Re-runs discovery if stale. Returns whether a refresh happened.
    pub fn refresh_if_stale(
        &mut self,
        now: Instant,
        fs: &dyn FileSystem,
        commands: &dyn CommandRunner,
        hostname_override: Option<&str>,
    ) -> bool {
        if !self.is_stale(now) {
            return false;
        }
        self.snapshot = EnvironmentSnapshot::discover(fs, commands, hostname_override);
        self.expiry = Some(now + self.ttl);
        true
    }
}
