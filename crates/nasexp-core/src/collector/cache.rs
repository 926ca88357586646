//! SSD cache probes: legacy flashcache (pre-5.x kernels) and dm-cache.

use std::io;
use std::path::Path;

use crate::collector::environment::TOOL_DMSETUP;
use crate::collector::probe::{CollectError, Probe, ProbeContext};
use crate::metrics::MetricSample;

const FLASHCACHE_STATS_PATH: &str = "/proc/flashcache/CG0/flashcache_stats";

/// dm-cache block sizes are expressed in 512-byte sectors.
const SECTOR_SIZE: f64 = 512.0;

/// Parses `key: value` lines of the flashcache stats file.
pub fn parse_flashcache_stats(content: &str) -> Result<Vec<(String, f64)>, CollectError> {
    let mut stats = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| CollectError::Parse(format!("invalid flashcache line: {:?}", line)))?;
        let value: f64 = value.trim().parse().map_err(|_| {
            CollectError::Parse(format!("invalid flashcache value: {:?}", line))
        })?;
        let key: String = key
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        stats.push((key, value));
    }
    Ok(stats)
}

/// Flashcache counters. Only present on kernels older than 5.
pub struct FlashcacheProbe;

impl Probe for FlashcacheProbe {
    fn name(&self) -> &'static str {
        "flashcache"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        if ctx.env.kernel_major.is_some_and(|major| major >= 5) {
            return Ok(Vec::new());
        }
        let content = match ctx.fs.read_to_string(Path::new(FLASHCACHE_STATS_PATH)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_flashcache_stats(&content)?
            .into_iter()
            .map(|(key, value)| MetricSample::new(format!("node_flashcache_{}", key), value))
            .collect())
    }
}

/// One target's line of `dmsetup status` for a `cache` target.
#[derive(Debug, Clone, PartialEq)]
pub struct DmCacheStatus {
    /// Device name, when `dmsetup` prefixed the line with it.
    pub name: Option<String>,
    pub block_size_sectors: u64,
    pub used_blocks: u64,
    pub total_blocks: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
}

fn parse_ratio(token: &str) -> Option<(u64, u64)> {
    let (used, total) = token.split_once('/')?;
    Some((used.parse().ok()?, total.parse().ok()?))
}

/// Parses a kernel dm-cache status line:
///
/// ```text
/// [name: ]<start> <len> cache <md block size> <md used>/<md total> <cache block size>
///     <cache used>/<cache total> <read hits> <read misses> <write hits> <write misses> ...
/// ```
pub fn parse_dm_cache_status(line: &str) -> Result<DmCacheStatus, CollectError> {
    let invalid = || CollectError::Parse(format!("invalid dm-cache status: {:?}", line));

    let (name, rest) = match line.split_once(": ") {
        Some((name, rest)) if !name.contains(char::is_whitespace) => {
            (Some(name.to_string()), rest)
        }
        _ => (None, line),
    };

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let target = tokens.iter().position(|t| *t == "cache").ok_or_else(invalid)?;
    let field = |offset: usize| tokens.get(target + offset).copied().ok_or_else(invalid);
    let number = |offset: usize| -> Result<u64, CollectError> {
        field(offset)?.parse().map_err(|_| invalid())
    };

    let (used_blocks, total_blocks) = parse_ratio(field(4)?).ok_or_else(invalid)?;
    Ok(DmCacheStatus {
        name,
        block_size_sectors: number(3)?,
        used_blocks,
        total_blocks,
        read_hits: number(5)?,
        read_misses: number(6)?,
        write_hits: number(7)?,
        write_misses: number(8)?,
    })
}

/// dm-cache usage and hit ratios for the discovered cache targets.
pub struct DmCacheProbe;

impl DmCacheProbe {
    fn samples(device: &str, status: &DmCacheStatus) -> Vec<MetricSample> {
        let block_bytes = status.block_size_sectors as f64 * SECTOR_SIZE;
        let counter = |name: &str, value: f64, help: &str| {
            MetricSample::new(name, value)
                .with_label("device", device)
                .with_help(help)
                .counter()
        };

        let reads = status.read_hits as f64 + status.read_misses as f64;
        let writes = status.write_hits as f64 + status.write_misses as f64;

        let mut samples = vec![
            counter(
                "node_dmcache_used_bytes_total",
                status.used_blocks as f64 * block_bytes,
                "Bytes resident in the cache",
            ),
            counter(
                "node_dmcache_bytes_total",
                status.total_blocks as f64 * block_bytes,
                "Total cache size in bytes",
            ),
            counter(
                "node_dmcache_read_hit_total",
                status.read_hits as f64,
                "Number of times a READ bio has been mapped to the cache",
            ),
            counter(
                "node_dmcache_read_total",
                reads,
                "Number of times a READ bio has occurred",
            ),
            counter(
                "node_dmcache_write_hit_total",
                status.write_hits as f64,
                "Number of times a WRITE bio has been mapped to the cache",
            ),
            counter(
                "node_dmcache_write_total",
                writes,
                "Number of times a WRITE bio has occurred",
            ),
        ];
        if reads > 0.0 {
            samples.push(
                MetricSample::new(
                    "node_dmcache_read_hit_percent",
                    status.read_hits as f64 / reads * 100.0,
                )
                .with_label("device", device)
                .gauge(),
            );
        }
        if writes > 0.0 {
            samples.push(
                MetricSample::new(
                    "node_dmcache_write_hit_percent",
                    status.write_hits as f64 / writes * 100.0,
                )
                .with_label("device", device)
                .gauge(),
            );
        }
        samples
    }
}

impl Probe for DmCacheProbe {
    fn name(&self) -> &'static str {
        "dmcache"
    }

    fn collect(&mut self, ctx: &ProbeContext<'_>) -> Result<Vec<MetricSample>, CollectError> {
        let clients = &ctx.env.dm_cache_clients;
        if clients.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["status", "--noflush"];
        args.extend(clients.iter().map(|c| c.name.as_str()));
        let Some(result) = ctx.run_tool(TOOL_DMSETUP, &args) else {
            return Ok(Vec::new());
        };
        let output = result?;

        let mut samples = Vec::new();
        for (position, line) in output.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let status = parse_dm_cache_status(line)?;
            let device = match &status.name {
                Some(name) => name.as_str(),
                None => clients
                    .get(position)
                    .map(|c| c.name.as_str())
                    .ok_or_else(|| {
                        CollectError::Parse(format!("unexpected dm-cache line: {:?}", line))
                    })?,
            };
            samples.extend(Self::samples(device, &status));
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::environment::EnvironmentSnapshot;
    use crate::collector::mock::scenarios::DM_CACHE_STATUS;
    use crate::collector::mock::{MockCommands, MockFs};

    #[test]
    fn test_parse_dm_cache_status() {
        let status = parse_dm_cache_status(DM_CACHE_STATUS).unwrap();
        assert_eq!(status.name, None);
        assert_eq!(status.block_size_sectors, 2048);
        assert_eq!(status.used_blocks, 5000);
        assert_eq!(status.total_blocks, 65536);
        assert_eq!(status.read_hits, 1200);
        assert_eq!(status.read_misses, 300);
        assert_eq!(status.write_hits, 800);
        assert_eq!(status.write_misses, 200);
    }

    #[test]
    fn test_parse_dm_cache_status_with_name() {
        let line = format!("CG1: {}", DM_CACHE_STATUS);
        let status = parse_dm_cache_status(&line).unwrap();
        assert_eq!(status.name.as_deref(), Some("CG1"));
        assert!(parse_dm_cache_status("0 100 linear 8:0 0").is_err());
        assert!(parse_dm_cache_status("0 100 cache 8 1/2").is_err());
    }

    #[test]
    fn test_dm_cache_samples() {
        let fs = MockFs::typical_nas();
        let cmds = MockCommands::typical_nas();
        let env = EnvironmentSnapshot::discover(&fs, &cmds, None);
        let ctx = ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        };

        let samples = DmCacheProbe.collect(&ctx).unwrap();
        let get = |name: &str| samples.iter().find(|s| s.name == name).unwrap().value;
        assert_eq!(get("node_dmcache_used_bytes_total"), 5000.0 * 1024.0 * 1024.0);
        assert_eq!(get("node_dmcache_bytes_total"), 65536.0 * 1024.0 * 1024.0);
        assert_eq!(get("node_dmcache_read_total"), 1500.0);
        assert_eq!(get("node_dmcache_read_hit_percent"), 80.0);
        assert_eq!(get("node_dmcache_write_hit_percent"), 80.0);
        assert!(samples.iter().all(|s| s.label("device") == Some("CG0")));
    }

    #[test]
    fn test_dm_cache_hit_ratio_with_huge_counters() {
        let status = DmCacheStatus {
            name: None,
            block_size_sectors: 8,
            used_blocks: 1,
            total_blocks: 2,
            read_hits: u64::MAX,
            read_misses: u64::MAX,
            write_hits: 0,
            write_misses: u64::MAX,
        };
        let samples = DmCacheProbe::samples("CG0", &status);
        let get = |name: &str| samples.iter().find(|s| s.name == name).unwrap().value;
        assert_eq!(get("node_dmcache_read_total"), u64::MAX as f64 * 2.0);
        assert_eq!(get("node_dmcache_read_hit_percent"), 50.0);
        assert_eq!(get("node_dmcache_write_hit_percent"), 0.0);
    }

    #[test]
    fn test_dm_cache_without_clients() {
        let fs = MockFs::typical_nas();
        let cmds = MockCommands::typical_nas();
        let mut env = EnvironmentSnapshot::discover(&fs, &cmds, None);
        env.dm_cache_clients.clear();
        let ctx = ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        };
        assert!(DmCacheProbe.collect(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_flashcache_on_old_kernel() {
        let mut fs = MockFs::typical_nas();
        fs.add_file("/proc/sys/kernel/osrelease", "4.14.24-qnap\n");
        fs.add_file(
            FLASHCACHE_STATS_PATH,
            "reads: 100\nwrites: 50\nread hits: 80\n",
        );
        let cmds = MockCommands::typical_nas();
        let env = EnvironmentSnapshot::discover(&fs, &cmds, None);
        let ctx = ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        };

        let samples = FlashcacheProbe.collect(&ctx).unwrap();
        let names: Vec<_> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "node_flashcache_reads",
                "node_flashcache_writes",
                "node_flashcache_read_hits"
            ]
        );
    }

    #[test]
    fn test_flashcache_skipped_on_new_kernel_or_missing_file() {
        let mut fs = MockFs::typical_nas();
        fs.add_file(FLASHCACHE_STATS_PATH, "reads: 100\n");
        let cmds = MockCommands::typical_nas();
        let env = EnvironmentSnapshot::discover(&fs, &cmds, None);
        let ctx = ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        };
        assert!(FlashcacheProbe.collect(&ctx).unwrap().is_empty());

        let fs = MockFs::new();
        let env = EnvironmentSnapshot::default();
        let ctx = ProbeContext {
            fs: &fs,
            commands: &cmds,
            env: &env,
        };
        assert!(FlashcacheProbe.collect(&ctx).unwrap().is_empty());
    }
}
