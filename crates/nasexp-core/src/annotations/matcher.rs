//! Pairing of "operation finished" notifications with their "started" counterpart.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

/// Default number of pending start annotations kept for matching.
pub const DEFAULT_MATCHER_CAPACITY: usize = 20;

/// Correlates end notifications with previously recorded start notifications.
pub trait RegionMatcher: Send {
    /// Records a start annotation.
    fn add(&mut self, id: i64, text: &str);

    /// Returns the id of the start annotation `text` closes, removing it.
    fn match_end(&mut self, text: &str) -> Option<i64>;
}

/// A matcher that never pairs anything. Every notification is a point annotation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRegionMatcher;

impl RegionMatcher for NoOpRegionMatcher {
    fn add(&mut self, _id: i64, _text: &str) {}

    fn match_end(&mut self, _text: &str) -> Option<i64> {
        None
    }
}

/// Rewrites an end notification into the start text it closes.
struct ReplacementRule {
    pattern: Regex,
    template: &'static str,
}

impl ReplacementRule {
    fn new(pattern: &str, template: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("valid regex"),
            template,
        }
    }

    fn start_text(&self, text: &str) -> Option<String> {
        if !self.pattern.is_match(text) {
            return None;
        }
        Some(self.pattern.replace_all(text, self.template).into_owned())
    }
}

static RULES: LazyLock<Vec<ReplacementRule>> = LazyLock::new(|| {
    vec![
        ReplacementRule::new(
            r"\[Malware Remover\] Scan completed\.",
            "[Malware Remover] Started scanning.",
        ),
        ReplacementRule::new(
            r"\[Storage & Snapshots\] Finished(\s.*)",
            "[Storage & Snapshots] Started${1}",
        ),
        ReplacementRule::new(
            r"\[Firmware Update\] Started updating firmware",
            "[Firmware Update] Started downloading firmware",
        ),
        ReplacementRule::new(
            r"\[Firmware Update\] Updated system\.",
            "[Firmware Update] Started updating firmware.",
        ),
        ReplacementRule::new(
            r"\[Disk S\.M\.A\.R\.T\.\] (.+) Rapid Test result:.*",
            "[Disk S.M.A.R.T.] ${1} Rapid Test started.",
        ),
        ReplacementRule::new(
            r#"\[Antivirus\] Completed scan job ("[^"]+").+"#,
            "[Antivirus] Started scan job ${1}.",
        ),
        ReplacementRule::new(
            r"\[SortMyQPKGs\] ('.+') completed",
            "[SortMyQPKGs] ${1} requested",
        ),
        ReplacementRule::new(
            r#"\[RunLast\] end ("[^"]+") scripts"#,
            "[RunLast] begin ${1} scripts ...",
        ),
        ReplacementRule::new(
            r"\[SecurityCounselor\] Finished",
            "[SecurityCounselor] Started",
        ),
    ]
});

/// Bounded FIFO of pending start annotations.
///
/// Matching does not refresh an entry's position; the oldest entry is evicted
/// first once the capacity is reached.
#[derive(Debug, Clone)]
pub struct FifoRegionMatcher {
    capacity: usize,
    entries: VecDeque<(i64, String)>,
}

impl FifoRegionMatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FifoRegionMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCHER_CAPACITY)
    }
}

impl RegionMatcher for FifoRegionMatcher {
    fn add(&mut self, id: i64, text: &str) {
        self.entries.push_back((id, text.to_string()));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    fn match_end(&mut self, text: &str) -> Option<i64> {
        for rule in RULES.iter() {
            let Some(start) = rule.start_text(text) else {
                continue;
            };
            if let Some(pos) = self.entries.iter().position(|(_, t)| *t == start) {
                return self.entries.remove(pos).map(|(id, _)| id);
            }
        }
        None
    }
}
