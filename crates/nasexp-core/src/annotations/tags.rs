//! Splitting notification text into annotation text and tags.

/// Extracts dashboard tags from a notification.
pub trait TagExtractor: Send + Sync {
    /// Returns the text to display and the tags found in `text`.
    fn extract<'a>(&self, text: &'a str) -> (&'a str, Vec<String>);
}

/// Leaves the text untouched and finds no tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpTagExtractor;

impl TagExtractor for NoOpTagExtractor {
    fn extract<'a>(&self, text: &'a str) -> (&'a str, Vec<String>) {
        (text, Vec::new())
    }
}

/// Turns leading `[tag] ` prefixes, as written by the notification center,
/// into tags.
///
/// `"[nas] [Malware Remover] Scan completed."` becomes the text
/// `"Scan completed."` with tags `nas` and `Malware Remover`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationCenterTagExtractor;

impl TagExtractor for NotificationCenterTagExtractor {
    fn extract<'a>(&self, text: &'a str) -> (&'a str, Vec<String>) {
        let mut rest = text;
        let mut tags = Vec::new();
        while let Some(inner) = rest.strip_prefix('[') {
            let Some(end) = inner.find("] ") else {
                break;
            };
            tags.push(inner[..end].to_string());
            rest = &inner[end + 2..];
        }
        (rest, tags)
    }
}
