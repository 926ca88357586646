//! Posting notifications as dashboard annotations.
//!
//! A notification that closes a pending region updates the start annotation
//! with an end time; any other notification creates a new annotation and is
//! remembered as a possible region start.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::annotations::matcher::{NoOpRegionMatcher, RegionMatcher};
use crate::annotations::tags::{NoOpTagExtractor, TagExtractor};

#[derive(Debug)]
pub enum AnnotateError {
    /// The annotation could not be serialized.
    Encode(serde_json::Error),
    /// The request did not complete.
    Transport(String),
    /// The dashboard answered with a non-success status.
    Status { url: String, status: u16 },
    /// The dashboard's reply could not be understood.
    Decode(serde_json::Error),
}

impl fmt::Display for AnnotateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotateError::Encode(e) => write!(f, "encoding annotation: {}", e),
            AnnotateError::Transport(msg) => write!(f, "sending annotation: {}", msg),
            AnnotateError::Status { url, status } => {
                write!(f, "call to {} failed with HTTP {}", url, status)
            }
            AnnotateError::Decode(e) => write!(f, "decoding response body: {}", e),
        }
    }
}

impl std::error::Error for AnnotateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnnotateError::Encode(e) | AnnotateError::Decode(e) => Some(e),
            AnnotateError::Transport(_) | AnnotateError::Status { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardMethod {
    Post,
    Patch,
}

impl DashboardMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DashboardMethod::Post => "POST",
            DashboardMethod::Patch => "PATCH",
        }
    }
}

/// A JSON request to the dashboard's annotation API.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRequest {
    pub method: DashboardMethod,
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP transport for annotation requests.
pub trait DashboardClient: Send + Sync {
    fn send(&self, request: &DashboardRequest) -> Result<DashboardResponse, AnnotateError>;
}

/// Wire form of an annotation. Zero and empty fields are omitted.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Annotation<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_end: Option<i64>,
    #[serde(skip_serializing_if = "str::is_empty")]
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotationReply {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    message: String,
}

/// Concatenates tag lists, dropping duplicates and keeping first occurrences.
pub fn merge_tags(configured: &[String], extracted: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(configured.len() + extracted.len());
    for tag in configured.iter().cloned().chain(extracted) {
        if !merged.contains(&tag) {
            merged.push(tag);
        }
    }
    merged
}

/// Posts notifications to the dashboard, correlating start/end pairs.
pub struct Annotator {
    base_url: String,
    token: Option<String>,
    tags: Vec<String>,
    extractor: Box<dyn TagExtractor>,
    matcher: Mutex<Box<dyn RegionMatcher>>,
    client: Box<dyn DashboardClient>,
}

impl Annotator {
    /// An annotator that posts every notification as a point annotation.
    pub fn simple(
        base_url: impl Into<String>,
        token: Option<String>,
        tags: Vec<String>,
        client: Box<dyn DashboardClient>,
    ) -> Self {
        Self::region_matching(
            base_url,
            token,
            tags,
            Box::new(NoOpTagExtractor),
            Box::new(NoOpRegionMatcher),
            client,
        )
    }

    pub fn region_matching(
        base_url: impl Into<String>,
        token: Option<String>,
        tags: Vec<String>,
        extractor: Box<dyn TagExtractor>,
        matcher: Box<dyn RegionMatcher>,
        client: Box<dyn DashboardClient>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            tags: tags.into_iter().filter(|t| !t.is_empty()).collect(),
            extractor,
            matcher: Mutex::new(matcher),
            client,
        }
    }

    /// Creates an annotation for `text` at `time`, or closes the region it ends.
    ///
    /// Returns the dashboard id of the created or updated annotation.
    pub fn post(&self, text: &str, time: DateTime<Utc>) -> Result<i64, AnnotateError> {
        let mut matcher = self.matcher.lock().unwrap_or_else(PoisonError::into_inner);

        let (display_text, extracted) = self.extractor.extract(text);
        let millis = time.timestamp_millis();
        let mut annotation = Annotation {
            tags: merge_tags(&self.tags, extracted),
            time: Some(millis),
            text: display_text,
            ..Annotation::default()
        };

        let mut url = format!("{}/api/annotations", self.base_url);
        let start_id = matcher.match_end(text);
        let method = match start_id {
            Some(id) => {
                annotation.time = None;
                annotation.time_end = Some(millis);
                url = format!("{}/{}", url, id);
                DashboardMethod::Patch
            }
            None => DashboardMethod::Post,
        };

        let request = DashboardRequest {
            method,
            body: serde_json::to_vec(&annotation).map_err(AnnotateError::Encode)?,
            url,
            bearer_token: self.token.clone(),
        };

        let response = self.client.send(&request).inspect_err(|e| {
            warn!(url = %request.url, error = %e, "annotation request failed");
        })?;
        if response.status >= 300 {
            warn!(url = %request.url, status = response.status, "dashboard rejected annotation");
            return Err(AnnotateError::Status {
                url: request.url,
                status: response.status,
            });
        }

        let reply: AnnotationReply =
            serde_json::from_slice(&response.body).map_err(AnnotateError::Decode)?;
        if start_id.is_none() {
            matcher.add(reply.id, text);
        }
        info!(
            id = reply.id,
            method = method.as_str(),
            status = response.status,
            message = %reply.message,
            "annotation posted"
        );
        Ok(reply.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::matcher::FifoRegionMatcher;
    use crate::annotations::tags::NotificationCenterTagExtractor;
    use std::sync::Arc;

    /// Records requests and answers with scripted responses in order.
    #[derive(Clone, Default)]
    struct FakeDashboard {
        requests: Arc<Mutex<Vec<DashboardRequest>>>,
        replies: Arc<Mutex<Vec<Result<DashboardResponse, String>>>>,
    }

    impl FakeDashboard {
        fn reply(&self, status: u16, body: &str) {
            self.replies.lock().unwrap().push(Ok(DashboardResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
        }

        fn fail(&self, msg: &str) {
            self.replies.lock().unwrap().push(Err(msg.to_string()));
        }

        fn requests(&self) -> Vec<DashboardRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl DashboardClient for FakeDashboard {
        fn send(&self, request: &DashboardRequest) -> Result<DashboardResponse, AnnotateError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .remove(0)
                .map_err(AnnotateError::Transport)
        }
    }

    fn body(request: &DashboardRequest) -> serde_json::Value {
        serde_json::from_slice(&request.body).unwrap()
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_create_annotation() {
        let dashboard = FakeDashboard::default();
        dashboard.reply(200, r#"{"id": 1, "message": "Annotation added"}"#);
        let annotator = Annotator::simple(
            "http://grafana.example.com/",
            Some("token1".to_string()),
            vec!["tag1".to_string(), "tag2".to_string()],
            Box::new(dashboard.clone()),
        );

        let id = annotator.post("test notification", at(1_600_000_000_000)).unwrap();
        assert_eq!(id, 1);

        let requests = dashboard.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, DashboardMethod::Post);
        assert_eq!(requests[0].url, "http://grafana.example.com/api/annotations");
        assert_eq!(requests[0].bearer_token.as_deref(), Some("token1"));
        assert_eq!(
            String::from_utf8(requests[0].body.clone()).unwrap(),
            r#"{"tags":["tag1","tag2"],"time":1600000000000,"text":"test notification"}"#
        );
    }

    #[test]
    fn test_region_is_patched_with_end_time() {
        let dashboard = FakeDashboard::default();
        dashboard.reply(200, r#"{"id": 98, "message": "Annotation added"}"#);
        dashboard.reply(200, r#"{"id": 98, "message": "Annotation patched"}"#);
        let annotator = Annotator::region_matching(
            "http://grafana.com",
            None,
            vec!["nas".to_string()],
            Box::new(NotificationCenterTagExtractor),
            Box::new(FifoRegionMatcher::new(20)),
            Box::new(dashboard.clone()),
        );

        annotator
            .post("[nas] [Malware Remover] Started scanning.", at(1_000))
            .unwrap();
        let id = annotator
            .post("[nas] [Malware Remover] Scan completed.", at(5_000))
            .unwrap();
        assert_eq!(id, 98);

        let requests = dashboard.requests();
        assert_eq!(requests[0].method, DashboardMethod::Post);
        assert_eq!(requests[0].bearer_token, None);
        let start = body(&requests[0]);
        assert_eq!(start["text"], "Started scanning.");
        assert_eq!(start["tags"], serde_json::json!(["nas", "Malware Remover"]));
        assert_eq!(start["time"], 1_000);

        assert_eq!(requests[1].method, DashboardMethod::Patch);
        assert_eq!(requests[1].url, "http://grafana.com/api/annotations/98");
        let end = body(&requests[1]);
        assert_eq!(end["timeEnd"], 5_000);
        assert!(end.get("time").is_none());
    }

    #[test]
    fn test_failed_create_is_not_remembered() {
        let dashboard = FakeDashboard::default();
        dashboard.reply(500, "internal error");
        dashboard.reply(200, r#"{"id": 7}"#);
        let annotator = Annotator::region_matching(
            "http://grafana.com",
            None,
            Vec::new(),
            Box::new(NoOpTagExtractor),
            Box::new(FifoRegionMatcher::new(20)),
            Box::new(dashboard.clone()),
        );

        let err = annotator
            .post("[Malware Remover] Started scanning.", at(1_000))
            .unwrap_err();
        assert!(matches!(err, AnnotateError::Status { status: 500, .. }));

        // No pending start, so the end notification is created rather than patched.
        annotator
            .post("[Malware Remover] Scan completed.", at(2_000))
            .unwrap();
        assert_eq!(dashboard.requests()[1].method, DashboardMethod::Post);
    }

    #[test]
    fn test_transport_and_decode_errors() {
        let dashboard = FakeDashboard::default();
        dashboard.fail("connection refused");
        dashboard.reply(200, "not json");
        let annotator =
            Annotator::simple("http://grafana.com", None, Vec::new(), Box::new(dashboard));

        assert!(matches!(
            annotator.post("a", at(1)),
            Err(AnnotateError::Transport(_))
        ));
        assert!(matches!(
            annotator.post("b", at(2)),
            Err(AnnotateError::Decode(_))
        ));
    }

    #[test]
    fn test_merge_tags() {
        let configured = vec!["nas".to_string(), "qnap".to_string()];
        let merged = merge_tags(
            &configured,
            vec!["nas".to_string(), "Malware Remover".to_string()],
        );
        assert_eq!(merged, vec!["nas", "qnap", "Malware Remover"]);
        assert!(merge_tags(&[], Vec::new()).is_empty());
    }

    #[test]
    fn test_empty_configured_tags_are_dropped() {
        let dashboard = FakeDashboard::default();
        dashboard.reply(200, r#"{"id": 3}"#);
        let annotator = Annotator::simple(
            "http://grafana.com",
            Some(String::new()),
            vec![String::new()],
            Box::new(dashboard.clone()),
        );
        annotator.post("plain", at(10)).unwrap();

        let request = &dashboard.requests()[0];
        assert_eq!(request.bearer_token, None);
        assert!(body(request).get("tags").is_none());
    }
}
