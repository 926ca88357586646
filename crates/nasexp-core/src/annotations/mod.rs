//! Dashboard annotations from system notifications.
//!
//! Incoming notification text passes through a [`TagExtractor`], then the
//! [`RegionMatcher`] decides whether it closes an earlier "started" event.
//! The [`Annotator`] turns the outcome into a create or update request.

pub mod annotator;
pub mod matcher;
pub mod tags;

pub use annotator::{
    AnnotateError, Annotator, DashboardClient, DashboardMethod, DashboardRequest,
    DashboardResponse,
};
pub use matcher::{DEFAULT_MATCHER_CAPACITY, FifoRegionMatcher, NoOpRegionMatcher, RegionMatcher};
pub use tags::{NoOpTagExtractor, NotificationCenterTagExtractor, TagExtractor};
