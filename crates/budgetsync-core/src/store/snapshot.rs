use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// Lifecycle of a store's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Never fetched, or reset.
    Empty,
    /// A fetch is outstanding.
    Loading,
    /// Items reflect the most recent successful fetch (or `set_data`).
    Ready,
    /// The last fetch failed; items keep the last good value.
    Error,
}

/// Identifies one issued fetch. Sequence numbers only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(pub u64);

/// Point-in-time copy of a store's state.
///
/// Cloning is cheap: items are shared behind an `Arc`.
#[derive(Debug)]
pub struct CachedCollection<T> {
    pub items: Arc<Vec<T>>,
    pub status: Status,
    pub error: Option<FetchError>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Session that fetched (or set) the items.
    pub fetched_by: Option<String>,
    pub in_flight: Option<FetchTicket>,
}

impl<T> Clone for CachedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            status: self.status,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            fetched_by: self.fetched_by.clone(),
            in_flight: self.in_flight,
        }
    }
}

impl<T> Default for CachedCollection<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> CachedCollection<T> {
    pub fn empty() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            status: Status::Empty,
            error: None,
            fetched_at: None,
            fetched_by: None,
            in_flight: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == Status::Loading
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether items came from at least one successful fetch or `set_data`.
    pub fn is_fetched(&self) -> bool {
        self.fetched_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.fetched_at.map(|at| (Utc::now() - at).num_minutes())
    }

    /// Human readable age of the items ("just now", "5m ago", "2h ago").
    pub fn age_display(&self) -> String {
        match self.age_minutes() {
            None => "never".to_string(),
            Some(minutes) => format_age(minutes),
        }
    }
}

fn format_age(minutes: i64) -> String {
    if minutes < 1 {
        // Clock skew can produce negative ages
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// The shape every feature area hands to its consumers.
#[derive(Debug)]
pub struct StoreView<T> {
    pub data: Arc<Vec<T>>,
    pub error: Option<FetchError>,
    pub is_loading: bool,
}

impl<T> From<&CachedCollection<T>> for StoreView<T> {
    fn from(snapshot: &CachedCollection<T>) -> Self {
        Self {
            data: Arc::clone(&snapshot.items),
            error: snapshot.error.clone(),
            is_loading: snapshot.is_loading(),
        }
    }
}
