//! Shared connection flags and delivery counters
//!
//! Written only from the event dispatch path, read by the periodic tasks and the
//! log redirector. Release stores / Acquire loads give readers a consistent, if
//! slightly stale, view without locking.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Which connectivity link an event or fault refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Network,
    Messaging,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Network => write!(f, "network"),
            Link::Messaging => write!(f, "messaging"),
        }
    }
}

/// Connection state of a single link
///
/// Transitions only move forward: `NotConnected -> Connected -> Lost`, or
/// `Connected -> Stopped` when the session is shut down for a remote update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    NotConnected,
    Connected,
    Stopped,
    Lost,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LinkState::Connected,
            2 => LinkState::Stopped,
            3 => LinkState::Lost,
            _ => LinkState::NotConnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LinkState::NotConnected => 0,
            LinkState::Connected => 1,
            LinkState::Stopped => 2,
            LinkState::Lost => 3,
        }
    }

    fn rank(self) -> u8 {
        match self {
            LinkState::NotConnected => 0,
            LinkState::Connected => 1,
            LinkState::Stopped | LinkState::Lost => 2,
        }
    }
}

/// Atomic holder for a [`LinkState`]
#[derive(Debug)]
pub struct LinkStatus {
    state: AtomicU8,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LinkState::NotConnected.as_u8()),
        }
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == LinkState::Connected
    }

    /// Move to `next` if it does not go backwards. Returns the previous state
    /// when the transition was applied.
    pub fn advance(&self, next: LinkState) -> Option<LinkState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = LinkState::from_u8(raw);
                (next.rank() > current.rank()).then_some(next.as_u8())
            })
            .ok()
            .map(LinkState::from_u8)
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Published/received message counters, reset only by a process restart
#[derive(Debug, Default)]
pub struct Counters {
    published: AtomicU64,
    received: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Release);
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            published: self.published(),
            received: self.received(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub published: u64,
    pub received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_status_starts_not_connected() {
        let status = LinkStatus::new();
        assert_eq!(status.get(), LinkState::NotConnected);
        assert!(!status.is_connected());
    }

    #[test]
    fn test_link_status_moves_forward_only() {
        let status = LinkStatus::new();
        assert_eq!(
            status.advance(LinkState::Connected),
            Some(LinkState::NotConnected)
        );
        assert!(status.is_connected());

        // Never back to not-connected
        assert_eq!(status.advance(LinkState::NotConnected), None);
        assert!(status.is_connected());

        assert_eq!(status.advance(LinkState::Lost), Some(LinkState::Connected));
        assert_eq!(status.get(), LinkState::Lost);

        // Lost is terminal
        assert_eq!(status.advance(LinkState::Connected), None);
        assert_eq!(status.advance(LinkState::Stopped), None);
        assert_eq!(status.get(), LinkState::Lost);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let status = LinkStatus::new();
        status.advance(LinkState::Connected);
        status.advance(LinkState::Stopped);
        assert_eq!(status.advance(LinkState::Lost), None);
        assert_eq!(status.get(), LinkState::Stopped);
    }

    #[test]
    fn test_counters_start_at_zero_and_increase() {
        let counters = Counters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot { published: 0, received: 0 });

        counters.record_published();
        counters.record_received();
        counters.record_received();

        assert_eq!(counters.published(), 1);
        assert_eq!(counters.received(), 2);
    }

    #[test]
    fn test_link_display() {
        assert_eq!(Link::Network.to_string(), "network");
        assert_eq!(Link::Messaging.to_string(), "messaging");
    }
}
