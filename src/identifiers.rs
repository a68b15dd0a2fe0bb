//! Type-safe identifier wrappers.
//!
//! Newtypes keep correlation ids, page ids and stream ids from being mixed
//! up at compile time.
//!
//! | Type | Origin | Description |
//! |------|--------|-------------|
//! | [`RequestId`] | Client / Server | JSON-RPC correlation id (integer or string) |
//! | [`PageId`] | Server | Page (tab) identifier, used as default target |
//! | [`StreamId`] | Server | Streaming response identifier |
//! | [`HandlerId`] | Client | Handler registration within a registry |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// RequestId
// ============================================================================

/// JSON-RPC correlation identifier.
///
/// Outbound requests always use [`RequestId::Number`]; string ids are
/// accepted on inbound messages because the wire format allows both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(u64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Returns the integer value, if this is a numeric id.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    #[inline]
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// RequestIdSequence
// ============================================================================

/// Monotonic correlation id allocator.
///
/// Starts at 1 and never repeats for the lifetime of the sequence.
#[derive(Debug)]
pub struct RequestIdSequence {
    next: AtomicU64,
}

impl RequestIdSequence {
    /// Creates a sequence whose first id is 1.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next id.
    #[inline]
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id that will be handed out next, without allocating it.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for RequestIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PageId
// ============================================================================

/// Server-assigned page identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    /// Wraps a page id string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// StreamId
// ============================================================================

/// Server-assigned stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wraps a stream id string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// HandlerId
// ============================================================================

/// Global counter for handler ids.
static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocates a fresh handler id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let seq = RequestIdSequence::new();
        assert_eq!(seq.next_id(), RequestId::Number(1));
        assert_eq!(seq.next_id(), RequestId::Number(2));
        assert_eq!(seq.peek(), 3);
    }

    #[test]
    fn test_request_id_serde_untagged() {
        let num: RequestId = serde_json::from_str("7").expect("number id");
        assert_eq!(num, RequestId::Number(7));

        let text: RequestId = serde_json::from_str("\"abc\"").expect("string id");
        assert_eq!(text, RequestId::from("abc"));

        assert_eq!(serde_json::to_string(&RequestId::Number(3)).expect("ser"), "3");
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::from("req-1").to_string(), "req-1");
    }

    #[test]
    fn test_handler_ids_unique() {
        let a = HandlerId::generate();
        let b = HandlerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_page_id_transparent() {
        let page = PageId::new("page-1");
        assert_eq!(serde_json::to_string(&page).expect("ser"), "\"page-1\"");
        assert_eq!(page.as_str(), "page-1");
    }

    proptest! {
        #[test]
        fn prop_sequence_strictly_increasing(count in 1usize..500) {
            let seq = RequestIdSequence::new();
            let mut last = 0u64;
            for _ in 0..count {
                let id = seq.next_id().as_u64().expect("numeric id");
                prop_assert!(id > last);
                last = id;
            }
        }
    }

    #[test]
    fn test_sequence_unique_across_threads() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let seq = Arc::new(RequestIdSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || {
                    (0..250)
                        .filter_map(|_| seq.next_id().as_u64())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
