//! Subscription Types
//!
//! Consumer identity and instrument filtering for hub subscriptions.
//! Filtering is evaluated on the consumer side of the broadcast channel, so
//! a selective subscriber never slows the publisher down.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscribed consumer.
pub type ConsumerId = u64;

/// A canonical instrument symbol, e.g. `BTC/USD`.
pub type Symbol = String;

/// Which instruments a subscriber wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentFilter {
    /// Deliver every instrument.
    All,
    /// Deliver only the listed instruments.
    Symbols(HashSet<Symbol>),
}

impl InstrumentFilter {
    /// Build a filter from a symbol list; an empty list means "all".
    #[must_use]
    pub fn from_symbols(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let set: HashSet<Symbol> = symbols.into_iter().collect();
        if set.is_empty() {
            Self::All
        } else {
            Self::Symbols(set)
        }
    }

    /// Whether an item for `symbol` passes this filter.
    #[must_use]
    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            Self::All => true,
            Self::Symbols(set) => set.contains(symbol),
        }
    }
}

// =============================================================================
// Consumer Id Allocation
// =============================================================================

/// Monotonic consumer id allocator shared by the hub.
#[derive(Debug, Default)]
pub struct ConsumerIdAllocator {
    next: AtomicU64,
}

impl ConsumerIdAllocator {
    /// Create an allocator starting at id 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next consumer id.
    #[must_use]
    pub fn allocate(&self) -> ConsumerId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
