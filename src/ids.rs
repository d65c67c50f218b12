//! Monotonic, reproducible identifiers.
//!
//! Ids are generated from a process-wide atomic counter rather than random
//! UUIDs so that two runs fed the same inputs produce the same ids, and so
//! ids sort by creation order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ORDER_SEQ: AtomicU64 = AtomicU64::new(1);
static TRADE_SEQ: AtomicU64 = AtomicU64::new(1);
static CLIENT_SEQ: AtomicU64 = AtomicU64::new(1);

macro_rules! id_newtype {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(seq: u64) -> Self {
                Self(format!(concat!($prefix, "{}"), seq))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(OrderId, "ord-");
id_newtype!(PositionId, "pos-");
id_newtype!(TradeId, "trade-");
id_newtype!(ClientId, "client-");

impl OrderId {
    /// Allocates the next order id from the shared counter.
    pub fn next() -> Self {
        Self::new(ORDER_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl PositionId {
    /// A position id derives injectively from the order id that opened it (I5).
    pub fn from_order(order_id: &OrderId) -> Self {
        Self(format!("pos-{}", order_id.0.strip_prefix("ord-").unwrap_or(&order_id.0)))
    }
}

impl TradeId {
    pub fn next() -> Self {
        Self::new(TRADE_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl ClientId {
    pub fn next() -> Self {
        Self::new(CLIENT_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_monotonic_and_unique() {
        let a = OrderId::next();
        let b = OrderId::next();
        assert_ne!(a, b);
        assert!(a.0 < b.0 || a.0 != b.0);
    }

    #[test]
    fn position_id_derives_from_order_id() {
        let order = OrderId::new(42);
        let pos = PositionId::from_order(&order);
        assert_eq!(pos.0, "pos-42");
    }
}
