//! Id generation.
//!
//! All ids are UUID v7 (time-ordered) generated via [`uuid::Uuid::now_v7`],
//! so lexical order roughly follows creation order.

use uuid::Uuid;

/// Generate a new event id.
#[must_use]
pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::now_v7().simple())
}

/// Generate a new opaque id with the given prefix.
#[must_use]
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_prefixed() {
        assert!(new_event_id().starts_with("evt_"));
    }

    #[test]
    fn event_ids_are_unique() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, b);
    }

    #[test]
    fn prefixed_id_uses_prefix() {
        let id = new_prefixed_id("conn");
        assert!(id.starts_with("conn_"));
        // prefix + '_' + 32 hex chars
        assert_eq!(id.len(), "conn_".len() + 32);
    }
}
