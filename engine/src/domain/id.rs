//! Opaque ID generation shared by every entity.
//!
//! IDs are UUIDv7 strings: time-ordered, so lexical sort matches creation
//! order without an extra index.

pub fn generate_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_id();
        assert!(a < b);
    }
}
