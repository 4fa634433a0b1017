//! Utility functions for identifier generation and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{dedupe_key, generate_id, generate_serial};
pub use timestamps::{deadline_after, iso_timestamp, now_utc, seconds_between, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_uuid_v4() {
        let id = generate_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
