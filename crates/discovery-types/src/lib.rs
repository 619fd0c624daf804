//! Core vocabulary for private contact discovery: validated phone numbers,
//! service identifiers, authorization-proof material, and request modes.

mod e164;
mod error;
mod ids;
mod mode;

pub use e164::E164;
pub use error::TypeError;
pub use ids::{AccessKey, Aci, AciUakPair, DiscoveryResult, Pni, ACCESS_KEY_LEN, SERVICE_ID_LEN};
pub use mode::DiscoveryMode;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e164_parse_valid() {
        let number = E164::parse("+15551234567").unwrap();
        assert_eq!(number.digits(), 15551234567);
        assert_eq!(number.to_string(), "+15551234567");
    }

    #[test]
    fn test_e164_parse_rejects_missing_plus() {
        assert!(E164::parse("15551234567").is_err());
    }

    #[test]
    fn test_e164_parse_rejects_leading_zero() {
        assert!(E164::parse("+05551234567").is_err());
    }

    #[test]
    fn test_e164_parse_rejects_non_digits() {
        assert!(E164::parse("+1555123x567").is_err());
        assert!(E164::parse("+").is_err());
    }

    #[test]
    fn test_e164_parse_rejects_too_long() {
        assert!(E164::parse("+1234567890123456").is_err());
        // 15 digits is the maximum allowed.
        assert!(E164::parse("+123456789012345").is_ok());
    }

    #[test]
    fn test_e164_wire_encoding() {
        let number = E164::parse("+15551234567").unwrap();
        assert_eq!(number.to_be_bytes(), 15551234567u64.to_be_bytes());

        let decoded = E164::from_digits(u64::from_be_bytes(number.to_be_bytes())).unwrap();
        assert_eq!(decoded, number);
    }

    #[test]
    fn test_e164_from_digits_rejects_zero() {
        assert!(E164::from_digits(0).is_err());
    }

    #[test]
    fn test_e164_serde_round_trip() {
        let number = E164::parse("+442071838750").unwrap();
        let json = serde_json::to_string(&number).unwrap();
        assert_eq!(json, "\"+442071838750\"");

        let back: E164 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, number);
    }

    #[test]
    fn test_pni_nil_detection() {
        assert!(Pni::from_bytes([0; 16]).is_nil());
        assert!(!Pni::from_bytes([7; 16]).is_nil());
    }

    #[test]
    fn test_aci_debug_formats_as_uuid() {
        let aci = Aci::from_bytes([0xab; 16]);
        let formatted = format!("{:?}", aci);
        assert_eq!(formatted, "ACI:abababab-abab-abab-abab-abababababab");
    }

    #[test]
    fn test_access_key_rejects_wrong_length() {
        assert!(AccessKey::new(vec![0; 15]).is_err());
    }

    #[test]
    fn test_access_key_redacts_debug() {
        let key = AccessKey::new(vec![9; 16]).unwrap();
        assert_eq!(format!("{:?}", key), "AccessKey([REDACTED])");
        assert_eq!(key.expose(), &[9u8; 16][..]);
    }

    #[test]
    fn test_mode_priority_order() {
        let order = DiscoveryMode::in_priority_order();
        assert_eq!(order[0], DiscoveryMode::OneOffUserRequest);
        assert_eq!(order[4], DiscoveryMode::ContactIntersection);
    }

    #[test]
    fn test_mode_statefulness() {
        assert!(!DiscoveryMode::OneOffUserRequest.is_stateful());
        assert!(DiscoveryMode::UuidBackfill.is_stateful());
        assert!(DiscoveryMode::ContactIntersection.is_stateful());
    }

    #[test]
    fn test_mode_cache_policy() {
        assert!(DiscoveryMode::OutgoingMessage.uses_undiscoverable_cache());
        assert!(DiscoveryMode::GroupMigration.uses_undiscoverable_cache());
        assert!(!DiscoveryMode::OneOffUserRequest.uses_undiscoverable_cache());
        assert!(!DiscoveryMode::UuidBackfill.uses_undiscoverable_cache());
        assert!(!DiscoveryMode::ContactIntersection.uses_undiscoverable_cache());
    }
}
