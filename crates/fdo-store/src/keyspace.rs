//! Key layout of the shared store.
//!
//! Every entity class lives under its own prefix. Keys are built only through
//! the constructors here.

use chrono::Duration;
use uuid::Uuid;

const SESSION: &[u8] = b"session/";
const VOUCHER: &[u8] = b"voucher/";
const CAMPAIGN: &[u8] = b"campaign/";
const LISTENER: &[u8] = b"listener/";
const LISTENER_GUID: &[u8] = b"listener-guid/";
const RV_REGISTRATION: &[u8] = b"rv/";
const VERIFICATION: &[u8] = b"verify/";

/// TO0/TO1/TO2 handshake state.
pub const SESSION_TTL: Duration = Duration::minutes(10);
/// Request campaigns and listener instances (about six months).
pub const CAMPAIGN_TTL: Duration = Duration::days(183);
pub const LISTENER_TTL: Duration = Duration::days(183);
/// Verification-link records.
pub const VERIFICATION_TTL: Duration = Duration::days(7);
/// Upper bound on a TO0 registration's lifetime.
pub const MAX_RV_REGISTRATION_TTL: Duration = Duration::days(30);

fn join(prefix: &[u8], id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + id.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(id);
    key
}

#[must_use]
pub fn session_key(token: &str) -> Vec<u8> {
    join(SESSION, token.as_bytes())
}

#[must_use]
pub fn voucher_key(guid: &[u8; 16]) -> Vec<u8> {
    join(VOUCHER, guid)
}

#[must_use]
pub fn campaign_key(id: &Uuid) -> Vec<u8> {
    join(CAMPAIGN, id.as_bytes())
}

/// Prefix covering every campaign.
#[must_use]
pub fn campaign_prefix() -> Vec<u8> {
    CAMPAIGN.to_vec()
}

#[must_use]
pub fn listener_key(id: &Uuid) -> Vec<u8> {
    join(LISTENER, id.as_bytes())
}

/// Index from a device GUID to the listener instance testing it.
#[must_use]
pub fn listener_guid_key(guid: &[u8; 16]) -> Vec<u8> {
    join(LISTENER_GUID, guid)
}

#[must_use]
pub fn rv_registration_key(guid: &[u8; 16]) -> Vec<u8> {
    join(RV_REGISTRATION, guid)
}

#[must_use]
pub fn verification_key(id: &str) -> Vec<u8> {
    join(VERIFICATION, id.as_bytes())
}

/// Printable rendering of a key: prefix as text, binary id as hex.
#[must_use]
pub fn display_key(key: &[u8]) -> String {
    match key.iter().position(|&b| b == b'/') {
        Some(slash) => {
            let (prefix, id) = key.split_at(slash + 1);
            let prefix = String::from_utf8_lossy(prefix);
            match std::str::from_utf8(id) {
                Ok(text) if text.chars().all(|c| c.is_ascii_graphic()) => format!("{prefix}{text}"),
                _ => format!("{prefix}{}", hex::encode(id)),
            }
        }
        None => hex::encode(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_classes_do_not_collide() {
        let guid = [7u8; 16];
        let keys = [
            voucher_key(&guid),
            listener_guid_key(&guid),
            rv_registration_key(&guid),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
        // "listener/" must not prefix the GUID index
        assert!(!listener_guid_key(&guid).starts_with(LISTENER));
        assert!(listener_key(&Uuid::nil()).starts_with(LISTENER));
    }

    #[test]
    fn keys_render_readably() {
        assert_eq!(display_key(&session_key("abc")), "session/abc");
        assert_eq!(display_key(&verification_key("link-1")), "verify/link-1");
        assert_eq!(
            display_key(&voucher_key(&[0xab; 16])),
            format!("voucher/{}", "ab".repeat(16))
        );
    }
}
