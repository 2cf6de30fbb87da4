//! Keyed hashing of personally identifiable property values.

use super::event::TelemetryEvent;
use super::settings::UserType;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PII_HASH_KEY: &str = "959069c9-9e93-4fa1-bf16-3f8120d7db0c";

/// Suffix of the raw-value shadow property kept for internal users only.
pub const NOT_HASHED_SUFFIX: &str = ".nothashed";

/// Hex HMAC-SHA256 of `value` under the embedded key.
pub fn hash_pii(value: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(PII_HASH_KEY.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(value.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Store the hashed `value` under `name`. Internal users also get the raw value
/// under `name.nothashed`; nobody else ever does.
pub fn set_pii_property(event: &mut TelemetryEvent, name: &str, value: &str, user_type: UserType) {
    event.set_property(name, hash_pii(value));

    let shadow = format!("{}{}", name, NOT_HASHED_SUFFIX);
    if user_type == UserType::Internal {
        event.set_property(shadow, value);
    } else {
        event.remove_property(&shadow);
    }
}
