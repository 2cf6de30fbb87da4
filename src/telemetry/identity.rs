//! Pseudonymous user/machine identity and user classification.

use super::platform::IdentitySources;
use super::settings::{TelemetrySettings, UserType};
use sha2::{Digest, Sha256};

/// Identity fields attached to every transmitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: String,
    /// `None` when no hardware address was available at first derivation.
    pub machine_id: Option<String>,
    pub user_type: UserType,
}

impl ResolvedIdentity {
    pub fn is_internal(&self) -> bool {
        self.user_type == UserType::Internal
    }
}

/// Fill in any missing identity fields on `settings` and return the result.
///
/// Fields already present are returned as-is, so calling this repeatedly on
/// the same record is a no-op after the first call.
pub fn resolve(
    settings: &mut TelemetrySettings,
    sources: &dyn IdentitySources,
    internal_domain_suffix: &str,
) -> ResolvedIdentity {
    ResolvedIdentity {
        user_id: resolve_user_id(settings, sources),
        machine_id: resolve_machine_id(settings, sources),
        user_type: resolve_user_type(settings, sources, internal_domain_suffix),
    }
}

fn resolve_user_id(settings: &mut TelemetrySettings, sources: &dyn IdentitySources) -> String {
    if let Some(id) = settings.user_id.as_ref().filter(|id| !id.is_empty()) {
        return id.clone();
    }

    let from_registry = if sources.has_registry() {
        sources
            .registry_user_id()
            .map(|id| strip_braces(&id))
            .filter(|id| !id.is_empty())
    } else {
        None
    };

    let id = from_registry.unwrap_or_else(generate_guid);
    tracing::debug!("derived telemetry user id");
    settings.user_id = Some(id.clone());
    id
}

fn resolve_machine_id(
    settings: &mut TelemetrySettings,
    sources: &dyn IdentitySources,
) -> Option<String> {
    if let Some(existing) = &settings.machine_id {
        return existing.clone();
    }

    let id = sources.first_mac_address().map(|mac| hash_machine_id(&mac));
    if id.is_none() {
        tracing::debug!("no hardware address found; machine id recorded as unknown");
    }
    settings.machine_id = Some(id.clone());
    id
}

fn resolve_user_type(
    settings: &mut TelemetrySettings,
    sources: &dyn IdentitySources,
    internal_domain_suffix: &str,
) -> UserType {
    if let Some(user_type) = settings.user_type {
        return user_type;
    }

    let user_type = if sources.internal_marker_set()
        || (sources.has_registry()
            && sources
                .dns_domain()
                .is_some_and(|domain| is_internal_domain(&domain, internal_domain_suffix)))
    {
        UserType::Internal
    } else {
        UserType::External
    };

    settings.user_type = Some(user_type);
    user_type
}

pub fn is_internal_domain(domain: &str, suffix: &str) -> bool {
    !suffix.is_empty()
        && domain
            .trim()
            .to_lowercase()
            .ends_with(&suffix.to_lowercase())
}

/// One-way SHA-256 of a hardware address, hex-encoded.
pub fn hash_machine_id(mac: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mac.as_bytes());
    hex::encode(hasher.finalize())
}

/// Uppercase RFC 4122 v4 identifier.
pub fn generate_guid() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

fn strip_braces(id: &str) -> String {
    id.trim().replace(['{', '}'], "")
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_sources {
    use super::IdentitySources;
    use std::cell::Cell;

    /// Deterministic sources that count how often the MAC lookup runs.
    #[derive(Debug, Default)]
    pub struct FixedSources {
        pub registry: bool,
        pub registry_user_id: Option<String>,
        pub dns_domain: Option<String>,
        pub internal_marker: bool,
        pub mac: Option<String>,
        pub mac_lookups: Cell<usize>,
    }

    impl FixedSources {
        pub fn with_mac(mac: &str) -> Self {
            Self {
                mac: Some(mac.to_string()),
                ..Self::default()
            }
        }
    }

    impl IdentitySources for FixedSources {
        fn has_registry(&self) -> bool {
            self.registry
        }

        fn registry_user_id(&self) -> Option<String> {
            self.registry_user_id.clone()
        }

        fn dns_domain(&self) -> Option<String> {
            self.dns_domain.clone()
        }

        fn internal_marker_set(&self) -> bool {
            self.internal_marker
        }

        fn first_mac_address(&self) -> Option<String> {
            self.mac_lookups.set(self.mac_lookups.get() + 1);
            self.mac.clone()
        }
    }
}
