//! Platform-specific identifier sources and host OS facts.
//!
//! Every lookup here is best effort: a failing source yields `None` and the
//! resolver falls back to generated or default values.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use sysinfo::{Networks, System};

pub const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Where the identity resolver gets raw, machine-local signals from.
pub trait IdentitySources {
    /// Whether this platform has the registry used for user id and domain
    /// classification.
    fn has_registry(&self) -> bool;

    /// User id recorded by the OS usage-data client, if any.
    fn registry_user_id(&self) -> Option<String>;

    /// DNS domain the user is logged into.
    fn dns_domain(&self) -> Option<String>;

    /// Whether the internal-user marker variable is set to a non-empty value.
    fn internal_marker_set(&self) -> bool;

    /// Hardware address of the first interface with a non-zero address.
    fn first_mac_address(&self) -> Option<String>;
}

/// Sources backed by the real machine.
#[derive(Debug, Clone)]
pub struct SystemSources {
    internal_env_var: String,
}

impl SystemSources {
    pub fn new(internal_env_var: impl Into<String>) -> Self {
        Self {
            internal_env_var: internal_env_var.into(),
        }
    }
}

impl IdentitySources for SystemSources {
    fn has_registry(&self) -> bool {
        cfg!(windows)
    }

    #[cfg(windows)]
    fn registry_user_id(&self) -> Option<String> {
        use winreg::RegKey;
        use winreg::enums::HKEY_CURRENT_USER;

        let key = RegKey::predef(HKEY_CURRENT_USER)
            .open_subkey(r"SOFTWARE\Microsoft\SQMClient")
            .ok()?;
        key.get_value::<String, _>("UserId").ok()
    }

    #[cfg(not(windows))]
    fn registry_user_id(&self) -> Option<String> {
        None
    }

    fn dns_domain(&self) -> Option<String> {
        std::env::var("USERDNSDOMAIN")
            .ok()
            .filter(|d| !d.trim().is_empty())
    }

    fn internal_marker_set(&self) -> bool {
        std::env::var_os(&self.internal_env_var).is_some_and(|v| !v.is_empty())
    }

    fn first_mac_address(&self) -> Option<String> {
        first_usable_mac(list_interface_macs())
    }
}

/// Normalize to lowercase colon-separated form; `None` for anything that is
/// not a six-octet address or is all zeros.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase().replace('-', ":");
    let octets: Vec<&str> = normalized.split(':').collect();
    if octets.len() != 6
        || octets
            .iter()
            .any(|o| o.len() != 2 || !o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    if normalized == ZERO_MAC {
        return None;
    }
    Some(normalized)
}

pub fn first_usable_mac<I>(macs: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    macs.into_iter().find_map(|mac| normalize_mac(&mac))
}

/// Hardware addresses of every interface, ordered by interface name.
fn list_interface_macs() -> Vec<String> {
    let networks = Networks::new_with_refreshed_list();
    let by_name: BTreeMap<String, String> = networks
        .iter()
        .map(|(name, data)| (name.clone(), data.mac_address().to_string()))
        .collect();
    by_name.into_values().collect()
}

static HOST_OS_RELEASE: OnceLock<String> = OnceLock::new();

/// Node-style platform name: `win32`, `darwin`, `linux`, ...
pub fn host_os_platform() -> &'static str {
    match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    }
}

/// Kernel release string, e.g. `6.5.0-14-generic`. Empty when unknown.
pub fn host_os_release() -> &'static str {
    HOST_OS_RELEASE
        .get_or_init(|| System::kernel_version().unwrap_or_default())
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("AA-BB-CC-00-11-22").as_deref(),
            Some("aa:bb:cc:00:11:22")
        );
        assert_eq!(
            normalize_mac(" 3c:22:fb:01:02:03\n").as_deref(),
            Some("3c:22:fb:01:02:03")
        );
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("00-00-00-00-00-00"), None);
        assert_eq!(normalize_mac("N/A"), None);
        assert_eq!(normalize_mac(""), None);
    }

    #[test]
    fn test_first_usable_mac_skips_zero_addresses() {
        let macs = vec![
            "00:00:00:00:00:00".to_string(),
            "Disabled".to_string(),
            "02:42:ac:11:00:02".to_string(),
            "de:ad:be:ef:00:01".to_string(),
        ];
        assert_eq!(first_usable_mac(macs).as_deref(), Some("02:42:ac:11:00:02"));
        assert_eq!(first_usable_mac(Vec::<String>::new()), None);
    }

    #[test]
    fn test_system_sources_mac_is_normalized_and_non_zero() {
        let sources = SystemSources::new("TACOINTERNAL");
        if let Some(mac) = sources.first_mac_address() {
            assert_eq!(normalize_mac(&mac).as_deref(), Some(mac.as_str()));
            assert_ne!(mac, ZERO_MAC);
        }
    }

    #[test]
    fn test_host_os_release_is_computed_once() {
        assert!(std::ptr::eq(host_os_release(), host_os_release()));
    }

    #[test]
    fn test_host_os_platform_uses_node_names() {
        let platform = host_os_platform();
        assert!(!platform.is_empty());
        assert_ne!(platform, "windows");
        assert_ne!(platform, "macos");
    }
}
