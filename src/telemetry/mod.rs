//! Anonymized usage telemetry.
//!
//! [`Telemetry::init`] loads or derives the pseudonymous identity, resolves
//! the one-time opt-in decision and sets up the backend client. The returned
//! context is what every later [`Telemetry::send`] goes through. Neither call
//! ever reports an error to the host: failures end up in the diagnostic log
//! and telemetry silently goes quiet.

pub mod backend;
pub mod consent;
pub mod event;
pub mod identity;
pub mod pii;
pub mod platform;
pub mod settings;

pub use backend::{AppInsightsClient, BackendSetup, TelemetryBackend};
pub use consent::{ConsolePrompter, LinePrompter, Prompter};
pub use event::{ACTIVITY_DURATION_KEY, TelemetryEvent, TelemetryProperties};
pub use identity::ResolvedIdentity;
pub use platform::{IdentitySources, SystemSources};
pub use settings::{TelemetrySettings, UserType};

use crate::config::{LogLevel, TelemetryConfig};
use crate::error::TelemetryError;
use crate::observability::report_failure;
use serde_json::Value;

/// Process-lifetime telemetry state.
pub struct Telemetry {
    app_name: String,
    identity: ResolvedIdentity,
    session_id: String,
    opted_in: bool,
    log_level: LogLevel,
    backend: Option<Box<dyn TelemetryBackend>>,
}

impl Telemetry {
    /// Initialize against the real machine and the configured ingestion
    /// endpoint. May block once on `prompter` if the user has never answered
    /// the opt-in question.
    pub fn init(config: &TelemetryConfig, prompter: &mut dyn Prompter) -> Self {
        let sources = SystemSources::new(config.internal_env_var.clone());
        let backend: Option<Box<dyn TelemetryBackend>> = match build_backend(config) {
            Ok(client) => Some(Box::new(client)),
            Err(e) => {
                report_failure(config.log_level, "backend setup", &e);
                None
            }
        };
        Self::init_with(config, prompter, &sources, backend)
    }

    /// Same as [`Telemetry::init`] with caller-supplied identity sources and
    /// backend.
    pub fn init_with(
        config: &TelemetryConfig,
        prompter: &mut dyn Prompter,
        sources: &dyn IdentitySources,
        backend: Option<Box<dyn TelemetryBackend>>,
    ) -> Self {
        match Self::try_init(config, prompter, sources, backend) {
            Ok(telemetry) => telemetry,
            Err(e) => {
                report_failure(config.log_level, "initialization", &e);
                Self::disabled(config)
            }
        }
    }

    fn try_init(
        config: &TelemetryConfig,
        prompter: &mut dyn Prompter,
        sources: &dyn IdentitySources,
        backend: Option<Box<dyn TelemetryBackend>>,
    ) -> Result<Self, TelemetryError> {
        let settings_path = config.settings_file();
        let mut settings = TelemetrySettings::load(&settings_path);
        let resolved = identity::resolve(&mut settings, sources, &config.internal_domain_suffix);
        // Derived identity sticks even if the prompt below fails.
        save_settings(&settings, &settings_path, config.log_level);

        let mut telemetry = Self {
            app_name: config.app_name.clone(),
            identity: resolved,
            session_id: identity::generate_guid(),
            opted_in: false,
            log_level: config.log_level,
            backend,
        };

        let consent = consent::resolve_opt_in(&mut settings, &config.app_name, prompter)?;
        if consent.newly_declined {
            let mut opt_out = TelemetryEvent::new(format!("{}/telemetryOptOut", config.app_name));
            telemetry.send(&mut opt_out, true);
        }
        telemetry.opted_in = consent.opted_in;
        save_settings(&settings, &settings_path, config.log_level);

        if telemetry.opted_in
            && let Some(backend) = &telemetry.backend
        {
            backend.report_exceptions();
        }

        Ok(telemetry)
    }

    /// A context that never transmits anything.
    pub fn disabled(config: &TelemetryConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            identity: ResolvedIdentity {
                user_id: String::new(),
                machine_id: None,
                user_type: UserType::External,
            },
            session_id: identity::generate_guid(),
            opted_in: false,
            log_level: config.log_level,
            backend: None,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_opted_in(&self) -> bool {
        self.opted_in
    }

    pub fn is_internal(&self) -> bool {
        self.identity.is_internal()
    }

    /// Store a PII value on `event`, hashed for everyone and additionally raw
    /// for internal users.
    pub fn set_pii_property(&self, event: &mut TelemetryEvent, name: &str, value: &str) {
        pii::set_pii_property(event, name, value, self.identity.user_type);
    }

    pub fn send_event(&self, event: &mut TelemetryEvent) {
        self.send(event, false);
    }

    /// Enrich `event` with the common properties and forward it. Does nothing
    /// unless the user opted in or `ignore_opt_in` is set.
    pub fn send(&self, event: &mut TelemetryEvent, ignore_opt_in: bool) {
        if !(self.opted_in || ignore_opt_in) {
            return;
        }

        event.end();
        self.add_common_properties(event);

        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(e) = backend.track_event(event.name(), event.properties()) {
            report_failure(self.log_level, "send", &e);
        }
    }

    pub fn flush(&self) {
        if let Some(backend) = &self.backend
            && let Err(e) = backend.flush()
        {
            report_failure(self.log_level, "flush", &e);
        }
    }

    fn add_common_properties(&self, event: &mut TelemetryEvent) {
        event.set_property("userId", self.identity.user_id.as_str());
        event.set_property(
            "machineId",
            self.identity
                .machine_id
                .as_deref()
                .map_or(Value::Null, Value::from),
        );
        event.set_property("sessionId", self.session_id.as_str());
        event.set_property("userType", self.identity.user_type.as_str());
        event.set_property("hostOS", platform::host_os_platform());
        event.set_property("hostOSRelease", platform::host_os_release());
    }
}

fn save_settings(settings: &TelemetrySettings, path: &std::path::Path, level: LogLevel) {
    if let Err(e) = settings.save(path) {
        report_failure(level, "settings save", &e);
    }
}

/// Application Insights client configured the way the CLI tools expect.
pub fn build_backend(config: &TelemetryConfig) -> Result<AppInsightsClient, TelemetryError> {
    let mut client = BackendSetup::new(config.instrumentation_key.clone())
        .endpoint(config.endpoint.clone())
        .http_timeout(config.http_timeout)
        .auto_collect_console(false)
        .auto_collect_requests(false)
        .auto_collect_performance(false)
        .auto_collect_exceptions(true)
        .start()?;

    client.config.max_batch_interval = config.max_batch_interval;
    client.config.max_batch_size = config.max_batch_size;

    if let Some(version) = config.app_version.as_ref().filter(|v| !v.is_empty()) {
        client.context.tags.insert(
            backend::context_keys::APPLICATION_VERSION.to_string(),
            version.clone(),
        );
    }

    Ok(client)
}

/// Forget the recorded opt-in answer so the next `init` asks again.
pub fn reset_consent(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let path = config.settings_file();
    let mut settings = TelemetrySettings::load(&path);
    settings.opt_in = None;
    settings.save(&path)
}
