use std::io::Cursor;
use std::net::TcpListener;
use std::time::Duration;

use serde_json::Value;
use taco_telemetry::config::{LogLevel, TelemetryConfig};
use taco_telemetry::error::TelemetryError;
use taco_telemetry::telemetry::backend::{RecordingBackend, capture_request};
use taco_telemetry::telemetry::identity::{hash_machine_id, test_sources::FixedSources};
use taco_telemetry::telemetry::{
    ACTIVITY_DURATION_KEY, LinePrompter, Prompter, Telemetry, TelemetryEvent, TelemetrySettings,
    UserType,
};
use tempfile::TempDir;

const MAC: &str = "3c:22:fb:aa:bb:cc";

struct NeverAsk;

impl Prompter for NeverAsk {
    fn ask_yes_no(&mut self, _message: &str) -> Result<bool, TelemetryError> {
        panic!("opt-in prompt shown more than once");
    }
}

fn config_in(dir: &TempDir) -> TelemetryConfig {
    TelemetryConfig::new("taco")
        .app_version("1.0.0")
        .settings_dir(dir.path())
        .endpoint("http://127.0.0.1:9/v2/track")
        .max_batch_interval(Duration::from_millis(100))
        .log_level(LogLevel::Normal)
}

fn run(
    config: &TelemetryConfig,
    prompter: &mut dyn Prompter,
    sources: &FixedSources,
) -> (Telemetry, RecordingBackend) {
    let backend = RecordingBackend::new();
    let telemetry =
        Telemetry::init_with(config, prompter, sources, Some(Box::new(backend.clone())));
    (telemetry, backend)
}

#[test]
fn test_identity_and_consent_survive_process_restarts() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let sources = FixedSources::with_mac(MAC);

    let mut first_prompt = LinePrompter::new(Cursor::new("y\n"), Vec::new());
    let (first, first_backend) = run(&config, &mut first_prompt, &sources);
    assert!(first.is_opted_in());
    assert!(first_backend.events().is_empty());

    let (second, second_backend) = run(&config, &mut NeverAsk, &sources);
    assert!(second.is_opted_in());
    assert_eq!(first.identity(), second.identity());
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(
        second.identity().machine_id.as_deref(),
        Some(hash_machine_id(MAC).as_str())
    );

    second.send_event(&mut TelemetryEvent::new("taco/build"));
    let events = second_backend.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].properties["sessionId"], second.session_id());
}

#[test]
fn test_existing_user_id_is_never_rewritten() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    std::fs::write(config.settings_file(), r#"{"userId":"U1","optIn":true}"#).unwrap();
    let sources = FixedSources::with_mac(MAC);

    for _ in 0..2 {
        let (telemetry, _) = run(&config, &mut NeverAsk, &sources);
        assert_eq!(telemetry.identity().user_id, "U1");
    }

    let saved = TelemetrySettings::try_load(&config.settings_file()).unwrap();
    assert_eq!(saved.user_id.as_deref(), Some("U1"));
}

#[test]
fn test_corrupt_settings_are_replaced_with_fresh_identity() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    std::fs::write(config.settings_file(), "\u{0}\u{1}garbage{{").unwrap();
    let sources = FixedSources::with_mac(MAC);

    let mut prompter = LinePrompter::new(Cursor::new("yes\n"), Vec::new());
    let (telemetry, _) = run(&config, &mut prompter, &sources);

    let identity = telemetry.identity();
    assert_eq!(identity.user_id.len(), 36);
    assert_eq!(identity.machine_id.as_deref(), Some(hash_machine_id(MAC).as_str()));
    assert_eq!(identity.user_type, UserType::External);

    let saved = TelemetrySettings::try_load(&config.settings_file()).unwrap();
    assert_eq!(saved.user_id.as_deref(), Some(identity.user_id.as_str()));
    assert_eq!(saved.opt_in, Some(true));
}

#[test]
fn test_decline_then_silence() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let sources = FixedSources::with_mac(MAC);

    let mut prompter = LinePrompter::new(Cursor::new("no\n"), Vec::new());
    let (first, first_backend) = run(&config, &mut prompter, &sources);
    first.send_event(&mut TelemetryEvent::activity("taco/build"));
    assert_eq!(
        first_backend.event_names(),
        vec!["taco/telemetryOptOut".to_string()]
    );

    let (second, second_backend) = run(&config, &mut NeverAsk, &sources);
    second.send_event(&mut TelemetryEvent::new("taco/build"));
    assert!(second_backend.events().is_empty());
}

#[test]
fn test_internal_marker_exposes_shadow_pii() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    std::fs::write(config.settings_file(), r#"{"optIn":true}"#).unwrap();
    let sources = FixedSources {
        internal_marker: true,
        mac: Some(MAC.to_string()),
        ..Default::default()
    };

    let (telemetry, backend) = run(&config, &mut NeverAsk, &sources);
    let mut activity = TelemetryEvent::activity("taco/login");
    telemetry.set_pii_property(&mut activity, "email", "a@b.com");
    telemetry.send_event(&mut activity);

    let events = backend.events();
    let props = &events[0].properties;
    assert_eq!(props["userType"], "Internal");
    assert_eq!(props["email.nothashed"], "a@b.com");
    assert_ne!(props["email"], "a@b.com");
    assert!(props[ACTIVITY_DURATION_KEY].as_f64().unwrap() >= 0.0);
    assert!(!props.values().any(|v| v == &Value::from(MAC)));
}

#[test]
fn test_opted_out_panic_is_not_reported() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/v2/track", listener.local_addr().unwrap());
    let config = config_in(&dir).endpoint(endpoint);
    std::fs::write(config.settings_file(), r#"{"optIn":false}"#).unwrap();

    let telemetry = Telemetry::init(&config, &mut NeverAsk);
    assert!(!telemetry.is_opted_in());

    let result: std::thread::Result<()> = std::panic::catch_unwind(|| {
        panic!("failed to open /home/alice/secret-project/main.rs")
    });
    assert!(result.is_err());
    drop(telemetry);

    assert_eq!(capture_request(&listener, Duration::from_millis(500)), None);
}

#[test]
fn test_cli_send_when_opted_out_prints_nothing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("TelemetrySettings.json"),
        r#"{"userId":"U1","optIn":false}"#,
    )
    .unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_taco-telemetry"))
        .args(["send", "taco/build", "--prop", "platform=android"])
        .env("TACO_HOME", dir.path())
        .env("TACO_TELEMETRY_ENDPOINT", "http://127.0.0.1:9/v2/track")
        .env_remove("TACO_LOG_LEVEL")
        .env_remove("RUST_LOG")
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(
        output.stderr.is_empty(),
        "unexpected stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
