//! Client for the Application Insights ingestion endpoint.
//!
//! Tracked events are queued as `EventData` envelopes and posted as one JSON
//! array once the oldest queued event has waited `max_batch_interval`, once
//! the queue holds `max_batch_size` events, on [`TelemetryBackend::flush`],
//! and when the client is dropped.

use super::event::TelemetryProperties;
use crate::error::TelemetryError;
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

pub const SDK_VERSION: &str = concat!("taco-telemetry:", env!("CARGO_PKG_VERSION"));

/// Well-known context tag keys.
pub mod context_keys {
    pub const APPLICATION_VERSION: &str = "ai.application.ver";
    pub const SDK_VERSION: &str = "ai.internal.sdkVersion";
}

/// Where telemetry events are forwarded to.
pub trait TelemetryBackend {
    fn track_event(&self, name: &str, properties: &TelemetryProperties)
    -> Result<(), TelemetryError>;

    fn flush(&self) -> Result<(), TelemetryError>;

    /// Start reporting panics. Only called once the user has opted in.
    fn report_exceptions(&self) {}
}

/// Fluent setup for [`AppInsightsClient`].
#[derive(Debug, Clone)]
pub struct BackendSetup {
    instrumentation_key: String,
    endpoint: String,
    http_timeout: Duration,
    auto_collect_console: bool,
    auto_collect_requests: bool,
    auto_collect_performance: bool,
    auto_collect_exceptions: bool,
}

impl BackendSetup {
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            endpoint: crate::config::DEFAULT_ENDPOINT.to_string(),
            http_timeout: Duration::from_secs(5),
            auto_collect_console: true,
            auto_collect_requests: true,
            auto_collect_performance: true,
            auto_collect_exceptions: true,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn auto_collect_console(mut self, enabled: bool) -> Self {
        self.auto_collect_console = enabled;
        self
    }

    pub fn auto_collect_requests(mut self, enabled: bool) -> Self {
        self.auto_collect_requests = enabled;
        self
    }

    pub fn auto_collect_performance(mut self, enabled: bool) -> Self {
        self.auto_collect_performance = enabled;
        self
    }

    pub fn auto_collect_exceptions(mut self, enabled: bool) -> Self {
        self.auto_collect_exceptions = enabled;
        self
    }

    /// Build the client. Exception collection is only armed later, through
    /// [`TelemetryBackend::report_exceptions`].
    pub fn start(self) -> Result<AppInsightsClient, TelemetryError> {
        if self.auto_collect_console || self.auto_collect_requests || self.auto_collect_performance
        {
            tracing::debug!(
                "console/request/performance auto-collection is not supported and stays off"
            );
        }

        let tls = native_tls::TlsConnector::new()
            .map_err(|e| TelemetryError::HttpError(format!("TLS setup failed: {}", e)))?;
        let agent = ureq::AgentBuilder::new()
            .tls_connector(Arc::new(tls))
            .timeout(self.http_timeout)
            .build();

        let mut context = ClientContext::default();
        context
            .tags
            .insert(context_keys::SDK_VERSION.to_string(), SDK_VERSION.to_string());

        Ok(AppInsightsClient {
            instrumentation_key: self.instrumentation_key,
            endpoint: self.endpoint,
            agent,
            collect_exceptions: self.auto_collect_exceptions,
            config: ClientConfig::default(),
            context,
            queue: RefCell::new(Vec::new()),
            oldest_queued: Cell::new(None),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_batch_interval: Duration,
    pub max_batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_batch_interval: Duration::from_secs(15),
            max_batch_size: 250,
        }
    }
}

/// Tags stamped on every envelope.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub name: String,
    pub time: String,
    pub i_key: String,
    pub tags: BTreeMap<String, String>,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    pub base_type: String,
    pub base_data: Value,
}

pub struct AppInsightsClient {
    instrumentation_key: String,
    endpoint: String,
    agent: ureq::Agent,
    collect_exceptions: bool,
    pub config: ClientConfig,
    pub context: ClientContext,
    queue: RefCell<Vec<Envelope>>,
    oldest_queued: Cell<Option<Instant>>,
}

impl AppInsightsClient {
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn event_envelope(&self, name: &str, properties: &TelemetryProperties) -> Envelope {
        self.envelope(
            "Event",
            "EventData",
            serde_json::json!({
                "ver": 2,
                "name": name,
                "properties": stringify_properties(properties),
            }),
        )
    }

    fn envelope(&self, item: &str, base_type: &str, base_data: Value) -> Envelope {
        Envelope {
            name: format!(
                "Microsoft.ApplicationInsights.{}.{}",
                self.instrumentation_key.replace('-', ""),
                item
            ),
            time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            i_key: self.instrumentation_key.clone(),
            tags: self.context.tags.clone(),
            data: EnvelopeData {
                base_type: base_type.to_string(),
                base_data,
            },
        }
    }

    fn batch_due(&self) -> bool {
        let queued = self.queue.borrow().len();
        if queued == 0 {
            return false;
        }
        queued >= self.config.max_batch_size.max(1)
            || self
                .oldest_queued
                .get()
                .is_some_and(|t| t.elapsed() >= self.config.max_batch_interval)
    }

    fn post(&self, envelopes: &[Envelope]) -> Result<(), TelemetryError> {
        let body = serde_json::to_string(envelopes)?;
        self.agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)?;
        tracing::debug!("sent {} telemetry envelope(s)", envelopes.len());
        Ok(())
    }

    /// Install a panic hook (once per process) that posts one `ExceptionData`
    /// envelope and then hands over to the previous hook. Tags are captured
    /// as they are at this point.
    fn install_panic_reporter(&self) {
        static PANIC_HOOK: Once = Once::new();

        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let template = self.envelope("Exception", "ExceptionData", Value::Null);

        PANIC_HOOK.call_once(move || {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let mut envelope = template.clone();
                envelope.time =
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                envelope.data.base_data = serde_json::json!({
                    "ver": 2,
                    "exceptions": [{
                        "typeName": "panic",
                        "message": info.to_string(),
                        "hasFullStack": false,
                    }],
                });
                if let Ok(body) = serde_json::to_string(&[envelope]) {
                    let _ = agent
                        .post(&endpoint)
                        .set("Content-Type", "application/json")
                        .send_string(&body);
                }
                previous(info);
            }));
        });
    }
}

impl TelemetryBackend for AppInsightsClient {
    fn track_event(
        &self,
        name: &str,
        properties: &TelemetryProperties,
    ) -> Result<(), TelemetryError> {
        let envelope = self.event_envelope(name, properties);
        self.queue.borrow_mut().push(envelope);
        if self.oldest_queued.get().is_none() {
            self.oldest_queued.set(Some(Instant::now()));
        }

        if self.batch_due() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        let pending = std::mem::take(&mut *self.queue.borrow_mut());
        self.oldest_queued.set(None);
        if pending.is_empty() {
            return Ok(());
        }
        self.post(&pending)
    }

    fn report_exceptions(&self) {
        if self.collect_exceptions {
            self.install_panic_reporter();
        }
    }
}

impl Drop for AppInsightsClient {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::debug!("dropping unsent telemetry: {}", e);
        }
    }
}

/// Ingestion only accepts string-valued properties. `null` values are dropped.
pub fn stringify_properties(properties: &TelemetryProperties) -> BTreeMap<String, String> {
    properties
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key.clone(), s.clone())),
            other => Some((key.clone(), other.to_string())),
        })
        .collect()
}

#[cfg(any(test, feature = "test-support"))]
pub use recording::{RecordedEvent, RecordingBackend, capture_request};

#[cfg(any(test, feature = "test-support"))]
mod recording {
    use super::TelemetryBackend;
    use crate::error::TelemetryError;
    use crate::telemetry::event::TelemetryProperties;
    use std::cell::{Cell, RefCell};
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedEvent {
        pub name: String,
        pub properties: TelemetryProperties,
    }

    /// In-memory backend. Clones share one event log, so a test can keep a
    /// handle after moving a clone into the telemetry context.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingBackend {
        events: Rc<RefCell<Vec<RecordedEvent>>>,
        flushes: Rc<Cell<usize>>,
        failing: Rc<Cell<bool>>,
        reporting_exceptions: Rc<Cell<bool>>,
    }

    impl RecordingBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.borrow().clone()
        }

        pub fn event_names(&self) -> Vec<String> {
            self.events.borrow().iter().map(|e| e.name.clone()).collect()
        }

        pub fn flushes(&self) -> usize {
            self.flushes.get()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.set(failing);
        }

        pub fn is_reporting_exceptions(&self) -> bool {
            self.reporting_exceptions.get()
        }
    }

    impl TelemetryBackend for RecordingBackend {
        fn track_event(
            &self,
            name: &str,
            properties: &TelemetryProperties,
        ) -> Result<(), TelemetryError> {
            if self.failing.get() {
                return Err(TelemetryError::HttpError("backend unavailable".to_string()));
            }
            self.events.borrow_mut().push(RecordedEvent {
                name: name.to_string(),
                properties: properties.clone(),
            });
            Ok(())
        }

        fn flush(&self) -> Result<(), TelemetryError> {
            if self.failing.get() {
                return Err(TelemetryError::HttpError("backend unavailable".to_string()));
            }
            self.flushes.set(self.flushes.get() + 1);
            Ok(())
        }

        fn report_exceptions(&self) {
            self.reporting_exceptions.set(true);
        }
    }

    /// Accept one connection on `listener` within `wait` and return the raw
    /// HTTP request text, or `None` if nobody connected.
    pub fn capture_request(listener: &TcpListener, wait: Duration) -> Option<String> {
        listener.set_nonblocking(true).ok()?;
        let deadline = Instant::now() + wait;
        let (mut stream, _) = loop {
            match listener.accept() {
                Ok(conn) => break conn,
                Err(e) if e.kind() == ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return None,
            }
        };

        stream.set_nonblocking(false).ok()?;
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .ok()?;
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
        }
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}
