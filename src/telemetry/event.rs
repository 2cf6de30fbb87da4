use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Property carrying an activity's duration in fractional milliseconds.
pub const ACTIVITY_DURATION_KEY: &str = "reserved.activity.duration";

pub type TelemetryProperties = BTreeMap<String, Value>;

/// Wall-clock timing attached to an activity.
#[derive(Debug, Clone, Copy)]
pub struct ActivityTiming {
    started: Instant,
    elapsed: Option<Duration>,
}

impl ActivityTiming {
    fn started_now() -> Self {
        Self {
            started: Instant::now(),
            elapsed: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// A named telemetry data point. Events created through
/// [`TelemetryEvent::activity`] also measure how long they ran, from
/// construction (or the last [`start`](Self::start)) until [`end`](Self::end)
/// or send.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    event_id: String,
    name: String,
    properties: TelemetryProperties,
    timing: Option<ActivityTiming>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_properties(name, TelemetryProperties::new())
    }

    pub fn with_properties(name: impl Into<String>, properties: TelemetryProperties) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            properties,
            timing: None,
        }
    }

    pub fn activity(name: impl Into<String>) -> Self {
        Self::activity_with_properties(name, TelemetryProperties::new())
    }

    pub fn activity_with_properties(
        name: impl Into<String>,
        properties: TelemetryProperties,
    ) -> Self {
        let mut event = Self::with_properties(name, properties);
        event.start();
        event
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &TelemetryProperties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn is_activity(&self) -> bool {
        self.timing.is_some()
    }

    /// (Re)set the start reference. A recorded duration is kept.
    pub fn start(&mut self) {
        match &mut self.timing {
            Some(timing) => timing.started = Instant::now(),
            None => self.timing = Some(ActivityTiming::started_now()),
        }
    }

    /// Record the duration on first call; later calls are no-ops.
    pub fn end(&mut self) {
        let Some(timing) = &mut self.timing else {
            return;
        };
        if timing.is_ended() {
            return;
        }

        let elapsed = timing.started.elapsed();
        timing.elapsed = Some(elapsed);
        self.properties.insert(
            ACTIVITY_DURATION_KEY.to_string(),
            Value::from(elapsed.as_secs_f64() * 1000.0),
        );
    }

    pub fn duration(&self) -> Option<Duration> {
        self.timing.and_then(|t| t.elapsed)
    }
}
