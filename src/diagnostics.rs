//! Diagnostics delivery
//!
//! Fire-and-forget `(kind, payload)` events. Sinks never block the caller and
//! never report failures back; a broken endpoint only shows up in debug logs.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DiagnosticsSettings;
use crate::error::BridgeError;

pub trait DiagnosticsSink: Send + Sync {
    fn log(&self, kind: &str, payload: Option<Value>);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn log(&self, _kind: &str, _payload: Option<Value>) {}
}

/// Emits events through the log under the `diagnostics` target
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl DiagnosticsSink for ConsoleSink {
    fn log(&self, kind: &str, payload: Option<Value>) {
        match payload {
            Some(payload) => info!(target: "diagnostics", kind = kind, payload = %payload, "event"),
            None => info!(target: "diagnostics", kind = kind, "event"),
        }
    }
}

/// POSTs `{ timestamp, kind, payload }` JSON to an endpoint
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("diagnostics client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn envelope(kind: &str, payload: Option<Value>) -> Value {
        json!({
            "timestamp": Utc::now().timestamp_millis(),
            "kind": kind,
            "payload": payload,
        })
    }
}

impl DiagnosticsSink for HttpSink {
    fn log(&self, kind: &str, payload: Option<Value>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, dropping diagnostics event {}", kind);
            return;
        };

        let request = self
            .client
            .post(&self.endpoint)
            .json(&Self::envelope(kind, payload));
        let kind = kind.to_string();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!("Diagnostics endpoint answered {} for {}", response.status(), kind);
                }
                Ok(_) => {}
                Err(e) => debug!("Diagnostics delivery of {} failed: {}", kind, e),
            }
        });
    }
}

/// Keeps events in memory for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, Option<Value>)>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|(kind, _)| kind).collect()
    }
}

impl DiagnosticsSink for MemorySink {
    fn log(&self, kind: &str, payload: Option<Value>) {
        if let Ok(mut events) = self.events.lock() {
            events.push((kind.to_string(), payload));
        }
    }
}

/// Fans every event out to all configured sinks
#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Console sink when enabled, HTTP sink when an endpoint is set. An
    /// endpoint whose client cannot be built is skipped with a warning.
    pub fn from_settings(settings: &DiagnosticsSettings) -> Self {
        let mut diagnostics = Self::new();
        if settings.console {
            diagnostics = diagnostics.with_sink(Arc::new(ConsoleSink));
        }
        if let Some(endpoint) = settings.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            match HttpSink::new(endpoint, Duration::from_millis(settings.timeout_ms)) {
                Ok(sink) => {
                    info!("Diagnostics will be posted to {}", endpoint);
                    diagnostics = diagnostics.with_sink(Arc::new(sink));
                }
                Err(e) => warn!("Diagnostics endpoint {} disabled: {}", endpoint, e),
            }
        }
        diagnostics
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticsSink for Diagnostics {
    fn log(&self, kind: &str, payload: Option<Value>) {
        for sink in &self.sinks {
            sink.log(kind, payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_from_settings_builds_sinks() {
        let settings = DiagnosticsSettings::default();
        assert_eq!(Diagnostics::from_settings(&settings).len(), 1);

        let settings = DiagnosticsSettings {
            console: false,
            endpoint: Some("  ".to_string()),
            timeout_ms: 100,
        };
        assert!(Diagnostics::from_settings(&settings).is_empty());

        let settings = DiagnosticsSettings {
            console: true,
            endpoint: Some("http://127.0.0.1:9/log".to_string()),
            timeout_ms: 100,
        };
        assert_eq!(Diagnostics::from_settings(&settings).len(), 2);
    }

    #[test]
    fn test_fan_out_reaches_every_sink() {
        let first = Arc::new(MemorySink::default());
        let second = Arc::new(MemorySink::default());
        let diagnostics = Diagnostics::new()
            .with_sink(first.clone())
            .with_sink(second.clone());

        diagnostics.log("publish", Some(json!({"payload": "1"})));
        assert_eq!(first.kinds(), vec!["publish"]);
        assert_eq!(second.events()[0].1, Some(json!({"payload": "1"})));
    }

    #[test]
    fn test_http_sink_without_runtime_is_silent() {
        let sink = HttpSink::new("http://127.0.0.1:9/log", Duration::from_millis(50)).unwrap();
        sink.log("publish", None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let sink = HttpSink::new("http://127.0.0.1:1/log", Duration::from_millis(50)).unwrap();
        sink.log("publish", None);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_http_sink_posts_envelope() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/log", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buffer = [0u8; 1024];
            loop {
                let read = socket.read(&mut buffer).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
                if request.ends_with(b"}") {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let sink = HttpSink::new(endpoint, Duration::from_secs(2)).unwrap();
        sink.log("publish", Some(json!({"payload": "1"})));

        let request = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(request.starts_with("POST /log"));
        assert!(request.contains("\"timestamp\":"));
        assert!(request.contains("\"payload\":{\"payload\":\"1\"}"));
    }
}
