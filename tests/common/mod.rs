#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::{Config, TracerProvider};
use opentelemetry_sdk::Resource;
use product_service::config::{LogFormat, TelemetryConfig, TraceExporterKind};
use product_service::error::TelemetryError;
use product_service::observability::{flush_provider, TelemetryBuilder, TelemetryHandle, TraceBackend};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};

/// Log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn writer(&self) -> BoxMakeWriter {
        BoxMakeWriter::new(self.clone())
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Exports to memory and remembers whether it was shut down.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub exporter: InMemorySpanExporter,
    pub shut_down: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl TraceBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn install(&self, resource: Resource) -> Result<TracerProvider, TelemetryError> {
        Ok(TracerProvider::builder()
            .with_config(Config::default().with_resource(resource))
            .with_simple_exporter(self.exporter.clone())
            .build())
    }

    fn shutdown(&self, provider: TracerProvider) -> Result<(), TelemetryError> {
        self.shut_down.store(true, Ordering::SeqCst);
        flush_provider(provider)
    }
}

/// Config with no network exporters and no scrape listener.
pub fn quiet_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.tracing.exporter = TraceExporterKind::None;
    config.metrics.bind = "127.0.0.1".into();
    config.metrics.port = 0;
    config.logging.format = LogFormat::Json;
    config
}

pub struct TestTelemetry {
    pub handle: TelemetryHandle,
    pub backend: MemoryBackend,
    pub logs: CapturedLogs,
}

pub async fn telemetry(config: TelemetryConfig) -> TestTelemetry {
    let backend = MemoryBackend::default();
    let logs = CapturedLogs::default();
    let handle = TelemetryBuilder::new(config)
        .with_trace_backend(Arc::new(backend.clone()))
        .with_log_writer(logs.writer())
        .build()
        .await
        .expect("telemetry should start");
    TestTelemetry { handle, backend, logs }
}

/// Value of the first series called `name` carrying every `labels` pair.
pub fn metric_value(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let series_name = series.split('{').next()?;
            if series_name != name {
                return None;
            }
            let all_labels = labels
                .iter()
                .all(|(k, v)| series.contains(&format!("{k}=\"{v}\"")));
            if all_labels { value.parse().ok() } else { None }
        })
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
