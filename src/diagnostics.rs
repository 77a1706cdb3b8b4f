use log_error::LogError;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub timestamp: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub status_code: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl Diagnostic {
    pub fn new<O: Into<String>, E: Into<String>>(
        operation: O,
        reference: Option<String>,
        status_code: u16,
        error: E,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            operation: operation.into(),
            reference,
            status_code,
            error: error.into(),
            response: None,
        }
    }

    pub fn response<S: Into<String>>(mut self, body: S) -> Self {
        self.response = Some(body.into()).filter(|b: &String| !b.is_empty());
        self
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: &Diagnostic);
}

pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, d: &Diagnostic) {
        log::error!(
            "{} failed for {} ({}): {}",
            d.operation,
            d.reference.as_deref().unwrap_or("-"),
            d.status_code,
            d.error
        );
    }
}

/// Appends one JSON document per line to an audit file.
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn append(&self, d: &Diagnostic) -> Result<(), anyhow::Error> {
        let line = serde_json::to_string(d)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Diagnostic log lock poisoned"))?;
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl DiagnosticSink for JsonLinesSink {
    fn record(&self, d: &Diagnostic) {
        self.append(d).log_error("Unable to write diagnostic");
    }
}

pub struct CompositeSink(pub Vec<Box<dyn DiagnosticSink>>);

impl DiagnosticSink for CompositeSink {
    fn record(&self, d: &Diagnostic) {
        for sink in &self.0 {
            sink.record(d);
        }
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;

    #[derive(Default)]
    pub struct MemorySink(pub Mutex<Vec<Diagnostic>>);

    impl MemorySink {
        pub fn recorded(&self) -> Vec<Diagnostic> {
            self.0.lock().unwrap().clone()
        }
    }

    impl DiagnosticSink for MemorySink {
        fn record(&self, d: &Diagnostic) {
            self.0.lock().unwrap().push(d.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_appended() {
        let path = std::env::temp_dir().join(format!("vendus_errors_{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let sink = JsonLinesSink::new(path.clone());
        sink.record(&Diagnostic::new("create_product", Some("SKU1".into()), 422, "bad"));
        sink.record(&Diagnostic::new("create_product", None, 0, "timeout").response(""));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["reference"], "SKU1");
        assert_eq!(first["status_code"], 422);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second.get("response").is_none());
        std::fs::remove_file(&path).unwrap();
    }
}
