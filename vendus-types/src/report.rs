use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[display("success")]
    Success,
    #[display("partial")]
    Partial,
    #[display("error")]
    Error,
    #[display("skipped")]
    Skipped,
    #[display("warning")]
    Warning,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    #[serde(rename = "type")]
    pub kind: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<u64>,
}

impl ReportEntry {
    pub fn new<S: Into<String>>(kind: EntryType, message: S) -> Self {
        Self {
            kind,
            reference: None,
            message: message.into(),
            status_code: None,
            variants_count: None,
            remote_id: None,
        }
    }

    pub fn success<S: Into<String>>(message: S) -> Self {
        Self::new(EntryType::Success, message)
    }

    pub fn partial<S: Into<String>>(message: S) -> Self {
        Self::new(EntryType::Partial, message)
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(EntryType::Error, message)
    }

    pub fn skipped<S: Into<String>>(message: S) -> Self {
        Self::new(EntryType::Skipped, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::new(EntryType::Warning, message)
    }

    pub fn reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn variants(mut self, count: usize) -> Self {
        self.variants_count = Some(count);
        self
    }

    pub fn remote_id(mut self, id: Option<u64>) -> Self {
        self.remote_id = id;
        self
    }
}

/// Outcome of one uploaded batch.
///
/// `success` is true when at least one entity went through, mirroring how
/// the upload form reports a mixed batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub results: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn from_entries(total: usize, results: Vec<ReportEntry>) -> Self {
        let count = |kind| results.iter().filter(|e| e.kind == kind).count();
        let (ok, partial, failed, skipped) = (
            count(EntryType::Success),
            count(EntryType::Partial),
            count(EntryType::Error),
            count(EntryType::Skipped),
        );
        Self {
            success: ok + partial > 0 || (failed == 0 && total > 0),
            message: format!(
                "Processed {total}: {ok} succeeded, {partial} partial, {failed} failed, {skipped} skipped"
            ),
            total,
            results,
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: message.into(),
            total: 0,
            results: vec![],
        }
    }

    pub fn count(&self, kind: EntryType) -> usize {
        self.results.iter().filter(|e| e.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_type_tag() {
        let entry = ReportEntry::partial("attached 1/2")
            .reference("SKU1")
            .variants(2);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "partial");
        assert_eq!(json["reference"], "SKU1");
        assert_eq!(json["variants_count"], 2);
        assert!(json.get("status_code").is_none());
    }

    #[test]
    fn report_summarizes_entries() {
        let report = BatchReport::from_entries(
            3,
            vec![
                ReportEntry::success("ok"),
                ReportEntry::error("bad").status(422),
                ReportEntry::skipped("dup"),
            ],
        );
        assert!(report.success);
        assert_eq!(report.count(EntryType::Error), 1);
        assert!(report.message.contains("1 succeeded"));
    }

    #[test]
    fn all_failed_report_is_not_success() {
        let report = BatchReport::from_entries(1, vec![ReportEntry::error("bad")]);
        assert!(!report.success);
    }
}
