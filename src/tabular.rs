use anyhow::Context as AnyhowContext;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

/// First worksheet of an upload: a header line and the data rows below it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sheet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn from_records(records: Vec<Vec<String>>) -> Self {
        let mut records = records
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()));
        let header = records
            .next()
            .map(|h| h.into_iter().map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();
        Self {
            header,
            rows: records.collect(),
        }
    }

    pub fn cell<'a>(&self, row: &'a [String], column: Option<usize>) -> &'a str {
        column
            .and_then(|i| row.get(i))
            .map(|c| c.trim())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Workbook,
    Csv,
}

impl Format {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Workbook),
            "csv" | "txt" => Some(Self::Csv),
            _ => None,
        }
    }
}

pub fn read_sheet(bytes: Vec<u8>, file_name: Option<&str>) -> Result<Sheet, anyhow::Error> {
    match file_name.and_then(Format::from_file_name) {
        Some(Format::Workbook) => read_workbook(bytes),
        Some(Format::Csv) => read_csv(&bytes),
        None => read_workbook(bytes.clone()).or_else(|err| {
            log::debug!("Upload is not a workbook ({err}), trying CSV");
            read_csv(&bytes)
        }),
    }
}

pub fn read_workbook(bytes: Vec<u8>) -> Result<Sheet, anyhow::Error> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).context("Unable to open workbook")?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow::anyhow!("Workbook has no worksheets"))?
        .context("Unable to read first worksheet")?;
    let records = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Sheet::from_records(records))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

pub fn read_csv(bytes: &[u8]) -> Result<Sheet, anyhow::Error> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let count = |d: u8| first_line.iter().filter(|b| **b == d).count();
    let delimiter = if count(b';') > count(b',') { b';' } else { b',' };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);
    let mut records = vec![];
    for record in reader.records() {
        let record = record.context("Unable to parse CSV record")?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(Sheet::from_records(records))
}
