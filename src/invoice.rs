use crate::payload::money;
use lazy_regex::regex;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::{json, Map, Value};

pub const DEFAULT_CUSTOMER: &str = "Consumidor final";

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct InvoiceHeader {
    pub series: Option<String>,
    pub customer_name: String,
    pub customer_nif: Option<String>,
    pub date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceItem {
    pub reference: String,
    pub title: String,
    pub quantity: String,
    pub gross_price: String,
    pub tax: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceData {
    pub document_number: String,
    pub header: InvoiceHeader,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceData {
    /// Problems that would make the remote side reject the document.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = vec![];
        if self.items.is_empty() {
            problems.push("Invoice has no items".to_string());
        }
        for (n, item) in self.items.iter().enumerate() {
            let line = n + 1;
            if item.reference.trim().is_empty() {
                problems.push(format!("Line {line}: missing reference"));
            }
            if item.title.trim().is_empty() {
                problems.push(format!("Line {line}: missing title"));
            }
            if money(&item.gross_price).is_none() {
                problems.push(format!("Line {line}: invalid price {:?}", item.gross_price));
            }
            if money(&item.quantity).is_none() {
                problems.push(format!("Line {line}: invalid quantity {:?}", item.quantity));
            }
        }
        problems
    }
}

/// Maps a tax label such as `"IVA 23%"` to the remote rate code.
pub fn tax_code(label: &str) -> Option<String> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let upper = label.to_uppercase();
    if ["NOR", "INT", "RED", "ISE", "OUT"].contains(&upper.as_str()) {
        return Some(upper);
    }
    if upper.contains("ISENTO") || upper.contains("EXEMPT") {
        return Some("ISE".to_string());
    }
    let rate = regex!(r"(\d+(?:[.,]\d+)?)")
        .captures(label)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace(',', "."))
        .and_then(|r| r.parse::<f64>().ok());
    match rate {
        Some(r) if r == 23.0 || r == 22.0 => Some("NOR".to_string()),
        Some(r) if r == 13.0 || r == 12.0 => Some("INT".to_string()),
        Some(r) if r == 6.0 || r == 5.0 || r == 4.0 => Some("RED".to_string()),
        Some(r) if r == 0.0 => Some("ISE".to_string()),
        _ => Some(label.to_string()),
    }
}

/// Renders an invoice as a remote sales document (`FT`).
pub fn document_payload(invoice: &InvoiceData) -> Value {
    let mut doc = Map::new();
    doc.insert("type".to_string(), Value::from("FT"));
    let header = &invoice.header;
    for (key, value) in [
        ("series", &header.series),
        ("date", &header.date),
        ("notes", &header.notes),
    ] {
        if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            doc.insert(key.to_string(), Value::from(v));
        }
    }
    let mut client = Map::new();
    client.insert("name".to_string(), Value::from(header.customer_name.trim()));
    if let Some(nif) = header
        .customer_nif
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        client.insert("fiscal_id".to_string(), Value::from(nif));
    }
    doc.insert("client".to_string(), Value::Object(client));
    let items: Vec<Value> = invoice
        .items
        .iter()
        .map(|item| {
            let mut line = json!({
                "reference": item.reference.trim(),
                "title": item.title.trim(),
                "qty": quantity(&item.quantity),
                "gross_price": money(&item.gross_price).unwrap_or_default(),
            });
            if let Some(code) = item.tax.as_deref().and_then(tax_code) {
                line["tax_id"] = Value::from(code);
            }
            line
        })
        .collect();
    doc.insert("items".to_string(), Value::Array(items));
    Value::Object(doc)
}

fn quantity(raw: &str) -> Value {
    match crate::payload::parse_decimal(raw) {
        Some(q) if q.fract().is_zero() => q
            .to_i64()
            .map(Value::from)
            .unwrap_or_else(|| Value::from(q.to_string())),
        Some(q) => Value::from(q.normalize().to_string()),
        None => Value::from(1),
    }
}
