use crate::invoice::{InvoiceData, InvoiceHeader, InvoiceItem, DEFAULT_CUSTOMER};
use crate::payload::{money, parse_decimal, RawEntityData};
use crate::tabular::Sheet;
use crate::text::fold;
use crate::variants::VariantItem;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use time::macros::format_description;
use time::OffsetDateTime;
use vendus_types::mapping::FieldMapping;

const REFERENCE: &[&str] = &["ref. vendus", "ref_vendus", "ref vendus", "reference", "referencia"];
const TITLE: &[&str] = &["nome", "name", "title", "titulo"];
const SIZE: &[&str] = &["size", "tamanho"];
const BARCODE: &[&str] = &["upc no.", "upc_no", "upc no", "upc", "barcode", "ean"];
const PRICE: &[&str] = &["pvp", "preco", "price"];
const CATEGORY: &[&str] = &["cat", "categoria", "category"];
const COST: &[&str] = &["cost", "custo"];
const STOCK: &[&str] = &["stock", "qty", "quantidade"];

const INVOICE_REQUIRED: [&str; 4] = ["item_reference", "item_title", "item_quantity", "item_price"];

fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    header.iter().position(|h| {
        let h = fold(h);
        aliases.iter().any(|a| fold(a) == h)
    })
}

/// Column positions of the product sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductHeaderMap {
    pub reference: usize,
    pub title: usize,
    pub size: usize,
    pub barcode: usize,
    pub price: usize,
    pub category: Option<usize>,
    pub cost: Option<usize>,
    pub stock: Option<usize>,
}

/// `None` when any of the reference, name, size, barcode or price columns
/// is missing.
pub fn map_product_headers(header: &[String]) -> Option<ProductHeaderMap> {
    Some(ProductHeaderMap {
        reference: find_column(header, REFERENCE)?,
        title: find_column(header, TITLE)?,
        size: find_column(header, SIZE)?,
        barcode: find_column(header, BARCODE)?,
        price: find_column(header, PRICE)?,
        category: find_column(header, CATEGORY),
        cost: find_column(header, COST),
        stock: find_column(header, STOCK),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    pub key: String,
    pub rows: Vec<Vec<String>>,
}

/// Groups rows sharing a key, keeping the order of first appearance.
fn group_by<F: Fn(&[String]) -> Option<String>>(sheet: &Sheet, key: F) -> Vec<RowGroup> {
    let mut groups: Vec<RowGroup> = vec![];
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in &sheet.rows {
        let Some(k) = key(row.as_slice()) else {
            continue;
        };
        match index.get(&k) {
            Some(i) => groups[*i].rows.push(row.clone()),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push(RowGroup {
                    key: k,
                    rows: vec![row.clone()],
                });
            }
        }
    }
    groups
}

/// Rows without a reference are dropped.
pub fn group_products(sheet: &Sheet, map: &ProductHeaderMap) -> Vec<RowGroup> {
    group_by(sheet, |row| {
        Some(sheet.cell(row, Some(map.reference)).to_string()).filter(|r| !r.is_empty())
    })
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VariantRow {
    pub size: String,
    pub barcode: String,
    pub code: String,
    pub price: String,
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductData {
    pub reference: String,
    pub title: String,
    pub price: String,
    pub category: Option<String>,
    pub cost: Option<String>,
    pub variants: Vec<VariantRow>,
    /// Cells of the first row keyed by their column header.
    pub columns: RawEntityData,
}

pub fn build_product_data(group: &RowGroup, sheet: &Sheet, map: &ProductHeaderMap) -> ProductData {
    let empty = vec![];
    let first = group.rows.first().unwrap_or(&empty);
    let optional = |col: Option<usize>| {
        Some(sheet.cell(first, col).to_string()).filter(|v| !v.is_empty())
    };
    let reference = sheet.cell(first, Some(map.reference)).to_string();
    let variants: Vec<VariantRow> = group
        .rows
        .iter()
        .filter_map(|row| {
            let size = sheet.cell(row, Some(map.size));
            let barcode = sheet.cell(row, Some(map.barcode));
            if size.is_empty() || barcode.is_empty() {
                return None;
            }
            Some(VariantRow {
                size: size.to_string(),
                barcode: barcode.to_string(),
                code: format!("{reference}-{size}"),
                price: sheet.cell(row, Some(map.price)).to_string(),
                stock: parse_decimal(sheet.cell(row, map.stock)).and_then(|d| d.trunc().to_i64()),
            })
        })
        .collect();
    let price = variants
        .first()
        .map(|v| v.price.clone())
        .unwrap_or_else(|| sheet.cell(first, Some(map.price)).to_string());
    let columns = sheet
        .header
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty())
        .map(|(i, h)| (h.clone(), sheet.cell(first, Some(i)).to_string()))
        .collect();
    ProductData {
        title: sheet.cell(first, Some(map.title)).to_string(),
        category: optional(map.category),
        cost: optional(map.cost),
        reference,
        price,
        variants,
        columns,
    }
}

impl ProductData {
    /// Problems that make the product unsendable, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = vec![];
        if self.reference.is_empty() {
            problems.push("Reference is required".to_string());
        }
        if self.title.is_empty() {
            problems.push("Title is required".to_string());
        }
        if money(&self.price).is_none() {
            problems.push(format!("Price {:?} is not numeric", self.price));
        }
        for (n, v) in self.variants.iter().enumerate() {
            let n = n + 1;
            if v.size.is_empty() || v.barcode.is_empty() || v.code.is_empty() {
                problems.push(format!("Variant {n}: size, barcode and code are required"));
            }
            if money(&v.price).is_none() {
                problems.push(format!("Variant {n}: price {:?} is not numeric", v.price));
            }
        }
        problems
    }

    pub fn is_composite(&self) -> bool {
        self.variants.len() > 1
    }

    /// Entity view handed to the payload builder. Logical keys take
    /// precedence over same-named spreadsheet columns.
    pub fn raw_entity(&self) -> RawEntityData {
        let mut raw = self.columns.clone();
        raw.insert("reference", self.reference.clone());
        raw.insert("title", self.title.clone());
        raw.insert("price", self.price.clone());
        if let Some(cost) = &self.cost {
            raw.insert("supply", cost.clone());
        }
        if let [single] = self.variants.as_slice() {
            raw.insert("barcode", single.barcode.clone());
            if let Some(stock) = single.stock {
                raw.insert("stock_stock", stock.to_string());
            }
        }
        raw
    }

    pub fn variant_items(&self) -> Vec<VariantItem> {
        self.variants
            .iter()
            .map(|v| VariantItem {
                text: v.size.clone(),
                barcode: v.barcode.clone(),
                code: v.code.clone(),
                price: money(&v.price).unwrap_or_default(),
                stock: v.stock,
            })
            .collect()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductPreview {
    pub reference: String,
    pub name: String,
    pub category: Option<String>,
    pub price: Option<String>,
    pub variants_count: usize,
    pub variants: Vec<VariantRow>,
}

impl From<&ProductData> for ProductPreview {
    fn from(p: &ProductData) -> Self {
        Self {
            reference: p.reference.clone(),
            name: p.title.clone(),
            category: p.category.clone(),
            price: money(&p.price),
            variants_count: p.variants.len(),
            variants: p.variants.clone(),
        }
    }
}

/// Column positions of the invoice sheet plus per-field defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvoiceHeaderMap {
    columns: HashMap<String, usize>,
    defaults: HashMap<String, String>,
}

impl InvoiceHeaderMap {
    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    fn value(&self, sheet: &Sheet, row: &[String], field: &str) -> Option<String> {
        Some(sheet.cell(row, self.column(field)))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.defaults.get(field).cloned())
    }
}

/// Locates each document mapping's column by its source column, falling
/// back to the target field name and the label. `None` when any item
/// column is missing.
pub fn map_invoice_headers(header: &[String], mappings: &[FieldMapping]) -> Option<InvoiceHeaderMap> {
    let mut map = InvoiceHeaderMap::default();
    for m in mappings.iter().filter(|m| m.active) {
        let column = match m.source() {
            Some(source) => find_column(header, &[source]),
            None => find_column(header, &[m.target_field.as_str(), m.label.as_str()]),
        };
        if let Some(i) = column {
            map.columns.insert(m.target_field.clone(), i);
        }
        if let Some(d) = m.default_value.as_ref().filter(|d| !d.trim().is_empty()) {
            map.defaults.insert(m.target_field.clone(), d.clone());
        }
    }
    INVOICE_REQUIRED
        .iter()
        .all(|f| map.columns.contains_key(*f))
        .then_some(map)
}

pub fn default_invoice_key(now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .unwrap_or_default();
    format!("INV-{stamp}")
}

/// Rows without a document number share the generated default key.
pub fn group_invoices(sheet: &Sheet, map: &InvoiceHeaderMap, now: OffsetDateTime) -> Vec<RowGroup> {
    let default_key = default_invoice_key(now);
    group_by(sheet, |row| {
        Some(sheet.cell(row, map.column("document_number")).to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| Some(default_key.clone()))
    })
}

pub fn build_invoice_data(group: &RowGroup, sheet: &Sheet, map: &InvoiceHeaderMap) -> InvoiceData {
    let empty = vec![];
    let first = group.rows.first().unwrap_or(&empty);
    let header = InvoiceHeader {
        series: map.value(sheet, first, "series"),
        customer_name: map
            .value(sheet, first, "customer_name")
            .unwrap_or_else(|| DEFAULT_CUSTOMER.to_string()),
        customer_nif: map.value(sheet, first, "customer_nif"),
        date: map.value(sheet, first, "date"),
        notes: map.value(sheet, first, "notes"),
    };
    let items = group
        .rows
        .iter()
        .map(|row| InvoiceItem {
            reference: map.value(sheet, row, "item_reference").unwrap_or_default(),
            title: map.value(sheet, row, "item_title").unwrap_or_default(),
            quantity: map
                .value(sheet, row, "item_quantity")
                .unwrap_or_else(|| "1".to_string()),
            gross_price: map.value(sheet, row, "item_price").unwrap_or_default(),
            tax: map.value(sheet, row, "item_tax"),
        })
        .collect();
    InvoiceData {
        document_number: group.key.clone(),
        header,
        items,
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InvoicePreview {
    pub key: String,
    pub customer_name: String,
    pub customer_nif: Option<String>,
    pub series: Option<String>,
    pub date: Option<String>,
    pub items_count: usize,
}

impl From<&InvoiceData> for InvoicePreview {
    fn from(i: &InvoiceData) -> Self {
        Self {
            key: i.document_number.clone(),
            customer_name: i.header.customer_name.clone(),
            customer_nif: i.header.customer_nif.clone(),
            series: i.header.series.clone(),
            date: i.header.date.clone(),
            items_count: i.items.len(),
        }
    }
}
