use derive_more::{Deref, Display, Error};
use lazy_regex::regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use vendus_types::mapping::{is_allowed_product_field, FieldMapping, FieldType};

/// Fields rendered as fixed two-decimal strings instead of integers.
pub const CURRENCY_FIELDS: &[&str] = &[
    "price",
    "supply",
    "price_group_gross",
    "gross_price",
    "supply_price",
];

pub fn is_currency_field(field: &str) -> bool {
    CURRENCY_FIELDS.contains(&field)
}

/// Ordered key/value view of one logical entity.
///
/// Keys are either remote field names or spreadsheet column headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntityData(Vec<(String, String)>);

impl RawEntityData {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        let key = key.trim().to_lowercase();
        self.0
            .iter()
            .find(|(k, _)| k.trim().to_lowercase() == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawEntityData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Self::new();
        for (k, v) in iter {
            data.insert(k, v);
        }
        data
    }
}

/// Request body in the shape the remote API expects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Deref)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.0.insert(key.into(), value.into());
    }

    /// String or number field rendered as text.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn without(&self, key: &str) -> Self {
        let mut map = self.0.clone();
        map.remove(key);
        Self(map)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Payload> for Value {
    fn from(p: Payload) -> Value {
        p.into_value()
    }
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error(ignore)]
    #[display("Missing required fields: {}", _0.join(", "))]
    MissingRequired(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredFieldPolicy {
    /// Drop the unresolved field and keep building.
    #[default]
    Skip,
    /// Reject the whole entity.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolToken {
    True,
    False,
    Unrecognized,
}

/// Normalizes spreadsheet booleans. Tokens outside the known vocabulary map
/// to `unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BooleanPolicy {
    pub unrecognized: bool,
}

impl BooleanPolicy {
    pub fn classify(raw: &str) -> BoolToken {
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "y" | "s" | "sim" | "verdadeiro" => BoolToken::True,
            "0" | "false" | "no" | "off" | "n" | "nao" | "não" | "falso" | "" => BoolToken::False,
            _ => BoolToken::Unrecognized,
        }
    }

    pub fn normalize(&self, raw: &str) -> bool {
        match Self::classify(raw) {
            BoolToken::True => true,
            BoolToken::False => false,
            BoolToken::Unrecognized => {
                log::debug!("Unrecognized boolean {raw:?}, using {}", self.unrecognized);
                self.unrecognized
            }
        }
    }
}

/// Values resolved before building that the fallback table may draw on.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub unit_id: Option<u64>,
}

type Fallback = Box<dyn Fn(&BuildContext) -> Option<Value> + Send + Sync>;

/// Per-field resolvers for required fields left empty by the mapping.
pub struct FallbackTable(HashMap<String, Fallback>);

impl FallbackTable {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn register<F>(&mut self, field: &str, resolver: F)
    where
        F: Fn(&BuildContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.0.insert(field.to_string(), Box::new(resolver));
    }

    pub fn resolve(&self, field: &str, ctx: &BuildContext) -> Option<Value> {
        self.0.get(field).and_then(|f| f(ctx))
    }
}

impl Default for FallbackTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register("unit_id", |ctx| ctx.unit_id.map(Value::from));
        table.register("status", |_| Some(Value::from("on")));
        table
    }
}

pub struct PayloadBuilder {
    required_policy: RequiredFieldPolicy,
    boolean_policy: BooleanPolicy,
    fallbacks: FallbackTable,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new(RequiredFieldPolicy::Skip, BooleanPolicy::default())
    }
}

impl PayloadBuilder {
    pub fn new(required_policy: RequiredFieldPolicy, boolean_policy: BooleanPolicy) -> Self {
        Self {
            required_policy,
            boolean_policy,
            fallbacks: FallbackTable::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Builds the product body for `raw`.
    ///
    /// `mappings` are walked in order; inactive or non-whitelisted entries
    /// are ignored. The same input always yields the same payload.
    pub fn build(
        &self,
        raw: &RawEntityData,
        mappings: &[FieldMapping],
        ctx: &BuildContext,
    ) -> Result<Payload, PayloadError> {
        let mut fields = Map::new();
        let mut missing = vec![];
        for mapping in mappings
            .iter()
            .filter(|m| m.active && is_allowed_product_field(&m.target_field))
        {
            let field = mapping.target_field.as_str();
            let value = resolve_value(raw, mapping).and_then(|v| {
                let coerced = self.coerce(field, mapping.field_type, v);
                if coerced.is_none() {
                    log::warn!("Unable to read {field} as {} from {v:?}", mapping.field_type);
                }
                coerced
            });
            let value = match value {
                Some(v) => v,
                None if mapping.required => match self.fallbacks.resolve(field, ctx) {
                    Some(v) => v,
                    None => {
                        match self.required_policy {
                            RequiredFieldPolicy::Skip => {
                                log::warn!("Required field {field} has no value, skipping it")
                            }
                            RequiredFieldPolicy::Fail => missing.push(field.to_string()),
                        }
                        continue;
                    }
                },
                None => continue,
            };
            fields.insert(field.to_string(), value);
        }
        if !missing.is_empty() {
            return Err(PayloadError::MissingRequired(missing));
        }

        nest_prices(&mut fields);
        nest_stock(&mut fields);
        nest_tax(&mut fields);

        fields
            .entry("status")
            .or_insert_with(|| Value::from("on"));
        for key in ["reference", "title", "barcode"] {
            if fields.contains_key(key) {
                continue;
            }
            if let Some(v) = raw.get(key).filter(|v| !v.trim().is_empty()) {
                fields.insert(key.to_string(), Value::from(v.trim()));
            }
        }
        if !fields.contains_key("unit_id") {
            if let Some(unit) = ctx.unit_id {
                fields.insert("unit_id".to_string(), Value::from(unit));
            }
        }

        fields.retain(|k, _| is_allowed_product_field(k));
        Ok(Payload(fields))
    }

    fn coerce(&self, field: &str, field_type: FieldType, raw: &str) -> Option<Value> {
        if is_currency_field(field) {
            if let Some(d) = parse_decimal(raw) {
                return Some(Value::from(format_money(d)));
            }
        }
        match field_type {
            FieldType::String => Some(Value::from(raw.to_string())),
            FieldType::Number => parse_decimal(raw)
                .and_then(|d| d.trunc().to_i64())
                .map(Value::from),
            FieldType::Boolean => Some(Value::from(if self.boolean_policy.normalize(raw) {
                "on"
            } else {
                "off"
            })),
        }
    }
}

fn resolve_value<'a>(raw: &'a RawEntityData, mapping: &'a FieldMapping) -> Option<&'a str> {
    let filled = |v: &&str| !v.trim().is_empty();
    raw.get(&mapping.target_field)
        .filter(filled)
        .or_else(|| {
            mapping
                .source()
                .and_then(|col| raw.get_ignore_case(col))
                .filter(filled)
        })
        .or_else(|| mapping.default_value.as_deref().filter(filled))
}

fn merge_object(fields: &mut Map<String, Value>, key: &str, nested: Map<String, Value>) {
    if nested.is_empty() {
        return;
    }
    match fields.get_mut(key) {
        Some(Value::Object(existing)) => existing.extend(nested),
        _ => {
            fields.insert(key.to_string(), Value::Object(nested));
        }
    }
}

fn nest_prices(fields: &mut Map<String, Value>) {
    let mut prices = Map::new();
    if let Some(v) = fields.remove("price") {
        prices.insert("gross".to_string(), v);
    }
    if let Some(v) = fields.remove("supply") {
        prices.insert("supply".to_string(), v);
    }
    let mut group = Map::new();
    if let Some(v) = fields.remove("price_group_id") {
        group.insert("id".to_string(), v);
    }
    if let Some(v) = fields.remove("price_group_gross") {
        group.insert("gross".to_string(), v);
    }
    if !group.is_empty() {
        prices.insert("groups".to_string(), Value::Array(vec![Value::Object(group)]));
    }
    merge_object(fields, "prices", prices);
}

fn nest_stock(fields: &mut Map<String, Value>) {
    let mut stock = Map::new();
    if let Some(v) = fields.remove("stock_control") {
        stock.insert("control".to_string(), v);
    }
    if let Some(v) = fields.remove("stock_type") {
        stock.insert("type".to_string(), v);
    }
    let mut store = Map::new();
    for (flat, nested) in [
        ("stock_store_id", "id"),
        ("product_variant_id", "product_variant_id"),
        ("stock_stock", "stock"),
        ("stock_stock_alert", "stock_alert"),
    ] {
        if let Some(v) = fields.remove(flat) {
            store.insert(nested.to_string(), v);
        }
    }
    if !store.is_empty() {
        stock.insert("stores".to_string(), Value::Array(vec![Value::Object(store)]));
    }
    merge_object(fields, "stock", stock);
}

fn nest_tax(fields: &mut Map<String, Value>) {
    let mut tax = Map::new();
    let flat_tax = match fields.get("tax") {
        Some(Value::Object(_)) | None => None,
        Some(_) => fields.remove("tax"),
    };
    if let Some(v) = fields.remove("tax_id").or(flat_tax) {
        tax.insert("id".to_string(), v);
    }
    if let Some(v) = fields.remove("tax_exemption") {
        tax.insert("exemption".to_string(), v);
    }
    if let Some(v) = fields.remove("tax_exemption_law") {
        tax.insert("exemption_law".to_string(), v);
    }
    merge_object(fields, "tax", tax);
}

/// Parses loosely formatted amounts such as `"€ 1.234,50"` or `"19,99"`.
///
/// When both separators appear the last one is the decimal point. A lone
/// comma is a decimal comma.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned = regex!(r"[^\d.,\-]").replace_all(raw, "");
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => keep_last_separator(&cleaned, ','),
        (None, Some(_)) => keep_last_separator(&cleaned, '.'),
        (None, None) => cleaned.to_string(),
    };
    Decimal::from_str(&normalized).ok()
}

fn keep_last_separator(s: &str, sep: char) -> String {
    let last = s.rfind(sep);
    s.char_indices()
        .filter_map(|(i, c)| match c {
            c if c == sep && Some(i) == last => Some('.'),
            c if c == sep => None,
            c => Some(c),
        })
        .collect()
}

/// Renders an amount with exactly two decimals, rounding half away from zero.
pub fn format_money(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

pub fn money(raw: &str) -> Option<String> {
    parse_decimal(raw).map(format_money)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use vendus_types::mapping::default_product_mappings;

    fn shirt() -> RawEntityData {
        RawEntityData::new()
            .with("reference", "SKU1")
            .with("title", "Shirt")
            .with("price", "19,99")
            .with("Custo", "7.5")
    }

    fn mappings() -> Vec<FieldMapping> {
        let mut mappings = default_product_mappings();
        for m in mappings.iter_mut() {
            if m.target_field == "supply" {
                m.source_column = Some("custo".to_string());
            }
        }
        mappings
    }

    #[test]
    fn build_is_idempotent() {
        let builder = PayloadBuilder::default();
        let ctx = BuildContext { unit_id: Some(12) };
        let first = builder.build(&shirt(), &mappings(), &ctx).unwrap();
        let second = builder.build(&shirt(), &mappings(), &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn build_nests_prices_and_fills_defaults() {
        let payload = PayloadBuilder::default()
            .build(&shirt(), &mappings(), &BuildContext { unit_id: Some(12) })
            .unwrap();
        assert_eq!(
            payload.clone().into_value(),
            json!({
                "reference": "SKU1",
                "title": "Shirt",
                "prices": {"gross": "19.99", "supply": "7.50"},
                "status": "on",
                "unit_id": 12,
                "include_description": "no",
                "lot_control": "off",
                "stock": {"control": "1"},
            })
        );
    }

    #[test]
    fn output_keys_are_whitelisted() {
        let mut mappings = mappings();
        mappings.push(FieldMapping::new("secret", "Secret").with_source("secret"));
        let raw = shirt().with("secret", "x").with("stock_stock", "3");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert!(payload.keys().all(|k| is_allowed_product_field(k)));
        assert!(!payload.contains_key("secret"));
        assert!(!payload.contains_key("price"));
        assert!(!payload.contains_key("stock_stock"));
        assert_eq!(payload["stock"]["stores"][0]["stock"], json!(3));
    }

    #[test]
    fn source_column_matches_case_insensitively() {
        let mappings = vec![FieldMapping::new("title", "Nome").with_source(" NOME ")];
        let raw = RawEntityData::new().with("nome", "Camisola");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["title"], json!("Camisola"));
    }

    #[test]
    fn target_key_wins_over_source_column() {
        let mappings = vec![FieldMapping::new("title", "Nome").with_source("Nome")];
        let raw = RawEntityData::new()
            .with("Nome", "From column")
            .with("title", "Direct");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["title"], json!("Direct"));
    }

    #[test]
    fn required_unit_falls_back_to_context() {
        let mappings = vec![FieldMapping::new("unit_id", "Unidade")
            .typed(FieldType::Number)
            .required()];
        let payload = PayloadBuilder::default()
            .build(&RawEntityData::new(), &mappings, &BuildContext { unit_id: Some(77) })
            .unwrap();
        assert_eq!(payload["unit_id"], json!(77));
    }

    #[test]
    fn missing_required_field_is_skipped_or_rejected() {
        let mappings = vec![FieldMapping::new("supplier_code", "Fornecedor").required()];
        let skip = PayloadBuilder::default()
            .build(&RawEntityData::new(), &mappings, &BuildContext::default())
            .unwrap();
        assert!(!skip.contains_key("supplier_code"));

        let strict = PayloadBuilder::new(RequiredFieldPolicy::Fail, BooleanPolicy::default());
        let err = strict
            .build(&RawEntityData::new(), &mappings, &BuildContext::default())
            .unwrap_err();
        assert_eq!(
            err,
            PayloadError::MissingRequired(vec!["supplier_code".to_string()])
        );
    }

    #[test]
    fn extra_fallback_can_be_registered() {
        let mut table = FallbackTable::default();
        table.register("supplier_code", |_| Some(Value::from("N/A")));
        let builder = PayloadBuilder::new(RequiredFieldPolicy::Fail, BooleanPolicy::default())
            .with_fallbacks(table);
        let mappings = vec![FieldMapping::new("supplier_code", "Fornecedor").required()];
        let payload = builder
            .build(&RawEntityData::new(), &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["supplier_code"], json!("N/A"));
    }

    #[test]
    fn numbers_truncate_and_booleans_normalize() {
        let mappings = vec![
            FieldMapping::new("category_id", "Categoria").typed(FieldType::Number),
            FieldMapping::new("lot_control", "Lote").typed(FieldType::Boolean),
        ];
        let raw = RawEntityData::new()
            .with("category_id", "41.9")
            .with("lot_control", "Sim");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["category_id"], json!(41));
        assert_eq!(payload["lot_control"], json!("on"));

        let raw = RawEntityData::new().with("lot_control", "maybe");
        let lenient = PayloadBuilder::new(
            RequiredFieldPolicy::Skip,
            BooleanPolicy { unrecognized: true },
        );
        let payload = lenient
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["lot_control"], json!("on"));
    }

    #[test]
    fn tax_fields_collapse() {
        let mappings = vec![
            FieldMapping::new("tax", "Taxa"),
            FieldMapping::new("tax_exemption", "Isenção"),
        ];
        let raw = RawEntityData::new()
            .with("tax", "NOR")
            .with("tax_exemption", "M01");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["tax"], json!({"id": "NOR", "exemption": "M01"}));
    }

    #[test]
    fn string_typed_price_is_still_formatted() {
        let mappings = vec![
            FieldMapping::new("price", "PVP").typed(FieldType::String),
            FieldMapping::new("title", "Nome"),
        ];
        let raw = RawEntityData::new().with("price", "19,99").with("title", "Shirt");
        let payload = PayloadBuilder::default()
            .build(&raw, &mappings, &BuildContext::default())
            .unwrap();
        assert_eq!(payload["prices"]["gross"], json!("19.99"));
        assert_eq!(payload["title"], json!("Shirt"));
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(money("19.999").as_deref(), Some("20.00"));
        assert_eq!(money("19,99").as_deref(), Some("19.99"));
        assert_eq!(money("20").as_deref(), Some("20.00"));
        assert_eq!(money("€ 1.234,50").as_deref(), Some("1234.50"));
        assert_eq!(money("1,234.5").as_deref(), Some("1234.50"));
        assert_eq!(money("abc"), None);
        assert_eq!(format_money(dec!(0.005)), "0.01");
    }
}
