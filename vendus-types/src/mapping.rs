use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use typesafe_repository::async_ops::{Get, List, Remove, Save};
use typesafe_repository::{GetIdentity, Identity, RefIdentity, Repository};

pub mod service;

/// Top-level product keys accepted by the v1.2 products endpoint.
pub const ALLOWED_PRODUCT_FIELDS: &[&str] = &[
    "reference",
    "barcode",
    "supplier_code",
    "title",
    "description",
    "include_description",
    "unit_id",
    "type_id",
    "variant_id",
    "class_id",
    "prices",
    "stock",
    "tax",
    "lot_control",
    "category_id",
    "brand_id",
    "image",
    "status",
    "stores",
    "variants",
    "price",
    "supply",
    "price_group_id",
    "price_group_gross",
    "stock_control",
    "stock_type",
    "stock_store_id",
    "product_variant_id",
    "stock_stock",
    "stock_stock_alert",
    "tax_id",
    "tax_exemption",
    "tax_exemption_law",
];

pub fn is_allowed_product_field(field: &str) -> bool {
    ALLOWED_PRODUCT_FIELDS.contains(&field)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    #[display("string")]
    String,
    #[display("number")]
    Number,
    #[display("boolean")]
    Boolean,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "lowercase")]
pub enum Catalog {
    #[display("products")]
    Products,
    #[display("documents")]
    Documents,
}

impl Catalog {
    pub fn try_from<S: AsRef<str>>(s: S) -> Option<Self> {
        match s.as_ref().trim().to_lowercase().as_str() {
            "products" | "product" => Some(Self::Products),
            "documents" | "document" | "invoices" => Some(Self::Documents),
            _ => None,
        }
    }

    pub fn defaults(&self) -> Vec<FieldMapping> {
        match self {
            Self::Products => default_product_mappings(),
            Self::Documents => default_document_mappings(),
        }
    }
}

/// Binds one remote field to a spreadsheet column.
///
/// `target_field` is the identity: at most one active mapping exists per
/// target field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub target_field: String,
    pub label: String,
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Identity for FieldMapping {
    type Id = String;
}

impl RefIdentity for FieldMapping {
    fn id_ref(&self) -> &Self::Id {
        &self.target_field
    }
}

impl GetIdentity for FieldMapping {
    fn id(&self) -> Self::Id {
        self.target_field.clone()
    }
}

impl FieldMapping {
    pub fn new<T: Into<String>, L: Into<String>>(target_field: T, label: L) -> Self {
        Self {
            target_field: target_field.into(),
            label: label.into(),
            source_column: None,
            field_type: FieldType::String,
            required: false,
            default_value: None,
            description: None,
            active: true,
        }
    }

    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default<S: Into<String>>(mut self, value: S) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_source<S: Into<String>>(mut self, column: S) -> Self {
        self.source_column = Some(column.into());
        self
    }

    pub fn described<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Source column with surrounding whitespace removed, if any is set.
    pub fn source(&self) -> Option<&str> {
        self.source_column
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub trait MappingRepository:
    Repository<FieldMapping, Error = anyhow::Error>
    + Get<FieldMapping>
    + List<FieldMapping>
    + Remove<FieldMapping>
    + Save<FieldMapping>
    + Send
    + Sync
{
}

/// Filters `mappings` down to the ones the builder should see.
///
/// Inactive mappings are dropped, then the product allow-list is applied
/// for [`Catalog::Products`]. If two active mappings share a target field the
/// first one in catalog order wins. Document mappings are ordered by
/// target field.
pub fn active_ordered(catalog: Catalog, mappings: Vec<FieldMapping>) -> Vec<FieldMapping> {
    let mut seen = HashSet::new();
    let mut res: Vec<_> = mappings
        .into_iter()
        .filter(|m| m.active)
        .filter(|m| match catalog {
            Catalog::Products => is_allowed_product_field(&m.target_field),
            Catalog::Documents => true,
        })
        .filter(|m| {
            let fresh = seen.insert(m.target_field.clone());
            if !fresh {
                log::warn!("Duplicate active mapping for {} ignored", m.target_field);
            }
            fresh
        })
        .collect();
    if catalog == Catalog::Documents {
        res.sort_by(|a, b| a.target_field.cmp(&b.target_field));
    }
    res
}

pub fn default_product_mappings() -> Vec<FieldMapping> {
    use FieldType::*;
    vec![
        FieldMapping::new("title", "Nome do Produto").required(),
        FieldMapping::new("price", "Preço (venda) (prices.gross)")
            .typed(Number)
            .required(),
        FieldMapping::new("supply", "Preço de Custo (prices.supply)").typed(Number),
        FieldMapping::new("unit_id", "Unidade")
            .typed(Number)
            .described("Resolvido automaticamente se não configurado"),
        FieldMapping::new("status", "Status").required().with_default("on"),
        FieldMapping::new("reference", "Referência"),
        FieldMapping::new("barcode", "Código de Barras"),
        FieldMapping::new("supplier_code", "Código do Fornecedor"),
        FieldMapping::new("description", "Descrição"),
        FieldMapping::new("include_description", "Incluir Descrição").with_default("no"),
        FieldMapping::new("type_id", "Tipo"),
        FieldMapping::new("class_id", "Classe"),
        FieldMapping::new("category_id", "Categoria").typed(Number),
        FieldMapping::new("brand_id", "Marca").typed(Number),
        FieldMapping::new("lot_control", "Controle de Lote")
            .typed(Boolean)
            .with_default("false"),
        FieldMapping::new("stock_control", "Stock - Control").with_default("1"),
        FieldMapping::new("stock_type", "Stock - Type"),
        FieldMapping::new("stock_store_id", "Stock - Store ID").typed(Number),
        FieldMapping::new("product_variant_id", "Stock - Product Variant ID").typed(Number),
        FieldMapping::new("stock_stock", "Stock - Quantidade").typed(Number),
        FieldMapping::new("stock_stock_alert", "Stock - Alerta").typed(Number),
        FieldMapping::new("price_group_id", "Grupo de Preço - ID").typed(Number),
        FieldMapping::new("price_group_gross", "Grupo de Preço - Preço").typed(Number),
        FieldMapping::new("tax_id", "Imposto - ID").described("Usado para construir tax.id"),
        FieldMapping::new("tax_exemption", "Imposto - Isenção"),
        FieldMapping::new("tax_exemption_law", "Imposto - Lei de Isenção"),
        FieldMapping::new("tax", "Taxa").described("Taxa aplicável ao produto (ID ou código)"),
        FieldMapping::new("image", "Imagem").described("URL da imagem do produto"),
    ]
}

pub fn default_document_mappings() -> Vec<FieldMapping> {
    use FieldType::*;
    vec![
        FieldMapping::new("document_number", "Número do Documento")
            .described("Agrupa linhas da mesma fatura"),
        FieldMapping::new("series", "Série"),
        FieldMapping::new("customer_name", "Cliente - Nome")
            .required()
            .with_default("Consumidor final"),
        FieldMapping::new("customer_nif", "Cliente - NIF"),
        FieldMapping::new("date", "Data do Documento").described("YYYY-MM-DD"),
        FieldMapping::new("notes", "Notas"),
        FieldMapping::new("item_reference", "Item - Referência").required(),
        FieldMapping::new("item_title", "Item - Título").required(),
        FieldMapping::new("item_quantity", "Item - Quantidade")
            .typed(Number)
            .required()
            .with_default("1"),
        FieldMapping::new("item_price", "Item - Preço").required(),
        FieldMapping::new("item_tax", "Item - Imposto/IVA").described("ex.: IVA 23%"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_ordered_keeps_catalog_order() {
        let mut mappings = default_product_mappings();
        mappings[1].active = false;
        mappings.push(FieldMapping::new("not_a_remote_field", "Unknown"));
        let res = active_ordered(Catalog::Products, mappings);
        let fields: Vec<_> = res.iter().map(|m| m.target_field.as_str()).collect();
        assert_eq!(fields[0], "title");
        assert_eq!(fields[1], "supply");
        assert!(!fields.contains(&"price"));
        assert!(!fields.contains(&"not_a_remote_field"));
    }

    #[test]
    fn duplicate_target_fields_keep_first() {
        let mappings = vec![
            FieldMapping::new("title", "First").with_source("Nome"),
            FieldMapping::new("title", "Second").with_source("Name"),
        ];
        let res = active_ordered(Catalog::Products, mappings);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].label, "First");
    }

    #[test]
    fn document_mappings_are_sorted_by_target() {
        let res = active_ordered(Catalog::Documents, default_document_mappings());
        let fields: Vec<_> = res.iter().map(|m| m.target_field.clone()).collect();
        let mut sorted = fields.clone();
        sorted.sort();
        assert_eq!(fields, sorted);
    }

    #[test]
    fn default_product_fields_are_allowed() {
        assert!(default_product_mappings()
            .iter()
            .all(|m| is_allowed_product_field(&m.target_field)));
    }

    #[test]
    fn mapping_deserializes_with_defaults() {
        let m: FieldMapping =
            serde_json::from_str(r#"{"target_field":"title","label":"Nome"}"#).unwrap();
        assert!(m.active);
        assert!(!m.required);
        assert_eq!(m.field_type, FieldType::String);
        assert_eq!(m.source(), None);
    }
}
