use crate::cache::TtlCache;
use crate::payload::Payload;
use crate::remote::{collect_items, numeric_id, text_field, RemoteApi};
use crate::submission::{SubmissionAction, SubmissionEngine, SubmissionResult};
use crate::text::{fold, same_label};
use serde_json::{json, Value};
use std::sync::Arc;

const TITLE_KEYS: [&str; 4] = ["title", "name", "text", "value"];
const CHILD_KEYS: [&str; 5] = ["variants", "values", "children", "items", "options"];
const SIZE_TITLES: [&str; 4] = ["size", "sizes", "tamanho", "tamanhos"];

/// Node of the remote variant taxonomy: a section such as "Size" or one of
/// its values such as "M".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyNode {
    pub id: u64,
    pub title: String,
    pub children: Vec<TaxonomyNode>,
}

impl TaxonomyNode {
    pub fn parse_all(value: &Value) -> Vec<TaxonomyNode> {
        collect_items(value)
            .into_iter()
            .filter_map(Self::parse)
            .collect()
    }

    fn parse(value: &Value) -> Option<TaxonomyNode> {
        let id = numeric_id(value)?;
        let title = TITLE_KEYS
            .iter()
            .find_map(|k| text_field(value, k))
            .unwrap_or_default();
        let children = CHILD_KEYS
            .iter()
            .filter_map(|k| value.get(*k))
            .map(Self::parse_all)
            .find(|c| !c.is_empty())
            .unwrap_or_default();
        Some(TaxonomyNode {
            id,
            title,
            children,
        })
    }

    /// Child holding the selectable values. Falls back to the node itself
    /// when the section lists its values directly.
    pub fn size_node(&self, group_title: &str) -> &TaxonomyNode {
        let group = fold(group_title);
        self.children
            .iter()
            .find(|c| {
                let title = fold(&c.title);
                title == group || SIZE_TITLES.contains(&title.as_str())
            })
            .filter(|c| !c.children.is_empty())
            .unwrap_or(self)
    }

    pub fn value_id(&self, text: &str) -> Option<u64> {
        self.children
            .iter()
            .find(|c| same_label(&c.title, text))
            .map(|c| c.id)
    }
}

/// Section matching `group_title`: exact folded match first, then a
/// containment match.
pub fn find_section<'a>(nodes: &'a [TaxonomyNode], group_title: &str) -> Option<&'a TaxonomyNode> {
    let group = fold(group_title);
    if group.is_empty() {
        return None;
    }
    nodes
        .iter()
        .find(|n| fold(&n.title) == group)
        .or_else(|| {
            nodes.iter().find(|n| {
                let title = fold(&n.title);
                !title.is_empty() && (title.contains(&group) || group.contains(&title))
            })
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantItem {
    pub text: String,
    pub barcode: String,
    pub code: String,
    /// Two-decimal price string.
    pub price: String,
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StockPolicy {
    pub store_id: Option<u64>,
    pub quantity: i64,
    pub alert: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantOutcome {
    /// Result of the base product submission.
    pub base: SubmissionResult,
    pub attempted: usize,
    pub attached: usize,
    pub linked: usize,
    pub stock_updated: bool,
    pub notes: Vec<String>,
}

impl VariantOutcome {
    pub fn is_complete(&self) -> bool {
        self.base.success
            && self.attached == self.attempted
            && (self.linked == 0 || self.stock_updated)
    }

    pub fn is_partial(&self) -> bool {
        self.base.success && !self.is_complete()
    }
}

pub fn variant_group_payload(group_title: &str, items: &[VariantItem]) -> Payload {
    let product_variants: Vec<Value> = items
        .iter()
        .map(|i| {
            json!({
                "text": i.text.trim(),
                "barcode": i.barcode,
                "code": i.code,
                "price": i.price,
            })
        })
        .collect();
    let mut payload = Payload::new();
    payload.insert(
        "variants",
        json!([{
            "variant": {"title": group_title},
            "product_variants": product_variants,
        }]),
    );
    payload
}

pub struct VariantOrchestrator {
    api: Arc<RemoteApi>,
    engine: Arc<SubmissionEngine>,
    cache: TtlCache<&'static str, Arc<Vec<TaxonomyNode>>>,
    stock: StockPolicy,
}

impl VariantOrchestrator {
    pub fn new(
        api: Arc<RemoteApi>,
        engine: Arc<SubmissionEngine>,
        cache: TtlCache<&'static str, Arc<Vec<TaxonomyNode>>>,
        stock: StockPolicy,
    ) -> Self {
        Self {
            api,
            engine,
            cache,
            stock,
        }
    }

    pub async fn taxonomy(&self) -> Arc<Vec<TaxonomyNode>> {
        if let Some(nodes) = self.cache.get(&"variants").await {
            return nodes;
        }
        let url = self.api.endpoints().variants();
        match self.api.get_json(&url, &[]).await {
            Some(json) => {
                let nodes = Arc::new(TaxonomyNode::parse_all(&json));
                self.cache.insert("variants", nodes.clone()).await;
                nodes
            }
            None => {
                log::warn!("Variant taxonomy unavailable at {url}");
                Arc::new(vec![])
            }
        }
    }

    /// Creates the base product, attaches its variant group and allocates
    /// stock for every value that resolved to a taxonomy node.
    pub async fn create_with_variants(
        &self,
        mut base: Payload,
        group_title: &str,
        items: &[VariantItem],
    ) -> VariantOutcome {
        let mut notes = vec![];
        let taxonomy = self.taxonomy().await;
        let section = find_section(&taxonomy, group_title);
        let links: Vec<u64> = match section {
            Some(section) => {
                base.insert("variant_id", section.id);
                let values = section.size_node(group_title);
                items
                    .iter()
                    .filter_map(|item| {
                        let id = values.value_id(&item.text);
                        if id.is_none() {
                            log::warn!("Variant value {:?} not found under {group_title}", item.text);
                            notes.push(format!("No composite link for {}", item.text.trim()));
                        }
                        id
                    })
                    .collect()
            }
            None => {
                log::warn!("Variant section {group_title:?} not found");
                notes.push(format!("Variant section {group_title} not found"));
                vec![]
            }
        };
        let mut outcome = VariantOutcome {
            base: self.engine.submit(&base).await,
            attempted: items.len(),
            attached: 0,
            linked: links.len(),
            stock_updated: false,
            notes,
        };
        if !outcome.base.success {
            return outcome;
        }
        let id = match outcome.base.remote_id {
            Some(id) => id,
            None => match self.engine.resolver().find_id(&base).await {
                Some(id) => {
                    outcome.base.remote_id = Some(id);
                    outcome.base.action = Some(SubmissionAction::Found);
                    id
                }
                None => {
                    outcome
                        .notes
                        .push("Base product id unknown, variants not attached".to_string());
                    return outcome;
                }
            },
        };

        let attach = self
            .engine
            .update(id, &variant_group_payload(group_title, items))
            .await;
        if attach.success {
            outcome.attached = items.len();
        } else {
            outcome.notes.push(format!(
                "Variant attach failed: {}",
                attach.error_message().unwrap_or_default()
            ));
        }

        if !links.is_empty() {
            match self.stock.store_id {
                Some(store) => {
                    let stock = self.stock_payload(store, items, section, group_title);
                    let res = self.engine.update(id, &stock).await;
                    outcome.stock_updated = res.success;
                    if !res.success {
                        outcome.notes.push(format!(
                            "Stock update failed: {}",
                            res.error_message().unwrap_or_default()
                        ));
                    }
                }
                None => {
                    log::warn!("VENDUS_STORE_ID is not set, skipping stock allocation");
                    outcome.linked = 0;
                }
            }
        }
        outcome
    }

    fn stock_payload(
        &self,
        store: u64,
        items: &[VariantItem],
        section: Option<&TaxonomyNode>,
        group_title: &str,
    ) -> Payload {
        let stores: Vec<Value> = section
            .map(|s| s.size_node(group_title))
            .into_iter()
            .flat_map(|values| {
                items.iter().filter_map(move |item| {
                    values.value_id(&item.text).map(|value_id| {
                        json!({
                            "id": store,
                            "product_variant_id": value_id,
                            "stock": item.stock.unwrap_or(self.stock.quantity),
                            "stock_alert": self.stock.alert,
                        })
                    })
                })
            })
            .collect();
        let mut payload = Payload::new();
        payload.insert("stock", json!({ "stores": stores }));
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::tests::{engine, PRODUCTS, ROOT};
    use crate::transport::mock::{json as respond, MockTransport};
    use crate::transport::{ApiRequest, ApiResponse, HttpMethod};
    use std::time::Duration;

    const VARIANTS: &str = "https://api.test/v1.2/products/variants";
    const PRODUCT_42: &str = "https://api.test/v1.2/products/42";

    fn taxonomy() -> Value {
        json!({"data": [
            {"id": 5, "title": "Cor", "values": [{"id": 51, "title": "Azul"}]},
            {"id": 10, "title": "Size", "variants": [
                {"id": 11, "title": "Tamanho", "values": [
                    {"id": 101, "title": "M"},
                    {"id": 102, "title": "L"},
                    {"id": 103, "title": "XL"},
                ]}
            ]},
        ]})
    }

    fn item(text: &str, barcode: &str) -> VariantItem {
        VariantItem {
            text: text.to_string(),
            barcode: barcode.to_string(),
            code: format!("SKU1-{}", text.trim()),
            price: "19.99".to_string(),
            stock: None,
        }
    }

    fn orchestrator(transport: Arc<MockTransport>, store_id: Option<u64>) -> VariantOrchestrator {
        let (engine, _) = engine(transport.clone());
        let api = Arc::new(RemoteApi::new(transport, crate::endpoint::Endpoints::new(ROOT)));
        VariantOrchestrator::new(
            api,
            Arc::new(engine),
            TtlCache::new(Duration::from_secs(60)),
            StockPolicy {
                store_id,
                quantity: 5,
                alert: 1,
            },
        )
    }

    fn base() -> Payload {
        let mut p = Payload::new();
        p.insert("reference", "SKU1");
        p.insert("title", "Shirt");
        p
    }

    #[test]
    fn value_matching_ignores_case_and_whitespace() {
        let nodes = TaxonomyNode::parse_all(&taxonomy());
        let section = find_section(&nodes, "size").unwrap();
        assert_eq!(section.id, 10);
        let values = section.size_node("size");
        assert_eq!(values.id, 11);
        assert_eq!(values.value_id(" m "), Some(101));
        assert_eq!(values.value_id("xl"), Some(103));
        assert_eq!(values.value_id("XXL"), None);
    }

    #[test]
    fn section_without_sub_node_lists_values_directly() {
        let nodes = TaxonomyNode::parse_all(&taxonomy());
        let section = find_section(&nodes, "COR").unwrap();
        assert_eq!(section.size_node("Cor").value_id("azul"), Some(51));
    }

    fn happy_transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(|req: &ApiRequest| {
            match (req.method, req.url.as_str()) {
                (HttpMethod::Get, VARIANTS) => respond(200, taxonomy()),
                (HttpMethod::Post, PRODUCTS) => respond(201, json!({"id": 42})),
                (HttpMethod::Put, PRODUCT_42) => respond(200, json!({"id": 42})),
                _ => Ok(ApiResponse::new(404, "")),
            }
        }))
    }

    #[tokio::test]
    async fn creates_base_attaches_variants_and_stock() {
        let transport = happy_transport();
        let orchestrator = orchestrator(transport.clone(), Some(3));
        let items = vec![item("M", "5601"), item("L", "5602")];
        let outcome = orchestrator
            .create_with_variants(base(), "Size", &items)
            .await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.attached, 2);
        assert_eq!(outcome.linked, 2);

        let created = transport.requests_to(HttpMethod::Post, PRODUCTS);
        assert_eq!(created[0].body.as_ref().unwrap()["variant_id"], 10);

        let puts = transport.requests_to(HttpMethod::Put, PRODUCT_42);
        assert_eq!(puts.len(), 2);
        let variants = puts[0].body.clone().unwrap();
        assert_eq!(variants["variants"][0]["variant"]["title"], "Size");
        assert_eq!(variants["variants"][0]["product_variants"][1]["code"], "SKU1-L");
        let stock = puts[1].body.clone().unwrap();
        assert_eq!(
            stock["stock"]["stores"],
            json!([
                {"id": 3, "product_variant_id": 101, "stock": 5, "stock_alert": 1},
                {"id": 3, "product_variant_id": 102, "stock": 5, "stock_alert": 1},
            ])
        );
    }

    #[tokio::test]
    async fn taxonomy_is_fetched_once() {
        let transport = happy_transport();
        let orchestrator = orchestrator(transport.clone(), None);
        let items = vec![item("M", "5601")];
        orchestrator.create_with_variants(base(), "Size", &items).await;
        orchestrator.create_with_variants(base(), "Size", &items).await;
        assert_eq!(transport.requests_to(HttpMethod::Get, VARIANTS).len(), 1);
    }

    #[tokio::test]
    async fn taxonomy_outage_is_not_cached() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let transport = Arc::new(MockTransport::new(move |req: &ApiRequest| {
            match (req.method, req.url.as_str()) {
                (HttpMethod::Get, VARIANTS) => {
                    if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                        Ok(ApiResponse::new(503, ""))
                    } else {
                        respond(200, taxonomy())
                    }
                }
                _ => Ok(ApiResponse::new(404, "")),
            }
        }));
        let orchestrator = orchestrator(transport.clone(), None);
        assert!(orchestrator.taxonomy().await.is_empty());
        assert_eq!(orchestrator.taxonomy().await.len(), 2);
        assert_eq!(orchestrator.taxonomy().await.len(), 2);
        assert_eq!(transport.requests_to(HttpMethod::Get, VARIANTS).len(), 3);
    }

    #[tokio::test]
    async fn failed_attach_is_partial() {
        let transport = Arc::new(MockTransport::new(|req: &ApiRequest| {
            match (req.method, req.url.as_str()) {
                (HttpMethod::Get, VARIANTS) => respond(200, taxonomy()),
                (HttpMethod::Post, PRODUCTS) => respond(201, json!({"id": 42})),
                _ => respond(422, json!({"message": "variants not allowed"})),
            }
        }));
        let orchestrator = orchestrator(transport, Some(3));
        let items = vec![item("M", "5601"), item("L", "5602")];
        let outcome = orchestrator
            .create_with_variants(base(), "Size", &items)
            .await;
        assert!(outcome.base.success);
        assert!(outcome.is_partial());
        assert_eq!(outcome.attached, 0);
        assert!(!outcome.stock_updated);
    }

    #[tokio::test]
    async fn base_without_id_is_found_by_reference() {
        let transport = Arc::new(MockTransport::new(|req: &ApiRequest| {
            match (req.method, req.url.as_str()) {
                (HttpMethod::Get, VARIANTS) => respond(200, taxonomy()),
                (HttpMethod::Post, PRODUCTS) => {
                    Ok(ApiResponse::new(201, "").with_location("/products/pending"))
                }
                (HttpMethod::Get, PRODUCTS) => respond(200, json!([{"id": 42, "reference": "SKU1"}])),
                (HttpMethod::Put, PRODUCT_42) => respond(200, json!({"id": 42})),
                _ => Ok(ApiResponse::new(404, "")),
            }
        }));
        let orchestrator = orchestrator(transport.clone(), None);
        let outcome = orchestrator
            .create_with_variants(base(), "Size", &[item("M", "5601")])
            .await;
        assert_eq!(outcome.base.remote_id, Some(42));
        assert_eq!(outcome.base.action, Some(SubmissionAction::Found));
        assert_eq!(outcome.attached, 1);
        assert_eq!(transport.requests_to(HttpMethod::Put, PRODUCT_42).len(), 1);
    }

    #[tokio::test]
    async fn base_failure_is_not_partial() {
        let transport = Arc::new(MockTransport::new(|req: &ApiRequest| match req.method {
            HttpMethod::Get => respond(200, taxonomy()),
            _ => respond(422, json!({"message": "title is required"})),
        }));
        let orchestrator = orchestrator(transport, Some(3));
        let outcome = orchestrator
            .create_with_variants(base(), "Size", &[item("M", "1")])
            .await;
        assert!(!outcome.base.success);
        assert!(!outcome.is_partial());
    }

    #[tokio::test]
    async fn unknown_values_proceed_without_links() {
        let transport = happy_transport();
        let orchestrator = orchestrator(transport.clone(), Some(3));
        let outcome = orchestrator
            .create_with_variants(base(), "Size", &[item("XXL", "1")])
            .await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.linked, 0);
        assert_eq!(transport.requests_to(HttpMethod::Put, PRODUCT_42).len(), 1);
    }
}
