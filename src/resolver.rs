use crate::payload::Payload;
use crate::remote::{collect_items, numeric_id, text_field, RemoteApi};
use serde_json::Value;
use std::sync::Arc;

const REFERENCE_PARAMS: [&str; 4] = ["reference", "ref", "q", "search"];
const BARCODE_PARAMS: [&str; 2] = ["barcode", "q"];

/// Looks up the remote id of an already existing product.
pub struct EntityResolver {
    api: Arc<RemoteApi>,
}

impl EntityResolver {
    pub fn new(api: Arc<RemoteApi>) -> Self {
        Self { api }
    }

    /// Tries the reference first, then the barcode. `None` means nothing
    /// matched, which is not an error.
    pub async fn find_id(&self, payload: &Payload) -> Option<u64> {
        let lookups = [
            ("reference", &REFERENCE_PARAMS[..]),
            ("barcode", &BARCODE_PARAMS[..]),
        ];
        for (field, params) in lookups {
            let value = match payload.text(field) {
                Some(v) => v,
                None => continue,
            };
            for param in params {
                if let Some(id) = self.lookup(field, param, &value).await {
                    log::info!("Found existing product {id} by {field}={value}");
                    return Some(id);
                }
            }
        }
        None
    }

    async fn lookup(&self, field: &str, param: &str, value: &str) -> Option<u64> {
        let url = self.api.endpoints().products();
        let json = self.api.get_json(&url, &[(param, value)]).await?;
        matching_id(&json, field, value)
    }
}

/// First id among listed items whose `field` equals `value`.
///
/// An item without `field` is only accepted when it is the sole item listed.
pub fn matching_id(json: &Value, field: &str, value: &str) -> Option<u64> {
    let items = collect_items(json);
    let sole = items.len() == 1;
    items
        .into_iter()
        .filter(|item| match text_field(item, field) {
            Some(v) => v.eq_ignore_ascii_case(value.trim()),
            None => sole,
        })
        .find_map(numeric_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoints;
    use crate::transport::mock::{json, MockTransport};
    use crate::transport::{ApiResponse, AuthScheme};
    use serde_json::json;

    const PRODUCTS: &str = "https://api.test/v1.2/products";

    fn resolver(transport: Arc<MockTransport>) -> EntityResolver {
        EntityResolver::new(Arc::new(RemoteApi::new(
            transport,
            Endpoints::new("https://api.test/v1.2"),
        )))
    }

    #[test]
    fn mismatching_items_are_ignored() {
        let listing = json!({"data": [
            {"id": 1, "reference": "OTHER"},
            {"id": 2, "reference": "sku1"},
        ]});
        assert_eq!(matching_id(&listing, "reference", "SKU1"), Some(2));
        assert_eq!(matching_id(&json!([{"id": 3}]), "reference", "SKU1"), Some(3));
        assert_eq!(matching_id(&json!([]), "reference", "SKU1"), None);
    }

    #[test]
    fn id_only_items_need_to_be_alone() {
        let search = json!({"data": [{"id": 5}, {"id": 6}]});
        assert_eq!(matching_id(&search, "reference", "SKU1"), None);
        let mixed = json!({"data": [{"id": 5}, {"id": 6, "reference": "SKU1"}]});
        assert_eq!(matching_id(&mixed, "reference", "SKU1"), Some(6));
    }

    #[tokio::test]
    async fn falls_back_to_basic_auth_and_other_params() {
        let transport = Arc::new(MockTransport::new(|req| {
            let by_ref = req.query.iter().any(|(k, _)| k == "ref");
            match (req.auth, by_ref) {
                (AuthScheme::Basic, true) => json(200, json!([{"id": 77, "reference": "SKU1"}])),
                (AuthScheme::Bearer, _) => Ok(ApiResponse::new(401, "")),
                _ => json(200, json!([])),
            }
        }));
        let mut payload = Payload::new();
        payload.insert("reference", "SKU1");
        assert_eq!(resolver(transport.clone()).find_id(&payload).await, Some(77));
        let requests = transport.requests();
        assert!(requests.iter().all(|r| r.url == PRODUCTS));
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test]
    async fn barcode_is_used_when_reference_misses() {
        let transport = Arc::new(MockTransport::new(|req| {
            if req.query.contains(&("barcode".to_string(), "5601".to_string())) {
                json(200, json!({"products": [{"id": 12, "barcode": "5601"}]}))
            } else {
                json(200, json!({"data": []}))
            }
        }));
        let mut payload = Payload::new();
        payload.insert("reference", "SKU1");
        payload.insert("barcode", "5601");
        assert_eq!(resolver(transport).find_id(&payload).await, Some(12));
    }

    #[tokio::test]
    async fn nothing_found_is_none() {
        let transport = Arc::new(MockTransport::new(|_| Ok(ApiResponse::new(404, ""))));
        let mut payload = Payload::new();
        payload.insert("reference", "SKU1");
        assert_eq!(resolver(transport.clone()).find_id(&payload).await, None);
        assert_eq!(transport.requests().len(), REFERENCE_PARAMS.len() * 2);
    }
}
