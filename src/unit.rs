use crate::cache::TtlCache;
use crate::payload::Payload;
use crate::remote::{collect_items, numeric_id, text_field, RemoteApi};
use crate::text::fold;
use serde_json::Value;
use std::sync::Arc;

const PREFERRED_TITLES: [&str; 5] = ["unidade", "unidades", "un", "uni", "unit"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDirectory {
    pub ids: Vec<u64>,
    pub preferred: Option<u64>,
}

impl UnitDirectory {
    pub fn from_response(value: &Value) -> Self {
        let items = collect_items(value);
        let ids: Vec<u64> = items.iter().filter_map(|v| numeric_id(v)).collect();
        let preferred = items
            .iter()
            .find(|v| {
                ["title", "name", "description"]
                    .iter()
                    .filter_map(|k| text_field(v, k))
                    .any(|t| PREFERRED_TITLES.contains(&fold(&t).as_str()))
            })
            .and_then(|v| numeric_id(v))
            .or_else(|| ids.first().copied());
        Self { ids, preferred }
    }
}

/// Resolves the measurement unit every product must reference.
pub struct UnitResolver {
    api: Arc<RemoteApi>,
    configured: Option<u64>,
    cache: TtlCache<&'static str, UnitDirectory>,
}

impl UnitResolver {
    pub fn new(api: Arc<RemoteApi>, configured: Option<u64>, cache: TtlCache<&'static str, UnitDirectory>) -> Self {
        Self {
            api,
            configured,
            cache,
        }
    }

    pub async fn directory(&self) -> UnitDirectory {
        if let Some(dir) = self.cache.get(&"units").await {
            return dir;
        }
        let mut dir = UnitDirectory::default();
        for url in self.api.endpoints().unit_candidates() {
            if let Some(json) = self.api.get_json(&url, &[]).await {
                dir = UnitDirectory::from_response(&json);
                if !dir.ids.is_empty() {
                    log::info!("Loaded {} units from {url}", dir.ids.len());
                    break;
                }
            }
        }
        if dir.ids.is_empty() {
            log::warn!("No unit listing endpoint answered, unit_id stays unresolved");
        } else {
            self.cache.insert("units", dir.clone()).await;
        }
        dir
    }

    pub async fn default_unit(&self) -> Option<u64> {
        match self.configured {
            Some(id) => Some(id),
            None => self.directory().await.preferred,
        }
    }

    /// Replaces a `unit_id` the remote side does not know about.
    pub async fn reconcile(&self, payload: &mut Payload) {
        let current = match payload.get("unit_id").and_then(Value::as_u64) {
            Some(id) => id,
            None => return,
        };
        if Some(current) == self.configured {
            return;
        }
        let dir = self.directory().await;
        if dir.ids.is_empty() || dir.ids.contains(&current) {
            return;
        }
        if let Some(replacement) = self.configured.or(dir.preferred) {
            log::warn!("Unknown unit_id {current}, using {replacement}");
            payload.insert("unit_id", replacement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoints;
    use crate::transport::mock::{json, MockTransport};
    use crate::transport::{ApiResponse, HttpMethod};
    use serde_json::json;
    use std::time::Duration;

    fn resolver(transport: Arc<MockTransport>, configured: Option<u64>) -> UnitResolver {
        let api = Arc::new(RemoteApi::new(transport, Endpoints::new("https://api.test/v1.2")));
        UnitResolver::new(api, configured, TtlCache::new(Duration::from_secs(60)))
    }

    #[test]
    fn preferred_unit_is_matched_by_title() {
        let dir = UnitDirectory::from_response(&json!({"data": [
            {"id": 1, "title": "Kg"},
            {"id": 2, "title": " Unidade "},
        ]}));
        assert_eq!(dir.ids, vec![1, 2]);
        assert_eq!(dir.preferred, Some(2));
    }

    #[tokio::test]
    async fn directory_walks_candidates_and_caches() {
        let transport = Arc::new(MockTransport::new(|req| match req.url.as_str() {
            "https://api.test/v1.2/units" => json(200, json!([{"id": 31, "title": "UN"}])),
            _ => Ok(ApiResponse::new(404, "")),
        }));
        let units = resolver(transport.clone(), None);
        assert_eq!(units.default_unit().await, Some(31));
        assert_eq!(units.default_unit().await, Some(31));
        let listed = transport.requests_to(HttpMethod::Get, "https://api.test/v1.2/units");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn unit_outage_is_retried_later() {
        let down = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = down.clone();
        let transport = Arc::new(MockTransport::new(move |_| {
            if flag.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(ApiResponse::new(503, ""))
            } else {
                json(200, json!([{"id": 31, "title": "Unidade"}]))
            }
        }));
        let units = resolver(transport, None);
        assert_eq!(units.default_unit().await, None);
        down.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(units.default_unit().await, Some(31));
    }

    #[tokio::test]
    async fn reconcile_replaces_unknown_unit() {
        let transport = Arc::new(MockTransport::new(|_| {
            json(200, json!([{"id": 31, "title": "Unidade"}, {"id": 32, "title": "Kg"}]))
        }));
        let units = resolver(transport, None);
        let mut payload = Payload::new();
        payload.insert("unit_id", 99);
        units.reconcile(&mut payload).await;
        assert_eq!(payload["unit_id"], json!(31));

        payload.insert("unit_id", 32);
        units.reconcile(&mut payload).await;
        assert_eq!(payload["unit_id"], json!(32));
    }
}
