use crate::config::DEFAULT_API_URL;

const UNIT_PATHS: [&str; 4] = ["unit", "units", "measurement-units", "product-units"];

/// Versioned endpoint layout of the remote API.
///
/// The configured base may point at the API root or directly at the
/// products collection; both resolve to the same root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: String,
}

impl Endpoints {
    pub fn new(base: &str) -> Self {
        let mut root = base.trim().trim_end_matches('/').to_string();
        if root.is_empty() {
            root = DEFAULT_API_URL.to_string();
        }
        if let Some(stripped) = root.strip_suffix("/products") {
            root = stripped.trim_end_matches('/').to_string();
        }
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn products(&self) -> String {
        format!("{}/products", self.root)
    }

    pub fn product(&self, id: u64) -> String {
        format!("{}/products/{id}", self.root)
    }

    pub fn variants(&self) -> String {
        format!("{}/products/variants", self.root)
    }

    pub fn documents(&self) -> String {
        format!("{}/documents", self.root)
    }

    pub fn unit_candidates(&self) -> Vec<String> {
        UNIT_PATHS
            .iter()
            .map(|p| format!("{}/{p}", self.root))
            .collect()
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let e = Endpoints::new("https://www.vendus.pt/ws/v1.2/products/");
        assert_eq!(e.root(), "https://www.vendus.pt/ws/v1.2");
        assert_eq!(e.products(), "https://www.vendus.pt/ws/v1.2/products");
        assert_eq!(e.product(42), "https://www.vendus.pt/ws/v1.2/products/42");
        assert_eq!(Endpoints::new("  "), Endpoints::default());
    }

    #[test]
    fn unit_candidates_live_at_root() {
        let e = Endpoints::new("https://api.test/v1.2");
        assert_eq!(e.unit_candidates()[0], "https://api.test/v1.2/unit");
        assert_eq!(e.unit_candidates().len(), 4);
    }
}
