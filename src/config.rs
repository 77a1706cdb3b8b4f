use crate::payload::{BooleanPolicy, RequiredFieldPolicy};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://www.vendus.pt/ws/v1.2";

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub api_key: String,
    pub api_url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub default_unit_id: Option<u64>,
    pub store_id: Option<u64>,
    pub stock_quantity: i64,
    pub stock_alert: i64,
    pub conflict_codes: Vec<String>,
    pub error_log: Option<PathBuf>,
    pub required_policy: RequiredFieldPolicy,
    pub boolean_policy: BooleanPolicy,
    pub variant_group: String,
    pub mappings_dir: PathBuf,
    pub bind_addr: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(60 * 60 * 24),
            default_unit_id: None,
            store_id: None,
            stock_quantity: 0,
            stock_alert: 0,
            conflict_codes: vec![],
            error_log: None,
            required_policy: RequiredFieldPolicy::Skip,
            boolean_policy: BooleanPolicy::default(),
            variant_group: "Size".to_string(),
            mappings_dir: PathBuf::from("cfg.d"),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Only `VENDUS_API_KEY` is mandatory, everything else falls back to
    /// defaults.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = Self::default();
        let api_key = envmnt::get_or("VENDUS_API_KEY", "").trim().to_string();
        if api_key.is_empty() {
            return Err(anyhow::anyhow!("VENDUS_API_KEY is not set"));
        }
        let required_policy = match envmnt::get_or("REQUIRED_FIELD_POLICY", "skip")
            .trim()
            .to_lowercase()
            .as_str()
        {
            "fail" | "reject" => RequiredFieldPolicy::Fail,
            _ => RequiredFieldPolicy::Skip,
        };
        let boolean_policy = BooleanPolicy {
            unrecognized: envmnt::get_parse("BOOLEAN_UNRECOGNIZED").unwrap_or(false),
        };
        Ok(Self {
            api_key,
            api_url: envmnt::get_or("VENDUS_API_URL", DEFAULT_API_URL),
            timeout: envmnt::get_parse("VENDUS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            cache_ttl: envmnt::get_parse("VENDUS_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            default_unit_id: envmnt::get_parse("VENDUS_DEFAULT_UNIT_ID").ok(),
            store_id: envmnt::get_parse("VENDUS_STORE_ID").ok(),
            stock_quantity: envmnt::get_parse("VENDUS_STOCK_QUANTITY").unwrap_or(0),
            stock_alert: envmnt::get_parse("VENDUS_STOCK_ALERT").unwrap_or(0),
            conflict_codes: envmnt::get_or("VENDUS_CONFLICT_CODES", "")
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            error_log: Some(envmnt::get_or("VENDUS_ERROR_LOG", ""))
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            required_policy,
            boolean_policy,
            variant_group: envmnt::get_or("VENDUS_VARIANT_GROUP", &defaults.variant_group),
            mappings_dir: PathBuf::from(envmnt::get_or("MAPPINGS_DIR", "cfg.d")),
            bind_addr: envmnt::get_or("BIND_ADDR", &defaults.bind_addr),
        })
    }
}
