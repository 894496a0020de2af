#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default = "SdkConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "SdkConfig::default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            request_timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl SdkConfig {
    pub fn default_base_url() -> String {
        "http://127.0.0.1:9443".to_string()
    }

    fn default_timeout_ms() -> u64 {
        10_000
    }
}
