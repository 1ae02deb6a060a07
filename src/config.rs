//! Environment configuration.

use std::env;

/// Process-level configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub polygon_chain_id: u64,
    /// Absent key leaves order placement and contract calls disabled while
    /// scan/storage/price/dispatch keep running.
    pub private_key: Option<String>,
    pub rpc_url: Option<String>,
    /// Explicit proxy URL. When unset, `SOCKS_PROXY` / `HTTPS_PROXY` /
    /// `HTTP_PROXY` are consulted in that order at client build time.
    pub proxy: Option<String>,
    pub port: u16,
    pub database_path: String,
    pub log_dir: String,
}

impl EnvConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let gamma_api_url = env::var("GAMMA_API_URL")
            .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string());

        let clob_api_url =
            env::var("CLOB_API_URL").unwrap_or_else(|_| "https://clob.polymarket.com".to_string());

        let polygon_chain_id = env::var("POLYGON_CHAIN_ID")
            .unwrap_or_else(|_| "137".to_string())
            .parse()
            .unwrap_or(137);

        let private_key = env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty());
        let rpc_url = env::var("RPC_URL").ok().filter(|u| !u.is_empty());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./polyarb.db".to_string());

        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

        Ok(Self {
            gamma_api_url,
            clob_api_url,
            polygon_chain_id,
            private_key,
            rpc_url,
            proxy: resolve_proxy_from_env(),
            port,
            database_path,
            log_dir,
        })
    }

    pub fn signing_enabled(&self) -> bool {
        self.private_key.is_some()
    }
}

/// Proxy resolution order: `SOCKS_PROXY` → `HTTPS_PROXY` → `HTTP_PROXY`.
pub fn resolve_proxy_from_env() -> Option<String> {
    for var in ["SOCKS_PROXY", "HTTPS_PROXY", "HTTP_PROXY"] {
        if let Ok(value) = env::var(var) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}
