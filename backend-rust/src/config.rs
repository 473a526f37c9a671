use std::str::FromStr;
use std::time::Duration;

// ─── Backend Configuration ───────────────────────────────────────────────────

pub struct BackendConfig {
    /// HTTP / Socket.IO port (default 3001)
    pub port: u16,
    /// Full URL of the external parser's upload endpoint. When unset, uploads
    /// are synthesized locally.
    pub parser_url: Option<String>,
    /// Request timeout for the parser service (default 30 s)
    pub parser_timeout: Duration,
    /// Artificial delay before local synthesis, mimics parser latency (default 1 s)
    pub synth_delay: Duration,
    /// Largest accepted upload body (default 32 MiB)
    pub max_upload_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl BackendConfig {
    /// Build from any key/value source; `Default` reads the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            port: lookup("PORT").and_then(|v| u16::from_str(v.trim()).ok()).unwrap_or(3001),
            parser_url: lookup("PARSER_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            parser_timeout: Duration::from_secs(parse("PARSER_TIMEOUT_SECS").unwrap_or(30)),
            synth_delay: Duration::from_millis(parse("SYNTH_DELAY_MS").unwrap_or(1000)),
            max_upload_bytes: parse("MAX_UPLOAD_BYTES").map(|v| v as usize).unwrap_or(32 * 1024 * 1024),
        }
    }
}
