//! Commerce configuration from the environment.

use std::path::PathBuf;
use std::time::Duration;

use agent_payments::UcpConfig;

use crate::browser::BrowserConfig;

#[derive(Clone, Debug)]
pub struct CommerceConfig {
    /// Fall back to driving the storefront when a merchant has no UCP
    pub browser_fallback_enabled: bool,

    pub browser: BrowserConfig,

    /// Settings for every per-merchant UCP client
    pub ucp: UcpConfig,

    /// Serve the in-memory demo catalog when Stripe is not configured
    pub demo_catalog: bool,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            browser_fallback_enabled: true,
            browser: BrowserConfig::default(),
            ucp: UcpConfig::default(),
            demo_catalog: false,
        }
    }
}

impl CommerceConfig {
    /// Reads `BROWSER_FALLBACK_ENABLED`, `WEBDRIVER_URL`, `BROWSER_HEADLESS`,
    /// `BROWSER_TIMEOUT_MS`, `BROWSER_SCREENSHOT_DIR`, `UCP_AUTH_TOKEN` and
    /// `DEMO_CATALOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = lookup("BROWSER_FALLBACK_ENABLED").and_then(|v| parse_bool(&v)) {
            config.browser_fallback_enabled = enabled;
        }
        if let Some(url) = lookup("WEBDRIVER_URL").filter(|v| !v.trim().is_empty()) {
            config.browser.webdriver_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(headless) = lookup("BROWSER_HEADLESS").and_then(|v| parse_bool(&v)) {
            config.browser.headless = headless;
        }
        match lookup("BROWSER_TIMEOUT_MS").map(|v| v.trim().parse::<u64>()) {
            Some(Ok(ms)) if ms > 0 => config.browser.timeout = Duration::from_millis(ms),
            Some(_) => tracing::warn!("Ignoring invalid BROWSER_TIMEOUT_MS"),
            None => {}
        }
        config.browser.screenshot_dir = lookup("BROWSER_SCREENSHOT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        config.ucp.auth_token = lookup("UCP_AUTH_TOKEN").filter(|v| !v.is_empty());
        config.demo_catalog = lookup("DEMO_CATALOG")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        config
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
