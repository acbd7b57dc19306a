//! Browser Automation Fallback
//!
//! Drives a merchant storefront the way a shopper would when the merchant
//! has no UCP endpoint. The page driver sits behind [`BrowserPage`] so the
//! checkout flow can run against WebDriver in production and a scripted
//! page in tests.
//!
//! ```text
//! navigate ─▶ add items ─▶ open checkout ─▶ fill shipping ─▶ payment ─▶ place order ─▶ order number
//!                                                             │
//!                                                             └─▶ manual intervention
//! ```

mod storefront;
mod webdriver;

pub use storefront::{extract_order_number, ProfileStrategy, ShippingFields, StorefrontProfile};
pub use webdriver::{WebDriverLauncher, WebDriverPage};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

use agent_payments::model::Address;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum BrowserError {
    /// The driver answered with a WebDriver error object
    #[error("WebDriver {error}: {message}")]
    Driver { error: String, message: String },

    #[error("Browser transport error: {0}")]
    Http(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Unexpected driver response: {0}")]
    Protocol(String),

    #[error("Screenshot error: {0}")]
    Screenshot(String),
}

impl BrowserError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrowserError::Http(_) | BrowserError::Timeout(_))
    }
}

impl From<reqwest::Error> for BrowserError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BrowserError::Timeout(e.to_string())
        } else if e.is_decode() {
            BrowserError::Protocol(e.to_string())
        } else {
            BrowserError::Http(e.to_string())
        }
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

// ============================================================================
// Page driver seam
// ============================================================================

/// Element locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Css(String),

    /// Element of `tag` whose visible text contains `text`
    Text { tag: String, text: String },

    XPath(String),
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Selector::Css(selector.into())
    }

    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Selector::Text {
            tag: tag.into(),
            text: text.into(),
        }
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Selector::XPath(expr.into())
    }

    /// WebDriver locator strategy and value
    pub fn locator(&self) -> (&'static str, String) {
        match self {
            Selector::Css(css) => ("css selector", css.clone()),
            Selector::Text { tag, text } => (
                "xpath",
                format!(
                    "//{}[contains(normalize-space(.), {})]",
                    tag,
                    xpath_literal(text)
                ),
            ),
            Selector::XPath(expr) => ("xpath", expr.clone()),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "{}", css),
            Selector::Text { tag, text } => write!(f, "{}:has-text(\"{}\")", tag, text),
            Selector::XPath(expr) => write!(f, "xpath={}", expr),
        }
    }
}

/// Quote a string for XPath 1.0, which has no escape syntax
fn xpath_literal(text: &str) -> String {
    if !text.contains('"') {
        format!("\"{}\"", text)
    } else if !text.contains('\'') {
        format!("'{}'", text)
    } else {
        let parts: Vec<String> = text.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

/// Opaque handle to an element on the current page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// One browser tab
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate and wait for the document to finish loading
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    /// First displayed element matching `selector`, polling up to `wait`
    async fn find_visible(
        &mut self,
        selector: &Selector,
        wait: Duration,
    ) -> BrowserResult<Option<ElementRef>>;

    async fn count(&mut self, selector: &Selector) -> BrowserResult<usize>;

    async fn click(&mut self, element: &ElementRef) -> BrowserResult<()>;

    /// Replace the value of an input or choose a select option by text
    async fn fill(&mut self, element: &ElementRef, value: &str) -> BrowserResult<()>;

    async fn text(&mut self, element: &ElementRef) -> BrowserResult<String>;

    /// Visible text of the whole page
    async fn page_text(&mut self) -> BrowserResult<String>;

    /// Wait until the document reports it has loaded
    async fn wait_for_load(&mut self, timeout: Duration) -> BrowserResult<()>;

    /// PNG bytes of the viewport
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;

    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;
}

// ============================================================================
// Jobs and outcomes
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStep {
    Launch,
    Navigate,
    AddToCart,
    OpenCheckout,
    FillShipping,
    SelectPayment,
    PlaceOrder,
    ConfirmOrder,
}

impl std::fmt::Display for AutomationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AutomationStep::Launch => "launch",
            AutomationStep::Navigate => "navigate",
            AutomationStep::AddToCart => "add_to_cart",
            AutomationStep::OpenCheckout => "open_checkout",
            AutomationStep::FillShipping => "fill_shipping",
            AutomationStep::SelectPayment => "select_payment",
            AutomationStep::PlaceOrder => "place_order",
            AutomationStep::ConfirmOrder => "confirm_order",
        };
        write!(f, "{}", name)
    }
}

/// Item to put in the storefront cart
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Everything the storefront flow needs
#[derive(Clone, Debug)]
pub struct AutomationJob {
    pub merchant_url: Url,
    pub items: Vec<JobItem>,
    pub buyer_email: String,
    pub buyer_name: Option<String>,
    pub shipping_address: Option<Address>,
    /// Label or value of a saved payment method to prefer. Raw card data is
    /// never entered.
    pub payment_method: Option<String>,
}

/// Terminal result of an automated checkout
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutomationOutcome {
    Completed {
        order_number: Option<String>,
    },
    ManualInterventionRequired {
        step: AutomationStep,
        reason: String,
    },
    Failed {
        step: Option<AutomationStep>,
        error: String,
        screenshot: Option<PathBuf>,
    },
}

impl AutomationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AutomationOutcome::Completed { .. })
    }

    pub fn order_number(&self) -> Option<&str> {
        match self {
            AutomationOutcome::Completed { order_number } => order_number.as_deref(),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AutomationOutcome::Completed { .. } => None,
            AutomationOutcome::ManualInterventionRequired { reason, .. } => Some(reason),
            AutomationOutcome::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Serialize)]
struct OutcomeReport<'a> {
    success: bool,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<AutomationStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot: Option<&'a PathBuf>,
}

impl Serialize for AutomationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (outcome, step, screenshot) = match self {
            AutomationOutcome::Completed { .. } => ("completed", None, None),
            AutomationOutcome::ManualInterventionRequired { step, .. } => {
                ("manual_intervention_required", Some(*step), None)
            }
            AutomationOutcome::Failed { step, screenshot, .. } => {
                ("failed", *step, screenshot.as_ref())
            }
        };

        OutcomeReport {
            success: self.is_success(),
            outcome,
            order_number: self.order_number(),
            error: self.error_message(),
            step,
            screenshot,
        }
        .serialize(serializer)
    }
}

/// Hard failure inside a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    pub step: AutomationStep,
    pub error: String,
}

impl StepFailure {
    pub fn new(step: AutomationStep, error: impl Into<String>) -> Self {
        Self {
            step,
            error: error.into(),
        }
    }

    /// Adapter for `map_err` on driver calls
    pub fn at(step: AutomationStep) -> impl Fn(BrowserError) -> StepFailure {
        move |e| StepFailure::new(step, e.to_string())
    }
}

/// Checkout flow for one family of storefronts
#[async_trait]
pub trait CheckoutAutomationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this strategy knows how to drive `merchant`
    fn matches(&self, merchant: &Url) -> bool;

    /// Run the flow on an open page. Manual intervention is an `Ok` outcome;
    /// hard failures return the step they happened in.
    async fn run(
        &self,
        page: &mut dyn BrowserPage,
        job: &AutomationJob,
    ) -> Result<AutomationOutcome, StepFailure>;
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    /// Page load budget; the whole flow gets a multiple of it
    pub timeout: Duration,
    /// Failure screenshots are written here when set
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".into(),
            headless: true,
            timeout: Duration::from_secs(60),
            screenshot_dir: None,
        }
    }
}

const FLOW_TIMEOUT_FACTOR: u32 = 5;

pub struct BrowserAutomation {
    launcher: Arc<dyn BrowserLauncher>,
    strategies: Vec<Arc<dyn CheckoutAutomationStrategy>>,
    config: BrowserConfig,
}

impl BrowserAutomation {
    /// Shopify first, generic storefront last
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: BrowserConfig) -> Self {
        let strategies: Vec<Arc<dyn CheckoutAutomationStrategy>> = vec![
            Arc::new(ProfileStrategy::new(StorefrontProfile::shopify())),
            Arc::new(ProfileStrategy::new(StorefrontProfile::generic())),
        ];
        Self {
            launcher,
            strategies,
            config,
        }
    }

    /// WebDriver-backed automation from config
    pub fn webdriver(config: BrowserConfig) -> Result<Self, BrowserError> {
        let launcher = WebDriverLauncher::new(&config)?;
        Ok(Self::new(Arc::new(launcher), config))
    }

    /// Try `strategy` before the built-in ones
    pub fn with_strategy(mut self, strategy: Arc<dyn CheckoutAutomationStrategy>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn strategy_for(&self, merchant: &Url) -> Option<&Arc<dyn CheckoutAutomationStrategy>> {
        self.strategies.iter().find(|s| s.matches(merchant))
    }

    /// Run the storefront checkout. The page is closed on every path.
    pub async fn automate_checkout(&self, job: &AutomationJob) -> AutomationOutcome {
        let Some(strategy) = self.strategy_for(&job.merchant_url) else {
            return AutomationOutcome::Failed {
                step: None,
                error: format!("No automation strategy for {}", job.merchant_url),
                screenshot: None,
            };
        };

        tracing::info!(
            merchant = %job.merchant_url,
            strategy = strategy.name(),
            items = job.items.len(),
            "Starting browser checkout"
        );

        let mut page = match self.launcher.open_page().await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(error = %e, "Could not open browser page");
                return AutomationOutcome::Failed {
                    step: Some(AutomationStep::Launch),
                    error: e.to_string(),
                    screenshot: None,
                };
            }
        };

        let budget = self.config.timeout * FLOW_TIMEOUT_FACTOR;
        let result = match tokio::time::timeout(budget, strategy.run(page.as_mut(), job)).await {
            Ok(result) => result.map_err(|failure| (Some(failure.step), failure.error)),
            // The flow as a whole ran out; the step it stalled in is unknown
            Err(_) => Err((
                None,
                format!("Checkout did not finish within {}s", budget.as_secs()),
            )),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err((step, error)) => {
                let screenshot = self.capture_failure(page.as_mut()).await;
                AutomationOutcome::Failed {
                    step,
                    error,
                    screenshot,
                }
            }
        };

        if let Err(e) = page.close().await {
            tracing::warn!(error = %e, "Failed to close browser page");
        }

        match &outcome {
            AutomationOutcome::Completed { order_number } => {
                tracing::info!(order_number = ?order_number, "Browser checkout completed");
            }
            AutomationOutcome::ManualInterventionRequired { step, reason } => {
                tracing::info!(step = %step, reason = %reason, "Browser checkout needs the shopper");
            }
            AutomationOutcome::Failed { step, error, .. } => {
                tracing::warn!(step = ?step, error = %error, "Browser checkout failed");
            }
        }
        outcome
    }

    async fn capture_failure(&self, page: &mut dyn BrowserPage) -> Option<PathBuf> {
        let dir = self.config.screenshot_dir.as_ref()?;

        let png = match page.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                tracing::warn!(error = %e, "Failure screenshot not captured");
                return None;
            }
        };

        let path = dir.join(format!("checkout-failure-{}.png", uuid::Uuid::new_v4()));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &png).await
        }
        .await;

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Failure screenshot not saved");
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    fn automation(page: FakePage, screenshot_dir: Option<PathBuf>) -> BrowserAutomation {
        BrowserAutomation::new(
            Arc::new(FakeLauncher { page }),
            BrowserConfig {
                screenshot_dir,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_text_selector_becomes_xpath() {
        let (using, value) = Selector::text("button", "Add to Cart").locator();
        assert_eq!(using, "xpath");
        assert_eq!(value, "//button[contains(normalize-space(.), \"Add to Cart\")]");

        let (_, quoted) = Selector::text("a", "Say \"hi\"").locator();
        assert_eq!(quoted, "//a[contains(normalize-space(.), 'Say \"hi\"')]");

        assert_eq!(xpath_literal("a\"b'c"), "concat(\"a\", '\"', \"b'c\")");
        assert_eq!(Selector::css("#email").locator(), ("css selector", "#email".into()));
    }

    #[test]
    fn test_outcome_serialization() {
        let done = AutomationOutcome::Completed {
            order_number: Some("A-1001".into()),
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"success": true, "outcome": "completed", "order_number": "A-1001"})
        );

        let manual = AutomationOutcome::ManualInterventionRequired {
            step: AutomationStep::SelectPayment,
            reason: "Alternative payment method requires user interaction".into(),
        };
        let value = serde_json::to_value(&manual).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["step"], "select_payment");
        assert!(value["error"].as_str().unwrap().contains("user interaction"));
    }

    #[tokio::test]
    async fn test_failure_closes_page_and_saves_screenshot() {
        let dir = std::env::temp_dir().join(format!("browser-test-{}", uuid::Uuid::new_v4()));
        let page = FakePage::default();
        let log = page.log.clone();

        let outcome = automation(page, Some(dir.clone()))
            .automate_checkout(&job("https://shop.example.com"))
            .await;

        let AutomationOutcome::Failed { step, error, screenshot } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(step, Some(AutomationStep::AddToCart));
        assert_eq!(error, "Failed to add item prod_tee to cart");
        let path = screenshot.expect("screenshot path");
        assert!(path.starts_with(&dir));
        assert!(path.exists());

        let log = log.lock().unwrap();
        assert!(log.closed);
        assert_eq!(log.screenshots, 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_no_screenshot_without_dir() {
        let page = FakePage::default();
        let log = page.log.clone();

        let outcome = automation(page, None)
            .automate_checkout(&job("https://shop.example.com"))
            .await;

        assert!(matches!(outcome, AutomationOutcome::Failed { screenshot: None, .. }));
        let log = log.lock().unwrap();
        assert!(log.closed);
        assert_eq!(log.screenshots, 0);
    }

    struct StalledStrategy;

    #[async_trait]
    impl CheckoutAutomationStrategy for StalledStrategy {
        fn name(&self) -> &str {
            "stalled"
        }

        fn matches(&self, _merchant: &Url) -> bool {
            true
        }

        async fn run(
            &self,
            _page: &mut dyn BrowserPage,
            _job: &AutomationJob,
        ) -> Result<AutomationOutcome, StepFailure> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_timeout_names_no_step() {
        let page = FakePage::default();
        let log = page.log.clone();

        let outcome = automation(page, None)
            .with_strategy(Arc::new(StalledStrategy))
            .automate_checkout(&job("https://shop.example.com"))
            .await;

        let AutomationOutcome::Failed { step, error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(step, None);
        assert!(error.starts_with("Checkout did not finish within"));
        assert!(log.lock().unwrap().closed);
    }

    #[test]
    fn test_strategy_selection_prefers_specific_profile() {
        let automation = automation(FakePage::default(), None);
        let shopify = Url::parse("https://acme.myshopify.com/").unwrap();
        let generic = Url::parse("https://shop.example.com/").unwrap();

        assert_eq!(automation.strategy_for(&shopify).unwrap().name(), "shopify");
        assert_eq!(automation.strategy_for(&generic).unwrap().name(), "generic");
    }
}
