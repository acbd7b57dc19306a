//! Storefront profiles
//!
//! A profile is the selector vocabulary of one storefront family. Every
//! list is tried in order and the first visible match wins.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use super::{
    AutomationJob, AutomationOutcome, AutomationStep, BrowserPage, BrowserResult,
    CheckoutAutomationStrategy, ElementRef, JobItem, Selector, StepFailure,
};

static ORDER_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:order|confirmation)\s*(?:#\s*([a-z0-9][a-z0-9-]*)|(?:number:?|no\.)\s*#?\s*([a-z0-9-]*[0-9][a-z0-9-]*))",
    )
    .expect("Invalid regex")
});

/// Order number from confirmation text such as `Order #A-1001` or
/// `Order Number: 98213`. Without a `#` the number must contain a digit.
pub fn extract_order_number(text: &str) -> Option<String> {
    ORDER_NUMBER_RE
        .captures(text)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

/// Alias selectors for each shipping form field
#[derive(Clone, Debug, Default)]
pub struct ShippingFields {
    pub email: Vec<Selector>,
    pub name: Vec<Selector>,
    pub address1: Vec<Selector>,
    pub address2: Vec<Selector>,
    pub city: Vec<Selector>,
    pub state: Vec<Selector>,
    pub zip: Vec<Selector>,
    pub country: Vec<Selector>,
}

#[derive(Clone, Debug)]
pub struct StorefrontProfile {
    pub name: String,

    /// Hosts this profile drives, matched by suffix. Empty matches any host.
    pub host_suffixes: Vec<String>,

    /// Product page relative to the merchant URL, with `{product_id}`
    pub product_path: Option<String>,

    /// Checkout page to open when no checkout button is visible
    pub checkout_path: Option<String>,

    pub add_to_cart: Vec<Selector>,
    pub quantity: Vec<Selector>,
    pub checkout: Vec<Selector>,
    pub fields: ShippingFields,

    /// CSS for saved payment method radios
    pub saved_payment: String,

    /// Wallet buttons that need the shopper
    pub alternative_payment: Vec<Selector>,

    pub place_order: Vec<Selector>,
    pub order_number: Vec<Selector>,

    pub button_wait: Duration,
    pub field_wait: Duration,
    /// Pause after adding an item so cart widgets can update
    pub settle: Duration,
    pub navigation_timeout: Duration,
}

fn css(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| Selector::css(*s)).collect()
}

fn button(text: &str) -> Selector {
    Selector::text("button", text)
}

impl StorefrontProfile {
    /// Conventional storefront markup
    pub fn generic() -> Self {
        Self {
            name: "generic".into(),
            host_suffixes: Vec::new(),
            product_path: None,
            checkout_path: None,
            add_to_cart: vec![
                button("Add to Cart"),
                button("Add to Bag"),
                Selector::css("[data-testid=\"add-to-cart\"]"),
                Selector::css(".add-to-cart-button"),
                Selector::css("#add-to-cart"),
                Selector::xpath("//button[@type='submit'][contains(normalize-space(.), \"Add\")]"),
            ],
            quantity: css(&["input[name=\"quantity\"]", "#quantity"]),
            checkout: vec![
                Selector::text("a", "Checkout"),
                button("Checkout"),
                Selector::css("[data-testid=\"checkout-button\"]"),
                Selector::css(".checkout-button"),
                Selector::css("#checkout"),
                Selector::css("a[href*=\"checkout\"]"),
            ],
            fields: ShippingFields {
                email: css(&["#email", "input[name=\"email\"]", "input[type=\"email\"]"]),
                name: css(&["#name", "input[name=\"name\"]", "input[name=\"fullName\"]"]),
                address1: css(&["#address1", "input[name=\"address1\"]", "input[name=\"line1\"]"]),
                address2: css(&["#address2", "input[name=\"address2\"]", "input[name=\"line2\"]"]),
                city: css(&["#city", "input[name=\"city\"]"]),
                state: css(&["#state", "select[name=\"state\"]", "input[name=\"state\"]"]),
                zip: css(&["#zip", "input[name=\"zip\"]", "input[name=\"postalCode\"]"]),
                country: css(&["#country", "select[name=\"country\"]"]),
            },
            saved_payment: "input[type=\"radio\"][name=\"paymentMethod\"]".into(),
            alternative_payment: vec![
                button("PayPal"),
                Selector::css("[data-testid=\"apple-pay\"]"),
                Selector::css("[data-testid=\"google-pay\"]"),
            ],
            place_order: vec![
                button("Place Order"),
                button("Complete Purchase"),
                button("Complete Order"),
                Selector::css("[data-testid=\"complete-order\"]"),
                Selector::css("#complete-order"),
            ],
            order_number: css(&[".order-number", "[data-testid=\"order-number\"]", "#order-number"]),
            button_wait: Duration::from_secs(2),
            field_wait: Duration::from_secs(1),
            settle: Duration::from_secs(1),
            navigation_timeout: Duration::from_secs(30),
        }
    }

    /// Shopify online store themes and checkout
    pub fn shopify() -> Self {
        let generic = Self::generic();
        Self {
            name: "shopify".into(),
            host_suffixes: vec!["myshopify.com".into()],
            product_path: Some("/products/{product_id}".into()),
            checkout_path: Some("/checkout".into()),
            add_to_cart: vec![
                Selector::css("button[name=\"add\"]"),
                Selector::css("form[action*=\"/cart/add\"] button[type=\"submit\"]"),
                button("Add to cart"),
            ],
            quantity: css(&["input[name=\"quantity\"]"]),
            checkout: vec![
                Selector::css("button[name=\"checkout\"]"),
                Selector::css("a[href=\"/checkout\"]"),
                button("Check out"),
            ],
            fields: ShippingFields {
                email: css(&["#email", "input[name=\"email\"]"]),
                name: css(&["input[name=\"lastName\"]"]),
                address1: css(&["input[name=\"address1\"]"]),
                address2: css(&["input[name=\"address2\"]"]),
                city: css(&["input[name=\"city\"]"]),
                state: css(&["select[name=\"zone\"]"]),
                zip: css(&["input[name=\"postalCode\"]"]),
                country: css(&["select[name=\"countryCode\"]"]),
            },
            saved_payment: "input[type=\"radio\"][name=\"paymentMethod\"]".into(),
            alternative_payment: vec![
                Selector::css("[data-testid=\"ShopPayButton\"]"),
                button("PayPal"),
                Selector::css("[data-testid=\"apple-pay\"]"),
                Selector::css("[data-testid=\"google-pay\"]"),
            ],
            place_order: vec![Selector::css("#checkout-pay-button"), button("Pay now")],
            order_number: css(&[".os-order-number", "[data-order-number]"]),
            ..generic
        }
    }

    pub fn matches(&self, merchant: &Url) -> bool {
        if self.host_suffixes.is_empty() {
            return true;
        }
        merchant
            .host_str()
            .is_some_and(|host| self.host_suffixes.iter().any(|s| host.ends_with(s.as_str())))
    }
}

/// First visible element across an ordered selector list
async fn first_visible(
    page: &mut dyn BrowserPage,
    selectors: &[Selector],
    wait: Duration,
) -> BrowserResult<Option<ElementRef>> {
    for selector in selectors {
        if let Some(element) = page.find_visible(selector, wait).await? {
            tracing::debug!(selector = %selector, "Matched element");
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Checkout flow driven by a [`StorefrontProfile`]
pub struct ProfileStrategy {
    profile: StorefrontProfile,
}

impl ProfileStrategy {
    pub fn new(profile: StorefrontProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &StorefrontProfile {
        &self.profile
    }

    fn resolve(&self, job: &AutomationJob, path: &str, step: AutomationStep) -> Result<Url, StepFailure> {
        job.merchant_url
            .join(path)
            .map_err(|e| StepFailure::new(step, format!("bad storefront path '{}': {}", path, e)))
    }

    async fn add_item(
        &self,
        page: &mut dyn BrowserPage,
        job: &AutomationJob,
        item: &JobItem,
    ) -> Result<(), StepFailure> {
        let p = &self.profile;
        let step = AutomationStep::AddToCart;
        let at = StepFailure::at(step);

        if let Some(template) = &p.product_path {
            let url = self.resolve(job, &template.replace("{product_id}", &item.product_id), step)?;
            page.goto(url.as_str()).await.map_err(&at)?;
        }

        let mut clicks = 1;
        if item.quantity > 1 {
            match first_visible(page, &p.quantity, p.field_wait).await.map_err(&at)? {
                Some(field) => page.fill(&field, &item.quantity.to_string()).await.map_err(&at)?,
                None => clicks = item.quantity,
            }
        }

        let Some(add) = first_visible(page, &p.add_to_cart, p.button_wait).await.map_err(&at)? else {
            return Err(StepFailure::new(
                step,
                format!("Failed to add item {} to cart", item.product_id),
            ));
        };

        for _ in 0..clicks {
            page.click(&add).await.map_err(&at)?;
            tokio::time::sleep(p.settle).await;
        }

        tracing::debug!(product_id = %item.product_id, quantity = item.quantity, "Added item");
        Ok(())
    }

    async fn open_checkout(&self, page: &mut dyn BrowserPage, job: &AutomationJob) -> Result<(), StepFailure> {
        let p = &self.profile;
        let step = AutomationStep::OpenCheckout;
        let at = StepFailure::at(step);

        match first_visible(page, &p.checkout, p.button_wait).await.map_err(&at)? {
            Some(button) => {
                page.click(&button).await.map_err(&at)?;
                page.wait_for_load(p.navigation_timeout).await.map_err(&at)
            }
            None => match &p.checkout_path {
                Some(path) => {
                    let url = self.resolve(job, path, step)?;
                    page.goto(url.as_str()).await.map_err(&at)
                }
                None => Err(StepFailure::new(step, "Could not find checkout button")),
            },
        }
    }

    async fn fill_shipping(&self, page: &mut dyn BrowserPage, job: &AutomationJob) -> BrowserResult<()> {
        let f = &self.profile.fields;
        let address = job.shipping_address.as_ref();

        let values = [
            ("email", &f.email, Some(job.buyer_email.clone())),
            ("name", &f.name, job.buyer_name.clone()),
            ("address1", &f.address1, address.map(|a| a.line1.clone())),
            ("address2", &f.address2, address.and_then(|a| a.line2.clone())),
            ("city", &f.city, address.map(|a| a.city.clone())),
            ("state", &f.state, address.and_then(|a| a.state.clone())),
            ("zip", &f.zip, address.map(|a| a.postal_code.clone())),
            ("country", &f.country, address.map(|a| a.country.clone())),
        ];

        for (field, selectors, value) in values {
            let Some(value) = value else { continue };
            match first_visible(page, selectors, self.profile.field_wait).await? {
                Some(element) => page.fill(&element, &value).await?,
                None => tracing::warn!(field, "Checkout field not found"),
            }
        }
        Ok(())
    }

    /// `Some(reason)` when the shopper has to pick the payment method
    async fn select_payment(
        &self,
        page: &mut dyn BrowserPage,
        job: &AutomationJob,
    ) -> BrowserResult<Option<String>> {
        let p = &self.profile;

        if let Some(preferred) = &job.payment_method {
            let selector = Selector::css(format!(
                "{}[value=\"{}\"]",
                p.saved_payment,
                preferred.replace('"', "\\\"")
            ));
            if let Some(radio) = page.find_visible(&selector, p.field_wait).await? {
                page.click(&radio).await?;
                return Ok(None);
            }
        }

        let saved = Selector::css(p.saved_payment.clone());
        if page.count(&saved).await? > 0 {
            if let Some(radio) = page.find_visible(&saved, p.field_wait).await? {
                page.click(&radio).await?;
                return Ok(None);
            }
        }

        if first_visible(page, &p.alternative_payment, p.field_wait)
            .await?
            .is_some()
        {
            return Ok(Some("Alternative payment method requires user interaction".into()));
        }

        Ok(Some(
            "No automatable payment method found. User interaction required.".into(),
        ))
    }

    async fn place_order(&self, page: &mut dyn BrowserPage) -> Result<(), StepFailure> {
        let p = &self.profile;
        let at = StepFailure::at(AutomationStep::PlaceOrder);

        let Some(button) = first_visible(page, &p.place_order, p.button_wait).await.map_err(&at)? else {
            return Err(StepFailure::new(
                AutomationStep::PlaceOrder,
                "Could not find order completion button",
            ));
        };

        page.click(&button).await.map_err(&at)?;
        page.wait_for_load(p.navigation_timeout).await.map_err(&at)
    }

    async fn order_number(&self, page: &mut dyn BrowserPage) -> BrowserResult<Option<String>> {
        for selector in &self.profile.order_number {
            let Some(element) = page.find_visible(selector, Duration::ZERO).await? else {
                continue;
            };
            let text = page.text(&element).await?;
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(extract_order_number(text).unwrap_or_else(|| text.to_string())));
            }
        }

        Ok(extract_order_number(&page.page_text().await?))
    }
}

#[async_trait]
impl CheckoutAutomationStrategy for ProfileStrategy {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn matches(&self, merchant: &Url) -> bool {
        self.profile.matches(merchant)
    }

    async fn run(
        &self,
        page: &mut dyn BrowserPage,
        job: &AutomationJob,
    ) -> Result<AutomationOutcome, StepFailure> {
        page.goto(job.merchant_url.as_str())
            .await
            .map_err(StepFailure::at(AutomationStep::Navigate))?;

        for item in &job.items {
            self.add_item(page, job, item).await?;
        }

        self.open_checkout(page, job).await?;

        self.fill_shipping(page, job)
            .await
            .map_err(StepFailure::at(AutomationStep::FillShipping))?;

        if let Some(reason) = self
            .select_payment(page, job)
            .await
            .map_err(StepFailure::at(AutomationStep::SelectPayment))?
        {
            return Ok(AutomationOutcome::ManualInterventionRequired {
                step: AutomationStep::SelectPayment,
                reason,
            });
        }

        self.place_order(page).await?;

        let order_number = self
            .order_number(page)
            .await
            .map_err(StepFailure::at(AutomationStep::ConfirmOrder))?;

        Ok(AutomationOutcome::Completed { order_number })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{job, FakePage};
    use super::*;
    use agent_payments::model::Address;

    const ADD: &str = "button:has-text(\"Add to Cart\")";
    const CHECKOUT: &str = "a:has-text(\"Checkout\")";
    const SAVED: &str = "input[type=\"radio\"][name=\"paymentMethod\"]";
    const PLACE: &str = "button:has-text(\"Place Order\")";

    fn strategy(profile: StorefrontProfile) -> ProfileStrategy {
        ProfileStrategy::new(StorefrontProfile {
            settle: Duration::ZERO,
            ..profile
        })
    }

    fn checkout_page() -> FakePage {
        FakePage::default()
            .show(ADD)
            .show(CHECKOUT)
            .show("#email")
            .show("input[name=\"city\"]")
            .with_count(SAVED, 2)
            .show(PLACE)
    }

    #[test]
    fn test_extract_order_number() {
        assert_eq!(extract_order_number("Thanks! Order #A-1001 is on its way"), Some("A-1001".into()));
        assert_eq!(extract_order_number("Order Number: 98213"), Some("98213".into()));
        assert_eq!(extract_order_number("Confirmation #X7Y2"), Some("X7Y2".into()));
        assert_eq!(extract_order_number("Your order number is pending"), None);
        assert_eq!(extract_order_number("order #ab-12 placed"), Some("ab-12".into()));
        assert_eq!(extract_order_number("ORDER NO. 7k-3"), Some("7k-3".into()));
    }

    #[test]
    fn test_profile_matching() {
        let shopify = StorefrontProfile::shopify();
        assert!(shopify.matches(&Url::parse("https://acme.myshopify.com/").unwrap()));
        assert!(!shopify.matches(&Url::parse("https://acme.example.com/").unwrap()));
        assert!(StorefrontProfile::generic().matches(&Url::parse("http://localhost:8080").unwrap()));
    }

    #[tokio::test]
    async fn test_generic_flow_completes_with_scraped_order_number() {
        let mut page = checkout_page().with_page_text("Thank you! Order #LV-2041 confirmed.");
        let log = page.log.clone();
        let mut job = job("https://shop.example.com/");
        job.shipping_address = Some(Address {
            line1: "1 Analytical Way".into(),
            line2: None,
            city: "London".into(),
            state: None,
            postal_code: "N1 9GU".into(),
            country: "GB".into(),
        });

        let outcome = strategy(StorefrontProfile::generic())
            .run(&mut page, &job)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AutomationOutcome::Completed {
                order_number: Some("LV-2041".into())
            }
        );
        let log = log.lock().unwrap();
        assert_eq!(log.visited, vec!["https://shop.example.com/"]);
        assert_eq!(log.clicked, vec![ADD, CHECKOUT, SAVED, PLACE]);
        assert!(log.filled.contains(&("#email".into(), "ada@example.com".into())));
        assert!(log.filled.contains(&("input[name=\"city\"]".into(), "London".into())));
    }

    #[tokio::test]
    async fn test_order_number_element_wins_over_page_text() {
        let mut page = checkout_page()
            .with_text(".order-number", "  Order #Z-9  ")
            .with_page_text("Order #IGNORED");

        let outcome = strategy(StorefrontProfile::generic())
            .run(&mut page, &job("https://shop.example.com/"))
            .await
            .unwrap();

        assert_eq!(outcome.order_number(), Some("Z-9"));
    }

    #[tokio::test]
    async fn test_wallet_only_checkout_needs_the_shopper() {
        let mut page = FakePage::default()
            .show(ADD)
            .show(CHECKOUT)
            .show("button:has-text(\"PayPal\")")
            .show(PLACE);
        let log = page.log.clone();

        let outcome = strategy(StorefrontProfile::generic())
            .run(&mut page, &job("https://shop.example.com/"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AutomationOutcome::ManualInterventionRequired {
                step: AutomationStep::SelectPayment,
                reason: "Alternative payment method requires user interaction".into(),
            }
        );
        assert!(!log.lock().unwrap().clicked.contains(&PLACE.to_string()));
    }

    #[tokio::test]
    async fn test_no_payment_method_at_all() {
        let mut page = FakePage::default().show(ADD).show(CHECKOUT);

        let outcome = strategy(StorefrontProfile::generic())
            .run(&mut page, &job("https://shop.example.com/"))
            .await
            .unwrap();

        assert_eq!(
            outcome.error_message(),
            Some("No automatable payment method found. User interaction required.")
        );
    }

    #[tokio::test]
    async fn test_missing_place_order_button_fails() {
        let mut page = FakePage::default().show(ADD).show(CHECKOUT).with_count(SAVED, 1);

        let failure = strategy(StorefrontProfile::generic())
            .run(&mut page, &job("https://shop.example.com/"))
            .await
            .unwrap_err();

        assert_eq!(
            failure,
            StepFailure::new(AutomationStep::PlaceOrder, "Could not find order completion button")
        );
    }

    #[tokio::test]
    async fn test_shopify_visits_product_pages_and_falls_back_to_checkout_path() {
        let mut page = FakePage::default()
            .show("button[name=\"add\"]")
            .show("input[name=\"quantity\"]")
            .with_count(SAVED, 1)
            .show("#checkout-pay-button")
            .with_text(".os-order-number", "Order #1043");
        let log = page.log.clone();
        let mut job = job("https://acme.myshopify.com/");
        job.items[0].quantity = 3;

        let outcome = strategy(StorefrontProfile::shopify())
            .run(&mut page, &job)
            .await
            .unwrap();

        assert_eq!(outcome.order_number(), Some("1043"));
        let log = log.lock().unwrap();
        assert_eq!(
            log.visited,
            vec![
                "https://acme.myshopify.com/",
                "https://acme.myshopify.com/products/prod_tee",
                "https://acme.myshopify.com/checkout",
            ]
        );
        assert!(log.filled.contains(&("input[name=\"quantity\"]".into(), "3".into())));
    }
}
