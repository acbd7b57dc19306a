//! W3C WebDriver page driver
//!
//! Speaks the WebDriver wire protocol to chromedriver, geckodriver or a
//! Selenium grid. One WebDriver session backs one [`BrowserPage`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{BrowserConfig, BrowserError, BrowserLauncher, BrowserPage, BrowserResult, ElementRef, Selector};

/// Key of the element reference object in WebDriver responses
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

/// Starts one WebDriver session per page
pub struct WebDriverLauncher {
    http: reqwest::Client,
    endpoint: String,
    headless: bool,
    page_load: Duration,
}

impl WebDriverLauncher {
    pub fn new(config: &BrowserConfig) -> BrowserResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| BrowserError::Http(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.webdriver_url.trim_end_matches('/').to_string(),
            headless: config.headless,
            page_load: config.timeout,
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage", "--window-size=1280,720"];
        if self.headless {
            args.insert(0, "--headless=new");
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": {
                        "pageLoad": self.page_load.as_millis() as u64,
                        "script": 30_000,
                        "implicit": 0
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn open_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let url = format!("{}/session", self.endpoint);
        let response = self.http.post(&url).json(&self.capabilities()).send().await?;
        let session: NewSession = decode(response).await?;

        tracing::debug!(session_id = %session.session_id, "WebDriver session started");

        Ok(Box::new(WebDriverPage {
            http: self.http.clone(),
            session_url: format!("{}/session/{}", self.endpoint, session.session_id),
            session_id: session.session_id,
            closed: false,
        }))
    }
}

pub struct WebDriverPage {
    http: reqwest::Client,
    session_url: String,
    session_id: String,
    closed: bool,
}

impl WebDriverPage {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> BrowserResult<T> {
        let url = format!("{}{}", self.session_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode(request.send().await?).await
    }

    async fn elements(&self, selector: &Selector) -> BrowserResult<Vec<ElementRef>> {
        let (using, value) = selector.locator();
        let found: Vec<HashMap<String, String>> = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;

        found
            .into_iter()
            .map(|mut reference| {
                reference
                    .remove(ELEMENT_KEY)
                    .map(ElementRef)
                    .ok_or_else(|| BrowserError::Protocol("element reference without id".into()))
            })
            .collect()
    }

    async fn is_displayed(&self, element: &ElementRef) -> BrowserResult<bool> {
        self.command(Method::GET, &format!("/element/{}/displayed", element.0), None)
            .await
    }

    async fn execute<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        // Blocks until the page load strategy is satisfied
        let _: Value = self
            .command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_visible(
        &mut self,
        selector: &Selector,
        wait: Duration,
    ) -> BrowserResult<Option<ElementRef>> {
        let deadline = Instant::now() + wait;
        loop {
            for element in self.elements(selector).await? {
                if self.is_displayed(&element).await? {
                    return Ok(Some(element));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&mut self, selector: &Selector) -> BrowserResult<usize> {
        Ok(self.elements(selector).await?.len())
    }

    async fn click(&mut self, element: &ElementRef) -> BrowserResult<()> {
        let _: Value = self
            .command(Method::POST, &format!("/element/{}/click", element.0), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn fill(&mut self, element: &ElementRef, value: &str) -> BrowserResult<()> {
        let tag: String = self
            .command(Method::GET, &format!("/element/{}/name", element.0), None)
            .await?;

        // Selects pick the option by typed text and cannot be cleared
        if !tag.eq_ignore_ascii_case("select") {
            let _: Value = self
                .command(Method::POST, &format!("/element/{}/clear", element.0), Some(json!({})))
                .await?;
        }

        let _: Value = self
            .command(
                Method::POST,
                &format!("/element/{}/value", element.0),
                Some(json!({ "text": value })),
            )
            .await?;
        Ok(())
    }

    async fn text(&mut self, element: &ElementRef) -> BrowserResult<String> {
        self.command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await
    }

    async fn page_text(&mut self) -> BrowserResult<String> {
        let text: Option<String> = self
            .execute("return document.body ? document.body.innerText : '';")
            .await?;
        Ok(text.unwrap_or_default())
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state: String = self.execute("return document.readyState;").await?;
            if state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "page load (readyState {})",
                    state
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        let encoded: String = self.command(Method::GET, "/screenshot", None).await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if self.closed {
            return Ok(());
        }
        let url = self.session_url.clone();
        let response = self.http.delete(&url).send().await?;
        let _: Value = decode(response).await?;
        self.closed = true;

        tracing::debug!(session_id = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

/// Unwrap the `value` envelope; error objects become [`BrowserError::Driver`]
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> BrowserResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<Envelope<WireError>>(&body) {
            Ok(envelope) => BrowserError::Driver {
                error: envelope.value.error,
                message: envelope.value.message,
            },
            Err(_) => BrowserError::Http(format!("HTTP {}: {}", status.as_u16(), body)),
        });
    }

    serde_json::from_str::<Envelope<T>>(&body)
        .map(|envelope| envelope.value)
        .map_err(|e| BrowserError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn launcher(server: &MockServer) -> WebDriverLauncher {
        WebDriverLauncher::new(&BrowserConfig {
            webdriver_url: server.base_url(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    async fn mock_session(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/session")
                    .json_body_partial(r#"{"capabilities": {"alwaysMatch": {"browserName": "chrome"}}}"#);
                then.status(200)
                    .json_body(json!({"value": {"sessionId": "s1", "capabilities": {}}}));
            })
            .await;
    }

    #[test]
    fn test_headless_capabilities() {
        let caps = WebDriverLauncher::new(&BrowserConfig::default())
            .unwrap()
            .capabilities();
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["goog:chromeOptions"]["args"][0], "--headless=new");
        assert_eq!(always["timeouts"]["pageLoad"], 60_000);
    }

    #[tokio::test]
    async fn test_find_visible_skips_hidden_elements() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/elements").json_body(json!({
                    "using": "xpath",
                    "value": "//button[contains(normalize-space(.), \"Add to Cart\")]"
                }));
                then.status(200).json_body(json!({"value": [
                    {ELEMENT_KEY: "hidden"},
                    {ELEMENT_KEY: "shown"}
                ]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/s1/element/hidden/displayed");
                then.status(200).json_body(json!({"value": false}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/s1/element/shown/displayed");
                then.status(200).json_body(json!({"value": true}));
            })
            .await;
        let click = server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/element/shown/click");
                then.status(200).json_body(json!({"value": null}));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/session/s1");
                then.status(200).json_body(json!({"value": null}));
            })
            .await;

        let mut page = launcher(&server).open_page().await.unwrap();
        let element = page
            .find_visible(&Selector::text("button", "Add to Cart"), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(element, ElementRef("shown".into()));

        page.click(&element).await.unwrap();
        page.close().await.unwrap();
        page.close().await.unwrap();

        click.assert_async().await;
        delete.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_fill_select_does_not_clear() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/s1/element/e1/name");
                then.status(200).json_body(json!({"value": "select"}));
            })
            .await;
        let clear = server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/element/e1/clear");
                then.status(200).json_body(json!({"value": null}));
            })
            .await;
        let value = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/session/s1/element/e1/value")
                    .json_body(json!({"text": "GB"}));
                then.status(200).json_body(json!({"value": null}));
            })
            .await;

        let mut page = launcher(&server).open_page().await.unwrap();
        page.fill(&ElementRef("e1".into()), "GB").await.unwrap();

        value.assert_async().await;
        clear.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_screenshot_is_decoded() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/session/s1/screenshot");
                then.status(200).json_body(json!({"value": "iVBORw=="}));
            })
            .await;

        let mut page = launcher(&server).open_page().await.unwrap();
        let png = page.screenshot().await.unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_driver_error_is_surfaced() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/session/s1/url");
                then.status(500).json_body(json!({"value": {
                    "error": "unknown error",
                    "message": "net::ERR_NAME_NOT_RESOLVED"
                }}));
            })
            .await;

        let mut page = launcher(&server).open_page().await.unwrap();
        let err = page.goto("https://nowhere.invalid").await.unwrap_err();
        assert!(matches!(
            err,
            BrowserError::Driver { ref error, ref message }
                if error == "unknown error" && message.contains("ERR_NAME_NOT_RESOLVED")
        ));
    }

    #[tokio::test]
    async fn test_wait_for_load_polls_ready_state() {
        let server = MockServer::start_async().await;
        mock_session(&server).await;
        let ready = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/session/s1/execute/sync")
                    .json_body_partial(r#"{"script": "return document.readyState;"}"#);
                then.status(200).json_body(json!({"value": "complete"}));
            })
            .await;

        let mut page = launcher(&server).open_page().await.unwrap();
        page.wait_for_load(Duration::from_secs(1)).await.unwrap();
        ready.assert_hits_async(1).await;
    }
}
