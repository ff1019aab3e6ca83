use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{AddScriptToEvaluateOnNewDocumentParams, EventFrameNavigated};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::instrument;

use crate::models::Viewport;

/// Manages the lifecycle of the one Chrome instance a recording session
/// drives, and the tabs opened within it.
pub struct BrowserManager {
    browser: Arc<Mutex<Option<Browser>>>,
    pages: Arc<Mutex<Vec<Page>>>,
    active_tab: Arc<Mutex<usize>>,
    launch_lock: tokio::sync::Mutex<()>,
    headless: Arc<Mutex<bool>>,
}

impl BrowserManager {
    pub fn new() -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            pages: Arc::new(Mutex::new(Vec::new())),
            active_tab: Arc::new(Mutex::new(0)),
            launch_lock: tokio::sync::Mutex::new(()),
            headless: Arc::new(Mutex::new(false)),
        }
    }

    /// Launch browser with full options. Uses the SINGLE default page that
    /// Chrome creates - no extra windows. Caller should `navigate()` after
    /// setup so script injection can be wired up before the target page loads.
    #[instrument(skip(self), fields(headless = headless))]
    pub async fn launch_with_options(&self, headless: bool, viewport: Option<Viewport>) -> Result<()> {
        let _launch_guard = self.launch_lock.lock().await;

        self.close().await.ok();

        let viewport = viewport.unwrap_or(Viewport {
            width: 1280,
            height: 720,
        });

        // disable_default_args() + manual re-add, minus --enable-automation,
        // removes the "Chrome is being controlled" banner.
        let mut config = BrowserConfig::builder().disable_default_args();

        if headless {
            config = config.window_size(viewport.width as u32, viewport.height as u32);
        } else {
            config = config.with_head().arg("--start-maximized");
        }

        config = config
            .arg("--disable-background-networking")
            .arg("--enable-features=NetworkService,NetworkServiceInProcess")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-breakpad")
            .arg("--disable-client-side-phishing-detection")
            .arg("--disable-component-extensions-with-background-pages")
            .arg("--disable-default-apps")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-features=TranslateUI")
            .arg("--disable-hang-monitor")
            .arg("--disable-ipc-flooding-protection")
            .arg("--disable-popup-blocking")
            .arg("--disable-prompt-on-repost")
            .arg("--disable-renderer-backgrounding")
            .arg("--disable-sync")
            .arg("--force-color-profile=srgb")
            .arg("--metrics-recording-only")
            .arg("--no-first-run")
            .arg("--password-store=basic")
            .arg("--use-mock-keychain")
            .arg("--lang=en_US")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions");

        let config = config.build().map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = timeout(Duration::from_secs(30), Browser::launch(config))
            .await
            .map_err(|_| anyhow!("Browser launch timeout (30s) - Chrome may not be installed or is unresponsive"))?
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        let page = match browser.pages().await {
            Ok(pages) if !pages.is_empty() => {
                tracing::debug!("Using existing browser page");
                pages.into_iter().next().unwrap()
            }
            _ => {
                tracing::debug!("Creating new browser page");
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| anyhow!("Failed to create new page: {}", e))?
            }
        };

        if headless {
            let emulation_params = chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
                .width(viewport.width as i64)
                .height(viewport.height as i64)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(|e| anyhow!("Failed to build viewport params: {}", e))?;

            page.execute(emulation_params)
                .await
                .map_err(|e| anyhow!("Failed to set viewport: {}", e))?;
        } else {
            use chromiumoxide::cdp::browser_protocol::emulation::ClearDeviceMetricsOverrideParams;
            page.execute(ClearDeviceMetricsOverrideParams::default()).await.ok();
        }

        *self.browser.lock().await = Some(browser);
        *self.headless.lock().await = headless;
        let mut pages = self.pages.lock().await;
        pages.clear();
        pages.push(page);
        *self.active_tab.lock().await = 0;

        tracing::info!("Browser launched (single window, headless={})", headless);
        Ok(())
    }

    async fn get_active_page(&self) -> Result<Page> {
        let pages = self.pages.lock().await;
        let active = *self.active_tab.lock().await;
        pages
            .get(active)
            .cloned()
            .ok_or_else(|| anyhow!("No active tab (index {} of {} tabs)", active, pages.len()))
    }

    async fn page_at(&self, index: usize) -> Result<Page> {
        let pages = self.pages.lock().await;
        pages.get(index).cloned().ok_or_else(|| anyhow!("Tab index {} out of range", index))
    }

    /// Open a new tab and switch to it — backs the `openTab`/`switchTab` Step pair.
    pub async fn new_tab(&self, url: &str) -> Result<usize> {
        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().ok_or_else(|| anyhow!("No browser running"))?;

        let page = browser.new_page(url).await.map_err(|e| anyhow!("Failed to create new tab: {}", e))?;

        let is_headless = *self.headless.lock().await;
        if !is_headless {
            use chromiumoxide::cdp::browser_protocol::emulation::ClearDeviceMetricsOverrideParams;
            page.execute(ClearDeviceMetricsOverrideParams::default()).await.ok();
        }

        let mut pages = self.pages.lock().await;
        pages.push(page);
        let tab_index = pages.len() - 1;
        drop(pages);

        *self.active_tab.lock().await = tab_index;
        tracing::info!("Opened new tab {} at {}", tab_index, url);
        Ok(tab_index)
    }

    pub async fn switch_tab(&self, index: usize) -> Result<()> {
        let pages = self.pages.lock().await;
        if index >= pages.len() {
            return Err(anyhow!("Tab index {} out of range (have {} tabs)", index, pages.len()));
        }
        drop(pages);

        *self.active_tab.lock().await = index;
        tracing::info!("Switched to tab {}", index);
        Ok(())
    }

    pub async fn close_tab(&self, index: usize) -> Result<()> {
        let mut pages = self.pages.lock().await;
        if index >= pages.len() {
            return Err(anyhow!("Tab index {} out of range", index));
        }
        if pages.len() == 1 {
            return Err(anyhow!("Cannot close last tab"));
        }

        let page = pages.remove(index);
        let _ = page.close().await;

        let mut active = self.active_tab.lock().await;
        if *active >= pages.len() {
            *active = pages.len() - 1;
        }

        tracing::info!("Closed tab {}, active is now {}", index, *active);
        Ok(())
    }

    pub async fn list_tabs(&self) -> Result<Vec<(usize, String)>> {
        let pages = self.pages.lock().await;
        let mut tabs = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            let url = page.url().await.map_err(|e| anyhow!("Failed to get URL for tab {}: {}", i, e))?.unwrap_or_default();
            tabs.push((i, url));
        }
        Ok(tabs)
    }

    pub async fn active_tab_index(&self) -> usize {
        *self.active_tab.lock().await
    }

    pub async fn current_url(&self) -> Result<String> {
        let page = self.get_active_page().await?;
        page.url().await.map_err(|e| anyhow!("Failed to get URL: {}", e))?.ok_or_else(|| anyhow!("URL is None"))
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.get_active_page().await.context("Failed to get active page for navigation")?;
        page.goto(url).await.with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    /// Execute JavaScript on the active tab and return the result.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.get_active_page().await?;
        let result = page.evaluate(script).await.map_err(|e| anyhow!("Failed to evaluate script: {}", e))?;
        result.into_value().map_err(|e| anyhow!("Failed to parse script result: {}", e))
    }

    /// Call `window.__rrControl(json)` on a specific tab and await its
    /// resolved JSON reply. Used for the Start/Pause/Resume/Stop handshake
    /// (spec.md §6) — the control message is awaited synchronously rather
    /// than round-tripping through the CDP binding.
    pub async fn call_control(&self, tab_index: usize, message_json: &str) -> Result<String> {
        let page = self.page_at(tab_index).await?;
        let arg = serde_json::to_string(message_json).map_err(|e| anyhow!("Failed to encode control message: {}", e))?;
        let script = format!("window.__rrControl({})", arg);
        let result = page.evaluate(script).await.map_err(|e| anyhow!("control call failed: {}", e))?;
        result.into_value::<String>().map_err(|e| anyhow!("Failed to parse control reply: {}", e))
    }

    /// Set up a CDP binding for instant event capture (no polling).
    pub async fn setup_event_binding(&self, binding_name: &str) -> Result<EventStream<EventBindingCalled>> {
        let page = self.get_active_page().await?;

        page.execute(AddBindingParams::new(binding_name))
            .await
            .map_err(|e| anyhow!("Failed to add binding '{}': {}", binding_name, e))?;

        let event_stream = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| anyhow!("Failed to create event listener: {}", e))?;

        tracing::debug!("CDP binding '{}' set up for instant event capture", binding_name);
        Ok(event_stream)
    }

    /// Listen for page navigation events — feeds the incidental
    /// `after.waitForNavigation` enrichment (spec.md §4.3.5).
    pub async fn setup_navigation_listener(&self) -> Result<EventStream<EventFrameNavigated>> {
        let page = self.get_active_page().await?;
        let event_stream = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| anyhow!("Failed to create navigation listener: {}", e))?;
        tracing::debug!("Navigation event listener set up");
        Ok(event_stream)
    }

    /// Add a script to run on every new document — persists across
    /// navigations and applies to all frames, which is how the content
    /// recorder survives the page it's recording navigating away.
    pub async fn add_script_on_new_document(&self, script: &str) -> Result<()> {
        let page = self.get_active_page().await?;
        let params = AddScriptToEvaluateOnNewDocumentParams::new(script.to_string());
        page.execute(params).await.map_err(|e| anyhow!("Failed to add script to evaluate on new document: {}", e))?;
        tracing::debug!("Added script to evaluate on every new document");
        Ok(())
    }

    pub async fn bring_to_front(&self) -> Result<()> {
        let page = self.get_active_page().await?;
        page.bring_to_front().await.map_err(|e| anyhow!("Failed to bring browser to front: {}", e))?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let mut pages = self.pages.lock().await;
        let mut browser_guard = self.browser.lock().await;

        for page in pages.drain(..) {
            let _ = page.close().await;
        }

        if let Some(mut browser) = browser_guard.take() {
            let _ = browser.close().await;
        }

        *self.active_tab.lock().await = 0;
        tracing::info!("Browser closed");
        Ok(())
    }

    pub async fn page(&self) -> Option<Page> {
        self.get_active_page().await.ok()
    }
}

impl Default for BrowserManager {
    fn default() -> Self {
        Self::new()
    }
}
