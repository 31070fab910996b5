//! Headless-browser session pool with anti-automation countermeasures.
//!
//! A single Chromium process is shared by all clones of the pool; a
//! bounded channel of session slots caps concurrent renders at
//! `pool_size` with FIFO acquisition. Each fetch opens a fresh tab,
//! applies a rotating user agent, a stealth prelude and the resource
//! blocklist, grabs the rendered DOM and closes the tab — so a poisoned
//! session never outlives its check.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, ResourceType, SetBlockedUrLsParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};

use vigil_core::config::BrowserConfig as PoolConfig;
use vigil_core::error::AppError;
use vigil_core::traits::{FetchOutcome, Fetcher};

/// Fixed prelude that hides the usual automation fingerprints before any
/// site script runs.
const STEALTH_PRELUDE: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }
"#;

/// A pooled render slot; only its existence matters.
struct Slot;

/// Bounded pool of headless-browser sessions implementing [`Fetcher`].
#[derive(Clone)]
pub struct BrowserPool {
    browser: Arc<Browser>,
    slots_rx: Arc<Mutex<mpsc::Receiver<Slot>>>,
    slots_tx: mpsc::Sender<Slot>,
    config: PoolConfig,
    ua_cursor: Arc<AtomicUsize>,
}

impl BrowserPool {
    /// Launch a headless Chromium and fill the pool with `pool_size`
    /// session slots.
    pub async fn launch(config: PoolConfig) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let browser_config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::RenderError(format!("failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection
        // to stay alive.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        let size = config.pool_size.max(1);
        let (slots_tx, slots_rx) = mpsc::channel(size);
        for _ in 0..size {
            let _ = slots_tx.try_send(Slot);
        }

        Ok(Self {
            browser: Arc::new(browser),
            slots_rx: Arc::new(Mutex::new(slots_rx)),
            slots_tx,
            config,
            ua_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Block until a session slot is free. FIFO across waiters.
    async fn acquire(&self) -> Result<Slot, AppError> {
        let mut rx = self.slots_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| AppError::RenderError("browser pool closed".into()))
    }

    fn release(&self, slot: Slot) {
        // Capacity equals the slot count, so this never fails while the
        // pool is alive.
        let _ = self.slots_tx.try_send(slot);
    }

    fn next_user_agent(&self) -> Option<&str> {
        if self.config.user_agents.is_empty() {
            return None;
        }
        let n = self.ua_cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.config.user_agents[n % self.config.user_agents.len()].as_str())
    }

    async fn render(&self, url: &str) -> Result<(String, u16, String), AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::RenderError(format!("failed to open tab: {e}")))?;

        let result = self.render_on(&page, url).await;

        // Dispose of the tab in every path; a poisoned session must not
        // leak back into the pool.
        let _ = page.close().await;
        result
    }

    async fn render_on(&self, page: &Page, url: &str) -> Result<(String, u16, String), AppError> {
        if let Some(ua) = self.next_user_agent() {
            page.set_user_agent(ua)
                .await
                .map_err(|e| AppError::RenderError(format!("set_user_agent: {e}")))?;
        }

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_PRELUDE.to_string(),
        ))
        .await
        .map_err(|e| AppError::RenderError(format!("stealth prelude: {e}")))?;

        let blocked = blocked_url_patterns(&self.config.blocked_resource_types);
        if !blocked.is_empty() {
            page.execute(SetBlockedUrLsParams::new(blocked))
                .await
                .map_err(|e| AppError::RenderError(format!("resource blocklist: {e}")))?;
        }

        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| AppError::RenderError(format!("response listener: {e}")))?;

        page.goto(url)
            .await
            .map_err(|e| classify_navigation_error(&e.to_string(), url))?;

        // <body> present is the minimal signal that the page rendered
        // its main content.
        page.find_element("body")
            .await
            .map_err(|e| AppError::RenderError(format!("page did not render body: {e}")))?;

        let http_status = document_status(&mut responses).await.unwrap_or(200);

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        let html = page
            .content()
            .await
            .map_err(|e| AppError::RenderError(format!("failed to read page content: {e}")))?;

        Ok((html, http_status, final_url))
    }
}

impl Fetcher for BrowserPool {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, AppError> {
        let slot = self.acquire().await?;
        let started = Instant::now();

        let timeout = self.config.navigation_timeout();
        let result = tokio::time::timeout(timeout, self.render(url)).await;
        self.release(slot);

        match result {
            Ok(Ok((raw_html, http_status, final_url))) => Ok(FetchOutcome {
                raw_html,
                http_status,
                final_url,
                elapsed: started.elapsed(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }
}

/// Drain the response events briefly looking for the main document's
/// status code.
async fn document_status(
    responses: &mut (impl futures::Stream<Item = Arc<EventResponseReceived>> + Unpin),
) -> Option<u16> {
    let deadline = Duration::from_millis(500);
    let drain = async {
        while let Some(event) = responses.next().await {
            if event.r#type == ResourceType::Document {
                return Some(event.response.status as u16);
            }
        }
        None
    };
    tokio::time::timeout(deadline, drain).await.ok().flatten()
}

/// Map blocked resource types onto CDP URL patterns.
fn blocked_url_patterns(types: &[String]) -> Vec<String> {
    let mut patterns = Vec::new();
    for kind in types {
        let extensions: &[&str] = match kind.as_str() {
            "image" => &["png", "jpg", "jpeg", "gif", "webp", "ico"],
            "media" => &["mp4", "webm", "mp3", "wav", "avi", "mov"],
            "font" => &["woff", "woff2", "ttf", "otf", "eot"],
            _ => &[],
        };
        patterns.extend(extensions.iter().map(|ext| format!("*.{ext}")));
    }
    patterns
}

/// Navigation failures are typed so the scheduler can tell transient
/// network trouble from render problems.
fn classify_navigation_error(message: &str, url: &str) -> AppError {
    let lower = message.to_lowercase();
    if lower.contains("err_name_not_resolved") || lower.contains("dns") {
        AppError::TransientFetch(format!("DNS resolution failed for {url}: {message}"))
    } else if lower.contains("err_cert") || lower.contains("ssl") || lower.contains("tls") {
        AppError::TransientFetch(format!("TLS failure for {url}: {message}"))
    } else if lower.contains("err_connection") || lower.contains("refused") || lower.contains("reset")
    {
        AppError::TransientFetch(format!("connection failed for {url}: {message}"))
    } else if lower.contains("timeout") || lower.contains("timed out") {
        AppError::Timeout(30)
    } else {
        AppError::RenderError(format!("navigation failed for {url}: {message}"))
    }
}

/// Locate the real Chrome/Chromium binary; snap wrappers strip the CLI
/// flags headless mode needs.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_patterns_cover_configured_types() {
        let patterns = blocked_url_patterns(&["image".into(), "font".into()]);
        assert!(patterns.contains(&"*.png".to_string()));
        assert!(patterns.contains(&"*.woff2".to_string()));
        assert!(!patterns.contains(&"*.mp4".to_string()));
    }

    #[test]
    fn unknown_resource_types_are_ignored() {
        assert!(blocked_url_patterns(&["stylesheet".into()]).is_empty());
        assert!(blocked_url_patterns(&[]).is_empty());
    }

    #[test]
    fn navigation_errors_are_typed() {
        assert!(matches!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED", "http://x"),
            AppError::TransientFetch(_)
        ));
        assert!(matches!(
            classify_navigation_error("net::ERR_CERT_AUTHORITY_INVALID", "http://x"),
            AppError::TransientFetch(_)
        ));
        assert!(matches!(
            classify_navigation_error("net::ERR_CONNECTION_REFUSED", "http://x"),
            AppError::TransientFetch(_)
        ));
        assert!(matches!(
            classify_navigation_error("navigation timed out", "http://x"),
            AppError::Timeout(_)
        ));
        assert!(matches!(
            classify_navigation_error("something exploded", "http://x"),
            AppError::RenderError(_)
        ));
    }
}
