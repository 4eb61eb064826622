//! Full render: headless Chrome navigation and DOM capture.
//!
//! A [`Renderer`] opens a [`RenderSession`] (one browser process) that
//! renders pages one tab at a time until closed. Deadlines are applied by
//! the caller around [`RenderSession::render`]; see [`render_full_html`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, BrowserConfigBuilder};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::RenderError;

/// Factory for browser sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// A live browser context.
///
/// `close` must be called on every exit path; dropping a session without
/// closing still stops its event loop, but skips the graceful shutdown.
#[async_trait]
pub trait RenderSession: Send {
    /// Navigate to `url`, wait for `body`, let scripts settle, and return
    /// the document's outer HTML.
    async fn render(&mut self, url: &str) -> Result<String, RenderError>;

    /// Shut the browser down. Calling it twice is a no-op.
    async fn close(&mut self);
}

/// Render one page under `deadline`, mapping expiry to [`RenderError::Timeout`].
pub async fn render_before(
    session: &mut dyn RenderSession,
    url: &str,
    deadline: Instant,
    budget: Duration,
) -> Result<String, RenderError> {
    match tokio::time::timeout_at(deadline, session.render(url)).await {
        Ok(result) => result,
        Err(_) => Err(RenderError::Timeout(budget)),
    }
}

/// Open a session, render a single URL within `timeout`, and close it.
pub async fn render_full_html(
    renderer: &dyn Renderer,
    url: &str,
    timeout: Duration,
) -> Result<String, RenderError> {
    let deadline = Instant::now() + timeout;
    let mut session = match tokio::time::timeout_at(deadline, renderer.open()).await {
        Ok(opened) => opened?,
        Err(_) => return Err(RenderError::Timeout(timeout)),
    };
    let result = render_before(session.as_mut(), url, deadline, timeout).await;
    session.close().await;
    result
}

/// Locate a Chrome or Chromium binary. `CHROMIUM_PATH` takes precedence.
pub fn find_browser_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a missing file");
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
        ]
    };

    candidates
        .iter()
        .map(|p| PathBuf::from(*p))
        .find(|p| p.exists())
}

/// Headless Chrome via the DevTools protocol.
pub struct ChromeRenderer {
    user_agent: String,
    settle: Duration,
    executable: Option<PathBuf>,
}

impl ChromeRenderer {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            settle: config.render_settle(),
            executable: config.chrome_executable.clone(),
        }
    }

    fn browser_config(&self, user_data_dir: PathBuf) -> Result<BrowserConfig, RenderError> {
        let executable = self
            .executable
            .clone()
            .or_else(find_browser_executable)
            .ok_or_else(|| {
                RenderError::Launch(
                    "no Chrome or Chromium found; set ingest.chrome_executable or CHROMIUM_PATH"
                        .to_string(),
                )
            })?;

        BrowserConfigBuilder::default()
            .chrome_executable(executable)
            .user_data_dir(user_data_dir)
            .request_timeout(Duration::from_secs(30))
            .window_size(1366, 900)
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-notifications")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .build()
            .map_err(RenderError::Launch)
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        let user_data_dir = std::env::temp_dir().join(format!(
            "linkwell_chrome_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| RenderError::Launch(format!("user data dir: {e}")))?;

        let config = self.browser_config(user_data_dir.clone())?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        info!("browser session opened");
        Ok(Box::new(ChromeSession {
            inner: Some(BrowserHandle {
                browser,
                handler,
                user_data_dir,
            }),
            settle: self.settle,
        }))
    }
}

/// Browser plus its event loop. Dropping aborts the loop and removes the
/// profile directory.
struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!(path = %self.user_data_dir.display(), error = %e, "profile cleanup failed");
        }
    }
}

struct ChromeSession {
    inner: Option<BrowserHandle>,
    settle: Duration,
}

impl ChromeSession {
    async fn capture(&self, page: &Page, url: &str) -> Result<String, RenderError> {
        page.goto(url)
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        while page.find_element("body").await.is_err() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(self.settle).await;

        page.content()
            .await
            .map_err(|e| RenderError::Capture(e.to_string()))
    }
}

#[async_trait]
impl RenderSession for ChromeSession {
    async fn render(&mut self, url: &str) -> Result<String, RenderError> {
        let handle = self
            .inner
            .as_ref()
            .ok_or_else(|| RenderError::Capture("session already closed".to_string()))?;

        let page = handle
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let result = self.capture(&page, url).await;
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "failed to close tab");
        }
        result
    }

    async fn close(&mut self) {
        if let Some(mut handle) = self.inner.take() {
            if let Err(e) = handle.browser.close().await {
                warn!(error = %e, "failed to close browser cleanly");
            }
            if let Err(e) = handle.browser.wait().await {
                warn!(error = %e, "failed to wait for browser exit");
            }
            info!("browser session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowSession {
        delay: Duration,
        closed: bool,
    }

    #[async_trait]
    impl RenderSession for SlowSession {
        async fn render(&mut self, url: &str) -> Result<String, RenderError> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("<p>{url}</p>"))
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_before_deadline_succeeds() {
        let mut session = SlowSession {
            delay: Duration::from_secs(1),
            closed: false,
        };
        let budget = Duration::from_secs(5);
        let html = render_before(&mut session, "u", Instant::now() + budget, budget)
            .await
            .unwrap();
        assert_eq!(html, "<p>u</p>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_past_deadline_is_timeout() {
        let mut session = SlowSession {
            delay: Duration::from_secs(10),
            closed: false,
        };
        let budget = Duration::from_secs(2);
        let err = render_before(&mut session, "u", Instant::now() + budget, budget)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(d) if d == budget));
        session.close().await;
        assert!(session.closed);
    }
}
