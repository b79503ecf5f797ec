use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Viewport used for the portal session. Wide enough that the report
/// criteria panel and the Stimulsoft toolbar render in desktop layout.
const VIEWPORT: (u32, u32) = (1400, 900);

/// A headless Chromium session plus the spawned CDP event pump.
///
/// PDF generation requires headless mode; a headed Chrome refuses
/// `Page.printToPDF`.
pub struct BrowserSession {
    pub browser: Browser,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch a headless browser and start draining its CDP event stream.
    pub async fn launch() -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            anyhow!(
                "no Chromium-based browser found; install Chrome/Chromium \
                 or point the CHROME env var at the binary"
            )
        })?;

        info!(
            "Launching headless {} @ {}x{}",
            exe.display(),
            VIEWPORT.0,
            VIEWPORT.1
        );

        let config = BrowserConfig::builder()
            .chrome_executable(exe.clone())
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .build()
            .map_err(|e| anyhow!("building browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .with_context(|| format!("browser launch failed ({})", exe.display()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self { browser, handler_task })
    }

    pub async fn new_page(&self) -> Result<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .context("opening new page")
    }

    /// All pages currently open in the session, in creation order.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        self.browser.pages().await.context("listing open pages")
    }

    /// Shut the browser down and stop the event pump.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close error (non-fatal): {}", e);
        }
        self.handler_task.abort();
    }
}

/// Locate a Chromium-based browser binary.
///
/// Order: explicit `CHROME` env override, then well-known names on `PATH`,
/// then fixed install locations per platform.
pub fn find_chrome_executable() -> Option<PathBuf> {
    if let Ok(overridden) = std::env::var("CHROME") {
        let path = PathBuf::from(overridden);
        if path.is_file() {
            return Some(path);
        }
        warn!("CHROME is set but does not point at a file: {}", path.display());
    }

    const NAMES: &[&str] = &[
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
        "chrome",
    ];
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for name in NAMES {
                let candidate = executable_in(&dir, name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    const LOCATIONS: &[&str] = &[
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];
    LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

fn executable_in(dir: &Path, name: &str) -> PathBuf {
    if cfg!(windows) {
        dir.join(format!("{name}.exe"))
    } else {
        dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_name_has_platform_suffix() {
        let path = executable_in(Path::new("/usr/bin"), "chromium");
        if cfg!(windows) {
            assert!(path.to_string_lossy().ends_with("chromium.exe"));
        } else {
            assert_eq!(path, PathBuf::from("/usr/bin/chromium"));
        }
    }
}
