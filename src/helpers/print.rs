//! Print-to-PDF extraction for the Stimulsoft report viewer.
//!
//! The viewer's Print button builds a hidden iframe (`#stiPrintReportFrame`)
//! containing the report as standalone HTML and then calls `window.print()`.
//! A native print dialog is useless to an unattended run, so `window.print`
//! is replaced with a no-op recorder before the click and the rendering is
//! captured another way. Three strategies, in order of fidelity:
//!
//! 1. extract the print iframe's HTML, reload it in a fresh page, and run
//!    CDP `Page.printToPDF` there — byte-identical to Chrome's
//!    "Print → Save as PDF";
//! 2. some viewer builds open the print rendering in a popup window instead;
//!    detect the new page and print it directly;
//! 3. print the report-view page itself, best effort.
//!
//! A strategy failure logs a warning and falls through; only when all three
//! fail does the attempt abort, leaving a full-page screenshot under `debug/`.
//! The print iframe is removed both before the Print click and on every exit
//! of strategy 1 — an iframe surviving a failed capture would satisfy the
//! next report's attach wait with the previous report's content.

use anyhow::{bail, Context, Result};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::helpers::browser::BrowserSession;
use crate::helpers::portal;

const PRINT_FRAME_ID: &str = "stiPrintReportFrame";
const PRINT_FRAME_TIMEOUT: Duration = Duration::from_secs(30);
/// Settle time after the iframe attaches / content loads, so the viewer
/// finishes laying out before capture.
const RENDER_SETTLE: Duration = Duration::from_secs(2);
const POPUP_POLL_ATTEMPTS: u32 = 20;
const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A report PDF smaller than this is a blank or error page, not a report.
pub const MIN_PDF_BYTES: usize = 5_000;

/// Export the currently rendered report view as a PDF at `save_path`.
pub async fn export_report_pdf(
    session: &BrowserSession,
    page: &Page,
    save_path: &Path,
) -> Result<()> {
    suppress_native_print(page).await?;
    // A frame left over from an earlier report would satisfy the attach wait
    // immediately with that report's content.
    remove_print_frame(page).await;
    let pages_before = session.pages().await?.len();
    click_print_button(page).await?;

    match via_print_frame(session, page, save_path).await {
        Ok(()) => {
            info!("PDF extracted via print iframe: {}", save_path.display());
            return Ok(());
        }
        Err(e) => warn!("Print-iframe extraction failed: {:#}", e),
    }

    match via_popup(session, pages_before, page, save_path).await {
        Ok(()) => {
            info!("PDF extracted via popup window: {}", save_path.display());
            return Ok(());
        }
        Err(e) => warn!("Popup capture failed: {:#}", e),
    }

    match via_direct_print(page, save_path).await {
        Ok(()) => {
            info!("PDF extracted via direct page print: {}", save_path.display());
            Ok(())
        }
        Err(e) => {
            capture_debug_screenshot(page, "print_all_strategies_failed").await;
            Err(e.context("all PDF extraction strategies failed"))
        }
    }
}

/// Strategy 1: pull the full HTML out of the hidden print iframe, load it in
/// a fresh page with a `<base>` tag pointing at the portal origin (so
/// relative stylesheets and images resolve), and print that page.
async fn via_print_frame(
    session: &BrowserSession,
    page: &Page,
    save_path: &Path,
) -> Result<()> {
    let result = extract_via_print_frame(session, page, save_path).await;
    // The frame must not outlive the strategy, success or not: the
    // fall-through strategies can rescue this report, and the next report's
    // attach wait would otherwise match this one's stale frame.
    remove_print_frame(page).await;
    result
}

async fn extract_via_print_frame(
    session: &BrowserSession,
    page: &Page,
    save_path: &Path,
) -> Result<()> {
    portal::wait_for(
        page,
        &format!("(() => !!document.getElementById({}))()", portal::js_str(PRINT_FRAME_ID)),
        PRINT_FRAME_TIMEOUT,
        "print iframe",
    )
    .await?;
    sleep(RENDER_SETTLE).await;

    let base_url = portal::origin(page).await?;
    let html = portal::eval_string(page, &js_extract_print_html(&base_url)).await?;
    if html.is_empty() {
        capture_debug_screenshot(page, "print_iframe_missing").await;
        bail!("could not extract HTML from #{PRINT_FRAME_ID}");
    }

    let print_page = session.new_page().await?;
    print_page
        .set_content(html)
        .await
        .context("loading print HTML into scratch page")?;
    sleep(RENDER_SETTLE).await;

    let bytes = print_page
        .pdf(pdf_params())
        .await
        .context("Page.printToPDF on scratch page")?;
    write_pdf(page, save_path, &bytes).await
}

/// Strategy 2: the viewer opened the rendering in a popup window.
async fn via_popup(
    session: &BrowserSession,
    pages_before: usize,
    viewer_page: &Page,
    save_path: &Path,
) -> Result<()> {
    for _ in 0..POPUP_POLL_ATTEMPTS {
        let pages = session.pages().await?;
        for candidate in pages.iter().skip(pages_before) {
            // Skip the strategy-1 scratch page, which never navigates.
            let url = candidate.url().await.ok().flatten().unwrap_or_default();
            if url.is_empty() || url == "about:blank" {
                continue;
            }
            info!("Print popup detected: {}", url);
            sleep(RENDER_SETTLE).await;
            let bytes = candidate
                .pdf(pdf_params())
                .await
                .context("Page.printToPDF on popup")?;
            return write_pdf(viewer_page, save_path, &bytes).await;
        }
        sleep(POPUP_POLL_INTERVAL).await;
    }
    bail!("no print popup appeared")
}

/// Strategy 3: print the report view itself.
async fn via_direct_print(page: &Page, save_path: &Path) -> Result<()> {
    let bytes = page
        .pdf(pdf_params())
        .await
        .context("Page.printToPDF on report view")?;
    write_pdf(page, save_path, &bytes).await
}

fn pdf_params() -> PrintToPdfParams {
    // Matches Chrome's "Print → Save as PDF" defaults for this viewer: no
    // background graphics, page size taken from the report's @page CSS.
    PrintToPdfParams {
        print_background: Some(false),
        prefer_css_page_size: Some(true),
        ..Default::default()
    }
}

/// Validate and persist the PDF bytes.
async fn write_pdf(viewer_page: &Page, save_path: &Path, bytes: &[u8]) -> Result<()> {
    if !pdf_is_plausible(bytes) {
        capture_debug_screenshot(viewer_page, "print_pdf_too_small_or_missing").await;
        bail!(
            "PDF missing/too small after print: {} bytes for {}",
            bytes.len(),
            save_path.display()
        );
    }
    tokio::fs::write(save_path, bytes)
        .await
        .with_context(|| format!("writing PDF to {}", save_path.display()))?;
    info!("Wrote {} bytes to {}", bytes.len(), save_path.display());
    Ok(())
}

/// Cheap sanity check that the capture produced an actual report.
pub fn pdf_is_plausible(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_PDF_BYTES && bytes.starts_with(b"%PDF-")
}

async fn suppress_native_print(page: &Page) -> Result<()> {
    let ok = portal::eval_bool(
        page,
        "(() => { \
           window.__printCalled = false; \
           window.print = function() { window.__printCalled = true; }; \
           return true; \
         })()",
    )
    .await?;
    if !ok {
        bail!("could not install window.print override");
    }
    Ok(())
}

/// Click the viewer's Print toolbar control. The Stimulsoft toolbar renders
/// it as a table cell; the third match is the actual button. Fewer matches
/// means the toolbar changed shape, and a guessed click would print the
/// wrong thing, so that is an error rather than a fallback.
async fn click_print_button(page: &Page) -> Result<()> {
    let ok = portal::eval_bool(page, &js_click_print_button()).await?;
    if !ok {
        bail!("Print toolbar button not found");
    }
    Ok(())
}

fn js_click_print_button() -> String {
    "(() => { \
       const cells = [...document.querySelectorAll('td')] \
         .filter(c => (c.textContent || '').trim() === 'Print'); \
       if (cells.length < 3) return false; \
       cells[2].click(); \
       return true; \
     })()"
        .to_string()
}

fn js_extract_print_html(base_url: &str) -> String {
    format!(
        "(() => {{ \
           const iframe = document.getElementById({id}); \
           if (!iframe || !iframe.contentDocument) return ''; \
           const doc = iframe.contentDocument; \
           if (!doc.querySelector('base')) {{ \
             const base = doc.createElement('base'); \
             base.href = {base}; \
             doc.head.prepend(base); \
           }} \
           return doc.documentElement.outerHTML; \
         }})()",
        id = portal::js_str(PRINT_FRAME_ID),
        base = portal::js_str(base_url),
    )
}

/// Drop the print iframe so the next capture starts from a clean viewer.
async fn remove_print_frame(page: &Page) {
    if let Err(e) = portal::eval_bool(page, &js_remove_print_frame()).await {
        warn!("Could not remove print iframe (non-fatal): {:#}", e);
    }
}

fn js_remove_print_frame() -> String {
    format!(
        "(() => {{ \
           const f = document.getElementById({id}); \
           if (f) f.remove(); \
           return true; \
         }})()",
        id = portal::js_str(PRINT_FRAME_ID),
    )
}

/// Best-effort full-page screenshot under `debug/` for post-mortems.
async fn capture_debug_screenshot(page: &Page, label: &str) {
    if let Err(e) = std::fs::create_dir_all("debug") {
        warn!("Could not create debug dir: {}", e);
        return;
    }
    let shot = page
        .screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .build(),
        )
        .await;
    match shot {
        Ok(bytes) => {
            let path = format!("debug/{label}.png");
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                warn!("Could not write debug screenshot {}: {}", path, e);
            } else {
                info!("Debug screenshot saved: {}", path);
            }
        }
        Err(e) => warn!("Debug screenshot capture failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_pdf_is_rejected() {
        assert!(!pdf_is_plausible(b"%PDF-1.7 tiny"));
    }

    #[test]
    fn non_pdf_bytes_are_rejected_even_if_large() {
        let html = vec![b'<'; MIN_PDF_BYTES * 2];
        assert!(!pdf_is_plausible(&html));
    }

    #[test]
    fn plausible_pdf_passes() {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(MIN_PDF_BYTES + 1, 0);
        assert!(pdf_is_plausible(&bytes));
    }

    #[test]
    fn print_button_requires_exactly_the_third_cell() {
        // A reshaped toolbar must surface as an error, not a guessed click
        // on whatever Print cell happens to exist.
        let js = js_click_print_button();
        assert!(js.contains("cells.length < 3) return false"));
        assert!(js.contains("cells[2].click()"));
        assert!(!js.contains("Math.min"));
    }

    #[test]
    fn frame_cleanup_script_removes_the_print_frame() {
        // Strategy 1 runs this on every exit; a stale frame would otherwise
        // hand the next report the previous report's HTML.
        let js = js_remove_print_frame();
        assert!(js.contains(r#"getElementById("stiPrintReportFrame")"#));
        assert!(js.contains("f.remove()"));
    }

    #[test]
    fn extract_script_injects_base_href() {
        let js = js_extract_print_html("https://pos.example");
        assert!(js.contains(r#""https://pos.example""#));
        assert!(js.contains("stiPrintReportFrame"));
        assert!(js.contains("doc.head.prepend(base)"));
    }
}
