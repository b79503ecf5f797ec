//! Scripted flow against the POS reporting portal: login, navigation to the
//! daily report, filter selection, and opening/leaving the report view.
//!
//! Every text-based lookup runs as injected JavaScript built by the pure
//! `js_*` functions below; values are embedded JSON-escaped so user-supplied
//! credentials or dates can never break out of the script. The injected
//! snippets return plain booleans/strings instead of throwing, so a selector
//! miss surfaces as a Rust error with context rather than a CDP exception.
//!
//! The portal is a SPA: menus and form fields render asynchronously after
//! navigation. Clicks and fills therefore poll the same way the visibility
//! waits do — each action snippet is a self-contained lookup that acts only
//! once it finds its target and reports `false` otherwise, so re-evaluating
//! it until the timeout is safe.

use anyhow::{bail, Context, Result};
use chromiumoxide::Page;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

/// Location filter codes selected for both reports.
pub const LOCATION_CODES: &[&str] = &[
    "1181", "1178", "1170", "1350", "1174", "1175", "1176", "1173",
];

/// POS class for report A (מזנון, the snack bar).
pub const SNACK_BAR_POS_CLASSES: &[&str] = &["3"];

/// POS classes for report B (קופות, the registers).
pub const REGISTER_POS_CLASSES: &[&str] = &["1", "4", "2", "5"];

const CRITERIA_SELECTOR: &str = "#report-criteria";
const BACK_BUTTON_SELECTOR: &str = "#report-view-back-btn";
const LOCATIONS_SELECT: &str = r#"select[name="filterLocations"]"#;
const POS_CLASSES_SELECT: &str = r#"select[name="posClasses"]"#;
const START_DATE_INPUT: &str = r#"input[name="startDatePicker"]"#;
const END_DATE_INPUT: &str = r#"input[name="endDatePicker"]"#;

const NAV_TIMEOUT: Duration = Duration::from_secs(30);
/// Heavy reports can take minutes to render server-side.
const REPORT_RENDER_TIMEOUT: Duration = Duration::from_secs(180);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Log into the portal with the three-field credential form.
pub async fn login(page: &Page, url: &str, pos_code: &str, user: &str, password: &str) -> Result<()> {
    info!("Navigating to portal: {}", url);
    page.goto(url).await.context("navigating to portal URL")?;

    for (placeholder, value) in [("קוד", pos_code), ("שם משתמש", user), ("סיסמא", password)] {
        fill_by_placeholder(page, placeholder, value).await?;
    }

    click(page, &js_click_button_with_text("היכנס"), "login button").await?;

    // The accounting menu entry only appears once the session is established.
    wait_for(page, &js_has_exact_text("הנהלת חשבונות"), NAV_TIMEOUT, "post-login menu").await?;
    info!("Logged in");
    Ok(())
}

/// From the landing page, open דוח יומי (the daily report) criteria screen.
pub async fn open_daily_report(page: &Page) -> Result<()> {
    click(page, &js_click_exact_text("הנהלת חשבונות"), "accounting menu").await?;
    click(page, &js_click_link_with_text("דוחות"), "reports link").await?;
    click(page, &js_click_link_with_text("דוח יומי"), "daily report link").await?;
    wait_for(
        page,
        &js_is_visible(CRITERIA_SELECTOR),
        NAV_TIMEOUT,
        "report criteria panel",
    )
    .await?;
    info!("Daily report criteria open");
    Ok(())
}

/// Select the location filter and set both date pickers to `date_str`.
///
/// The date inputs ignore plain value assignment unless `input` and `change`
/// events are dispatched afterwards; the site only commits the value on
/// those events.
pub async fn apply_filters(page: &Page, date_str: &str) -> Result<()> {
    select_options(page, LOCATIONS_SELECT, LOCATION_CODES).await?;

    for selector in [START_DATE_INPUT, END_DATE_INPUT] {
        let ok = eval_bool(page, &js_set_date_input(selector, date_str)).await?;
        if !ok {
            bail!("date input not found: {selector}");
        }
    }

    let committed = read_date_inputs(page).await?;
    info!("start: {}", committed.start);
    info!("end: {}", committed.end);
    if committed.start != date_str || committed.end != date_str {
        bail!(
            "date inputs did not commit (wanted {date_str}, got start={} end={})",
            committed.start,
            committed.end
        );
    }
    Ok(())
}

/// Select the POS class filter for one of the two reports.
pub async fn select_pos_classes(page: &Page, classes: &[&str]) -> Result<()> {
    select_options(page, POS_CLASSES_SELECT, classes).await
}

/// Click הצג דוח and wait for the report view to finish rendering.
pub async fn open_report_view(page: &Page) -> Result<()> {
    click(
        page,
        &js_click_link_with_text_within(CRITERIA_SELECTOR, "הצג דוח"),
        "show report link",
    )
    .await?;
    wait_for(
        page,
        &js_is_visible(BACK_BUTTON_SELECTOR),
        REPORT_RENDER_TIMEOUT,
        "report view",
    )
    .await?;
    info!("Report view rendered");
    Ok(())
}

/// Leave the report view and return to the criteria screen.
pub async fn back_to_criteria(page: &Page) -> Result<()> {
    click(page, &js_click_selector(BACK_BUTTON_SELECTOR), "back button").await?;
    wait_for(
        page,
        &js_is_visible(CRITERIA_SELECTOR),
        NAV_TIMEOUT,
        "report criteria panel",
    )
    .await
}

/// The portal origin, for resolving relative resources in extracted HTML.
pub async fn origin(page: &Page) -> Result<String> {
    eval_string(page, "window.location.origin").await
}

// ---------------------------------------------------------------------------
// Evaluate plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DateInputs {
    start: String,
    end: String,
}

async fn read_date_inputs(page: &Page) -> Result<DateInputs> {
    let js = format!(
        "(() => {{ \
           const v = s => {{ const el = document.querySelector(s); return el ? el.value : ''; }}; \
           return {{ start: v({start}), end: v({end}) }}; \
         }})()",
        start = js_str(START_DATE_INPUT),
        end = js_str(END_DATE_INPUT),
    );
    page.evaluate(js)
        .await
        .context("reading back date inputs")?
        .into_value::<DateInputs>()
        .context("deserializing date input values")
}

async fn fill_by_placeholder(page: &Page, placeholder: &str, value: &str) -> Result<()> {
    act(
        page,
        &js_fill_by_placeholder(placeholder, value),
        &format!("input with placeholder '{placeholder}'"),
    )
    .await
}

async fn select_options(page: &Page, selector: &str, values: &[&str]) -> Result<()> {
    let ok = eval_bool(page, &js_select_options(selector, values)).await?;
    if !ok {
        bail!("select not found: {selector}");
    }
    info!("Selected {:?} in {}", values, selector);
    Ok(())
}

async fn click(page: &Page, js: &str, what: &str) -> Result<()> {
    act(page, js, what).await
}

/// Re-evaluate an action snippet until it reports success or the navigation
/// timeout elapses. A transient evaluate error (e.g. execution context torn
/// down mid-navigation) counts as a miss and is retried.
async fn act(page: &Page, js: &str, what: &str) -> Result<()> {
    let deadline = Instant::now() + NAV_TIMEOUT;
    loop {
        let ok = page
            .evaluate(js.to_string())
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false);
        if ok {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("{what} not found");
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub(crate) async fn eval_bool(page: &Page, js: &str) -> Result<bool> {
    page.evaluate(js.to_string())
        .await
        .context("evaluating script")?
        .into_value::<bool>()
        .context("script did not return a boolean")
}

pub(crate) async fn eval_string(page: &Page, js: &str) -> Result<String> {
    page.evaluate(js.to_string())
        .await
        .context("evaluating script")?
        .into_value::<String>()
        .context("script did not return a string")
}

/// Poll a boolean script until it holds or `timeout` elapses.
///
/// CDP has no built-in auto-waiting, so every "wait for visible/attached"
/// in the flow is this polling loop.
pub(crate) async fn wait_for(page: &Page, js: &str, timeout: Duration, what: &str) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let ok = page
            .evaluate(js.to_string())
            .await
            .ok()
            .and_then(|v| v.into_value::<bool>().ok())
            .unwrap_or(false);
        if ok {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out after {:?} waiting for {}", timeout, what);
        }
        sleep(POLL_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// JS snippet builders (pure; values embedded JSON-escaped)
// ---------------------------------------------------------------------------

/// JSON-escape a string for embedding in an injected script.
pub(crate) fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn js_fill_by_placeholder(placeholder: &str, value: &str) -> String {
    format!(
        "(() => {{ \
           const el = document.querySelector(`input[placeholder=${{{ph}}}]`) \
             || [...document.querySelectorAll('input')].find(i => (i.placeholder || '').trim() === {ph}); \
           if (!el) return false; \
           el.focus(); \
           el.value = {val}; \
           el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
           el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
           return true; \
         }})()",
        ph = js_str(placeholder),
        val = js_str(value),
    )
}

fn js_click_button_with_text(text: &str) -> String {
    format!(
        "(() => {{ \
           const el = [...document.querySelectorAll('button, input[type=submit], input[type=button]')] \
             .find(b => ((b.textContent || b.value) || '').trim().includes({t})); \
           if (!el) return false; \
           el.click(); \
           return true; \
         }})()",
        t = js_str(text),
    )
}

fn js_click_link_with_text(text: &str) -> String {
    js_click_link_with_text_within("body", text)
}

fn js_click_link_with_text_within(scope: &str, text: &str) -> String {
    format!(
        "(() => {{ \
           const root = document.querySelector({scope}); \
           if (!root) return false; \
           const el = [...root.querySelectorAll('a')] \
             .find(a => (a.textContent || '').trim().includes({t})); \
           if (!el) return false; \
           el.click(); \
           return true; \
         }})()",
        scope = js_str(scope),
        t = js_str(text),
    )
}

fn js_click_exact_text(text: &str) -> String {
    format!(
        "(() => {{ \
           const el = [...document.querySelectorAll('a, button, span, div, li')] \
             .find(e => (e.textContent || '').trim() === {t} && e.children.length === 0); \
           if (!el) return false; \
           el.click(); \
           return true; \
         }})()",
        t = js_str(text),
    )
}

fn js_has_exact_text(text: &str) -> String {
    format!(
        "(() => [...document.querySelectorAll('a, button, span, div, li')] \
           .some(e => (e.textContent || '').trim() === {t} && e.children.length === 0))()",
        t = js_str(text),
    )
}

fn js_click_selector(selector: &str) -> String {
    format!(
        "(() => {{ \
           const el = document.querySelector({sel}); \
           if (!el) return false; \
           el.click(); \
           return true; \
         }})()",
        sel = js_str(selector),
    )
}

pub(crate) fn js_is_visible(selector: &str) -> String {
    format!(
        "(() => {{ \
           const el = document.querySelector({sel}); \
           return !!el && el.offsetParent !== null; \
         }})()",
        sel = js_str(selector),
    )
}

fn js_select_options(selector: &str, values: &[&str]) -> String {
    let wanted = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(() => {{ \
           const el = document.querySelector({sel}); \
           if (!el) return false; \
           const wanted = {wanted}; \
           for (const o of el.options) o.selected = wanted.includes(o.value); \
           el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
           return true; \
         }})()",
        sel = js_str(selector),
    )
}

fn js_set_date_input(selector: &str, value: &str) -> String {
    format!(
        "(() => {{ \
           const el = document.querySelector({sel}); \
           if (!el) return false; \
           el.focus(); \
           el.value = {val}; \
           el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
           el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
           el.blur(); \
           return true; \
         }})()",
        sel = js_str(selector),
        val = js_str(value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_str_escapes_quotes_and_backslashes() {
        assert_eq!(js_str(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn js_str_escapes_hebrew_untouched() {
        // Hebrew text passes through as-is; JSON escaping only touches
        // control and quote characters.
        assert_eq!(js_str("דוח יומי"), "\"דוח יומי\"");
    }

    #[test]
    fn date_input_script_embeds_both_values() {
        let js = js_set_date_input(r#"input[name="startDatePicker"]"#, "07/03/2024");
        assert!(js.contains(r#""input[name=\"startDatePicker\"]""#));
        assert!(js.contains(r#""07/03/2024""#));
        assert!(js.contains("dispatchEvent(new Event('change'"));
    }

    #[test]
    fn select_script_carries_all_codes() {
        let js = js_select_options(LOCATIONS_SELECT, LOCATION_CODES);
        for code in LOCATION_CODES {
            assert!(js.contains(code), "missing location code {code}");
        }
    }

    #[test]
    fn pos_class_filters_are_disjoint() {
        for class in SNACK_BAR_POS_CLASSES {
            assert!(!REGISTER_POS_CLASSES.contains(class));
        }
    }

    #[test]
    fn action_snippets_are_safe_to_re_evaluate() {
        // Menus on the portal render a tick after their parent click, so
        // action snippets get re-evaluated until they land. Each one must be
        // a self-contained expression that reports a miss as `false` rather
        // than throwing or leaving partial state behind.
        let snippets = [
            js_fill_by_placeholder("קוד", "1234"),
            js_click_button_with_text("היכנס"),
            js_click_exact_text("הנהלת חשבונות"),
            js_click_link_with_text("דוחות"),
            js_click_link_with_text("דוח יומי"),
            js_click_selector(BACK_BUTTON_SELECTOR),
        ];
        for js in &snippets {
            assert!(js.starts_with("(() =>"), "not an expression: {js}");
            assert!(js.ends_with(")()"), "not self-invoking: {js}");
            assert!(js.contains("return false"), "miss must report false: {js}");
        }
        // Builders are pure: the retried evaluation runs the identical script.
        assert_eq!(
            js_click_link_with_text("דוחות"),
            js_click_link_with_text("דוחות")
        );
    }

    #[test]
    fn credential_value_cannot_break_out_of_script() {
        let js = js_fill_by_placeholder("סיסמא", "p@ss\"word'); alert(1); ('");
        // The hostile value must stay inside one JSON string literal.
        assert!(js.contains(r#""p@ss\"word'); alert(1); ('""#));
    }
}
