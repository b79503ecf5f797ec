use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::helpers::{browser::BrowserSession, dates, mail, portal, print};

/// Configuration for the daily report run, loaded from the environment.
#[derive(Clone)]
pub struct ReportConfig {
    pub portal_url: String,
    pub pos_code: String,
    pub username: String,
    pub password: String,
    pub recipient: String,
    pub subject: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub out_dir: PathBuf,
}

impl ReportConfig {
    /// Read all settings from environment variables. Credentials are never
    /// hardcoded; a missing variable aborts startup naming it.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            portal_url: require_env("PRES_URL")?,
            pos_code: require_env("PRES_POS_CODE")?,
            username: require_env("NLC_USER")?,
            password: require_env("NLC_PASSWORD")?,
            recipient: require_env("RECIPIENT")?,
            subject: require_env("SUBJECT")?,
            max_retries: parse_count(&require_env("MAX_RETRIES")?, "MAX_RETRIES")?,
            retry_delay: Duration::from_secs(u64::from(parse_count(
                &require_env("RETRY_DELAY_SECONDS")?,
                "RETRY_DELAY_SECONDS",
            )?)),
            out_dir: out_dir_from(std::env::var("PRES_OUT_DIR").ok()),
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn parse_count(raw: &str, name: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'"))
}

fn out_dir_from(var: Option<String>) -> PathBuf {
    var.filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// One of the two daily reports, identified by its POS class filter.
#[derive(Debug, Clone, Copy)]
pub struct ReportSpec {
    pub name: &'static str,
    pub filename: &'static str,
    pub pos_classes: &'static [&'static str],
}

/// Report A: the snack bar.
pub const SNACK_BAR_REPORT: ReportSpec = ReportSpec {
    name: "מזנון",
    filename: "מזנון.pdf",
    pos_classes: portal::SNACK_BAR_POS_CLASSES,
};

/// Report B: the registers.
pub const REGISTERS_REPORT: ReportSpec = ReportSpec {
    name: "קופות",
    filename: "קופות.pdf",
    pos_classes: portal::REGISTER_POS_CLASSES,
};

const REPORTS: [ReportSpec; 2] = [SNACK_BAR_REPORT, REGISTERS_REPORT];

/// The daily report service: drives the portal session, exports both report
/// PDFs, and mails them through the desktop client.
pub struct DailyReportService {
    pub config: ReportConfig,
}

impl DailyReportService {
    pub fn new(config: ReportConfig) -> Self {
        info!("Creating new DailyReportService instance");
        Self { config }
    }

    /// Run the whole job, retrying complete attempts with a fixed delay.
    /// After exhausting the retries the last error is returned, so the
    /// process fails loudly.
    pub async fn run(&self) -> Result<()> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            info!("Attempt {}/{}...", attempt, self.config.max_retries);
            match self.process_reports().await {
                Ok(artifacts) => {
                    info!("Success.");
                    for artifact in &artifacts {
                        info!("- {}", artifact.display());
                    }
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        "Attempt {}/{} failed: {:#}",
                        attempt, self.config.max_retries, e
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        info!(
                            "Retrying in {} seconds...",
                            self.config.retry_delay.as_secs()
                        );
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| anyhow!("no attempts were made"));
        Err(last.context(format!(
            "run failed after {} attempt(s)",
            self.config.max_retries
        )))
    }

    /// One complete attempt: portal session, two PDFs, one email.
    pub async fn process_reports(&self) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.config.out_dir).with_context(|| {
            format!("creating output directory {}", self.config.out_dir.display())
        })?;

        let date_str = dates::format_portal_date(dates::target_date());
        info!("Processing daily reports for {}", date_str);

        let session = BrowserSession::launch().await?;
        let result = self.drive_portal(&session, &date_str).await;
        session.close().await;
        let artifacts = result?;

        let body = mail::report_mail_body(&REPORTS.map(|r| r.name));
        match mail::send_report_email(
            &self.config.subject,
            &body,
            &self.config.recipient,
            &artifacts,
        ) {
            Ok(()) => {
                info!("Reports emailed to {}", self.config.recipient);
                Ok(artifacts)
            }
            Err(e) => {
                error!("Error sending email: {}", e);
                Err(e.into())
            }
        }
    }

    /// The scripted portal flow for one attempt.
    async fn drive_portal(
        &self,
        session: &BrowserSession,
        date_str: &str,
    ) -> Result<Vec<PathBuf>> {
        let page = session.new_page().await?;

        portal::login(
            &page,
            &self.config.portal_url,
            &self.config.pos_code,
            &self.config.username,
            &self.config.password,
        )
        .await?;
        portal::open_daily_report(&page).await?;
        portal::apply_filters(&page, date_str).await?;

        let mut artifacts = Vec::with_capacity(REPORTS.len());
        for (i, report) in REPORTS.iter().enumerate() {
            if i > 0 {
                portal::back_to_criteria(&page).await?;
            }
            info!("Rendering report '{}'", report.name);
            portal::select_pos_classes(&page, report.pos_classes).await?;
            portal::open_report_view(&page).await?;

            let save_path = self.config.out_dir.join(report.filename);
            print::export_report_pdf(session, &page, &save_path)
                .await
                .with_context(|| format!("exporting report '{}'", report.name))?;
            artifacts.push(save_path);
        }

        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_dir_defaults_to_downloads() {
        assert_eq!(out_dir_from(None), PathBuf::from("downloads"));
        assert_eq!(out_dir_from(Some("  ".into())), PathBuf::from("downloads"));
        assert_eq!(out_dir_from(Some("reports".into())), PathBuf::from("reports"));
    }

    #[test]
    fn count_parsing_accepts_whitespace_and_rejects_garbage() {
        assert_eq!(parse_count(" 3 ", "MAX_RETRIES").unwrap(), 3);
        assert!(parse_count("-1", "MAX_RETRIES").is_err());
        assert!(parse_count("three", "MAX_RETRIES").is_err());
        let err = parse_count("", "RETRY_DELAY_SECONDS").unwrap_err();
        assert!(err.to_string().contains("RETRY_DELAY_SECONDS"));
    }

    #[test]
    fn report_specs_cover_both_artifacts() {
        assert_eq!(REPORTS[0].filename, "מזנון.pdf");
        assert_eq!(REPORTS[1].filename, "קופות.pdf");
        assert_ne!(REPORTS[0].pos_classes, REPORTS[1].pos_classes);
    }

    #[test]
    fn artifact_path_lands_in_out_dir() {
        let dir = out_dir_from(Some("out".into()));
        assert_eq!(
            dir.join(SNACK_BAR_REPORT.filename),
            PathBuf::from("out/מזנון.pdf")
        );
    }
}
