use anyhow::Result;
use tracing::info;

use pres_daily_reports::{DailyReportService, ReportConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting PRES daily report run");

    let config = ReportConfig::from_env()?;
    let service = DailyReportService::new(config);

    service.run().await
}
