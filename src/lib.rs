//! PRES Daily Reports
//!
//! This library provides functionality for logging into the PRES point-of-sale
//! reporting portal, rendering the two daily sales reports for yesterday,
//! extracting each as a PDF, and sending them via the local desktop mail client.

pub mod helpers;
pub mod service;

pub use service::{DailyReportService, ReportConfig, ReportSpec};

// Re-export key types for convenience
pub use helpers::mail::MailError;
pub use helpers::print::MIN_PDF_BYTES;
