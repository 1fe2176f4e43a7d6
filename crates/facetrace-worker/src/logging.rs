//! Structured scan logging utilities.
//!
//! Provides consistent, structured logging for scans and renders with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use facetrace_models::ScanId;

/// Scan logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct ScanLogger {
    scan_id: String,
    operation: String,
}

impl ScanLogger {
    /// Create a logger for a scan and operation (e.g. "targeted", "render").
    pub fn new(scan_id: &ScanId, operation: &str) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            scan_id = %self.scan_id,
            operation = %self.operation,
            "Scan started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            scan_id = %self.scan_id,
            operation = %self.operation,
            "Scan progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            scan_id = %self.scan_id,
            operation = %self.operation,
            "Scan warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            scan_id = %self.scan_id,
            operation = %self.operation,
            "Scan error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            scan_id = %self.scan_id,
            operation = %self.operation,
            "Scan completed: {}", message
        );
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the scan id and operation.
    ///
    /// Enter it on the blocking scan thread so engine logs inherit the fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "scan",
            scan_id = %self.scan_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_logger_creation() {
        let scan_id = ScanId::new();
        let logger = ScanLogger::new(&scan_id, "discovery");

        assert_eq!(logger.scan_id(), scan_id.to_string());
        assert_eq!(logger.operation(), "discovery");
    }
}
