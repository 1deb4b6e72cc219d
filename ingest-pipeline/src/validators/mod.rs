//! Publish validation chain
//!
//! Each check looks at one aspect of an item and returns pass, warn or
//! fail with a message. Checks run in order and may record what they
//! compute on the item for later checks and for publishing. The chain
//! stops at the first failure.

pub mod checks;

pub use checks::{
    CdlCheck, ConflictingPublishCheck, ContextCheck, DestinationCheck, PlateStatusCheck,
    PublishPathCheck, SourceExistsCheck,
};

use async_trait::async_trait;
use ingest_common::config::IngestConfig;
use serde::{Deserialize, Serialize};

use crate::error::IngestResult;
use crate::models::IngestItem;
use crate::templates::TemplateSet;
use crate::tracking::TrackingClient;

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    /// Publishing may proceed; the message is shown to the operator
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    pub fn pass(check: &str, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Pass, message)
    }

    pub fn warn(check: &str, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Warn, message)
    }

    pub fn fail(check: &str, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Fail, message)
    }

    fn new(check: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            status,
            message: message.into(),
        }
    }
}

/// Results of every check that ran for one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// No check failed
    pub fn passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(CheckStatus::Warn)
    }

    pub fn failures(&self) -> Vec<String> {
        self.messages(CheckStatus::Fail)
    }

    fn messages(&self, status: CheckStatus) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.status == status)
            .map(|c| format!("{}: {}", c.check, c.message))
            .collect()
    }
}

/// What a check may consult
pub struct CheckEnv<'a> {
    pub config: &'a IngestConfig,
    pub templates: &'a TemplateSet,
    pub tracking: &'a dyn TrackingClient,
}

/// One step of the validation chain
#[async_trait]
pub trait PublishCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tracking database errors propagate; everything else is a result
    async fn check(&self, env: &CheckEnv<'_>, item: &mut IngestItem) -> IngestResult<CheckResult>;
}

/// The standard chain, in order
pub fn default_checks() -> Vec<Box<dyn PublishCheck>> {
    vec![
        Box::new(ContextCheck),
        Box::new(SourceExistsCheck),
        Box::new(PublishPathCheck),
        Box::new(ConflictingPublishCheck),
        Box::new(DestinationCheck),
        Box::new(PlateStatusCheck),
        Box::new(CdlCheck),
    ]
}

/// Run `checks` in order, stopping after the first failure
pub async fn run_checks(
    checks: &[Box<dyn PublishCheck>],
    env: &CheckEnv<'_>,
    item: &mut IngestItem,
) -> IngestResult<ValidationReport> {
    let mut report = ValidationReport::default();
    for check in checks {
        let result = check.check(env, item).await?;
        tracing::debug!(
            item = %item.name,
            check = check.name(),
            status = ?result.status,
            message = %result.message,
            "Check finished"
        );
        let failed = result.status == CheckStatus::Fail;
        report.checks.push(result);
        if failed {
            break;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_summaries() {
        let report = ValidationReport {
            checks: vec![
                CheckResult::pass("source", "ok"),
                CheckResult::warn("conflicts", "2 active publishes"),
                CheckResult::fail("destination", "exists"),
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.warnings(), vec!["conflicts: 2 active publishes".to_string()]);
        assert_eq!(report.failures(), vec!["destination: exists".to_string()]);
        assert!(ValidationReport::default().passed());
    }
}
