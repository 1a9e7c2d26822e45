//! Record validation.
//!
//! Validation never rejects a record outright: every problem becomes a
//! [`Finding`], and a non-empty set of findings is a partial failure that
//! the pipeline turns into a single quality issue.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::extraction::IntermediateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "resolved" => Ok(IssueStatus::Resolved),
            other => Err(format!("unknown issue status '{}'", other)),
        }
    }
}

/// A non-fatal finding recorded against a job for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityIssue {
    /// Assigned by the audit log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub job_id: String,
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub requires_manual_review: bool,
    pub status: IssueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Machine-readable issue type, e.g. `missing_parties`.
    pub kind: &'static str,
    pub severity: Severity,
    pub message: String,
    pub requires_manual_review: bool,
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Validation found {} problem(s): {}", .findings.len(), summarize(.findings))]
    Partial { findings: Vec<Finding> },
}

impl ValidationError {
    pub fn findings(&self) -> &[Finding] {
        match self {
            ValidationError::Partial { findings } => findings,
        }
    }

    /// The quality issue this failure is recorded as: type of the most
    /// severe finding, all messages, the highest severity, and manual review
    /// when any finding asks for it.
    pub fn to_issue(&self, job_id: &str) -> QualityIssue {
        let findings = self.findings();
        // first of the most severe findings
        let worst = findings.iter().rev().max_by_key(|f| f.severity);
        QualityIssue {
            id: None,
            job_id: job_id.to_string(),
            issue_type: worst.map(|f| f.kind).unwrap_or("validation").to_string(),
            severity: worst.map(|f| f.severity).unwrap_or(Severity::Low),
            description: summarize(findings),
            requires_manual_review: findings.iter().any(|f| f.requires_manual_review),
            status: IssueStatus::Open,
        }
    }
}

fn summarize(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub trait Validator: Send + Sync {
    fn validate(&self, record: &IntermediateRecord) -> Result<(), ValidationError>;
}

/// Completeness and consistency checks for contract records.
pub struct ContractValidator;

impl ContractValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn findings(&self, record: &IntermediateRecord) -> Vec<Finding> {
        let mut findings = Vec::new();

        if record.is_empty() {
            findings.push(Finding {
                kind: "empty_content",
                severity: Severity::High,
                message: "No content could be extracted from the document".to_string(),
                requires_manual_review: true,
            });
            return findings;
        }

        match record.parties.len() {
            0 => findings.push(Finding {
                kind: "missing_parties",
                severity: Severity::Medium,
                message: "No contracting parties identified".to_string(),
                requires_manual_review: true,
            }),
            1 => findings.push(Finding {
                kind: "missing_parties",
                severity: Severity::Medium,
                message: "Only one contracting party identified".to_string(),
                requires_manual_review: true,
            }),
            _ => {}
        }

        let effective = check_date(&mut findings, "effective_date", &record.effective_date);
        let expiration = check_date(&mut findings, "expiration_date", &record.expiration_date);
        if record.effective_date.is_none() {
            findings.push(Finding {
                kind: "missing_effective_date",
                severity: Severity::Low,
                message: "Effective date not found".to_string(),
                requires_manual_review: false,
            });
        }

        if let (Some(start), Some(end)) = (effective, expiration) {
            if end < start {
                findings.push(Finding {
                    kind: "date_order",
                    severity: Severity::High,
                    message: format!("Expiration date {} precedes effective date {}", end, start),
                    requires_manual_review: true,
                });
            }
        }

        if let Some(value) = &record.total_value {
            if !value.amount.is_finite() || value.amount < 0.0 {
                findings.push(Finding {
                    kind: "invalid_amount",
                    severity: Severity::Medium,
                    message: format!("Contract value {} is not a valid amount", value.amount),
                    requires_manual_review: false,
                });
            }
        }

        findings
    }
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for ContractValidator {
    fn validate(&self, record: &IntermediateRecord) -> Result<(), ValidationError> {
        let findings = self.findings(record);
        if findings.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Partial { findings })
        }
    }
}

fn check_date(findings: &mut Vec<Finding>, field: &str, value: &Option<String>) -> Option<NaiveDate> {
    let raw = value.as_deref()?;
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            findings.push(Finding {
                kind: "invalid_date",
                severity: Severity::Medium,
                message: format!("{} '{}' is not a YYYY-MM-DD date", field, raw),
                requires_manual_review: true,
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{MonetaryAmount, Party};

    fn party(name: &str) -> Party {
        Party {
            name: name.to_string(),
            role: None,
        }
    }

    fn complete() -> IntermediateRecord {
        IntermediateRecord {
            title: Some("Lease".to_string()),
            parties: vec![party("Acme"), party("Beta")],
            effective_date: Some("2024-01-01".to_string()),
            expiration_date: Some("2025-01-01".to_string()),
            total_value: Some(MonetaryAmount {
                amount: 1000.0,
                currency: Some("EUR".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_record_passes() {
        assert!(ContractValidator::new().validate(&complete()).is_ok());
    }

    #[test]
    fn test_empty_record_needs_review() {
        let err = ContractValidator::new()
            .validate(&IntermediateRecord::default())
            .unwrap_err();
        let issue = err.to_issue("job-1");
        assert_eq!(issue.job_id, "job-1");
        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(issue.issue_type, "empty_content");
        assert_eq!(issue.severity, Severity::High);
        assert!(issue.requires_manual_review);
        assert_eq!(err.findings().len(), 1);
    }

    #[test]
    fn test_single_party() {
        let mut record = complete();
        record.parties.truncate(1);
        let err = ContractValidator::new().validate(&record).unwrap_err();
        assert_eq!(err.findings()[0].kind, "missing_parties");
    }

    #[test]
    fn test_missing_effective_date_is_low() {
        let mut record = complete();
        record.effective_date = None;
        let issue = ContractValidator::new()
            .validate(&record)
            .unwrap_err()
            .to_issue("job-1");
        assert_eq!(issue.issue_type, "missing_effective_date");
        assert_eq!(issue.severity, Severity::Low);
        assert!(!issue.requires_manual_review);
    }

    #[test]
    fn test_date_order_and_format() {
        let mut record = complete();
        record.expiration_date = Some("2023-06-30".to_string());
        let err = ContractValidator::new().validate(&record).unwrap_err();
        assert_eq!(err.to_issue("job-1").issue_type, "date_order");

        record.expiration_date = Some("June 2025".to_string());
        let err = ContractValidator::new().validate(&record).unwrap_err();
        assert_eq!(err.findings()[0].kind, "invalid_date");
    }

    #[test]
    fn test_issue_combines_findings() {
        let mut record = complete();
        record.parties.clear();
        record.total_value = Some(MonetaryAmount {
            amount: -5.0,
            currency: None,
        });
        let err = ContractValidator::new().validate(&record).unwrap_err();
        let issue = err.to_issue("job-1");

        assert_eq!(err.findings().len(), 2);
        assert_eq!(issue.severity, Severity::Medium);
        assert_eq!(issue.issue_type, "missing_parties");
        assert_eq!(
            issue.description,
            "No contracting parties identified; Contract value -5 is not a valid amount"
        );
        assert!(err.to_string().starts_with("Validation found 2 problem(s)"));
    }

    #[test]
    fn test_severity_and_status_parse() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("critical".parse::<Severity>().is_err());
        assert_eq!("resolved".parse::<IssueStatus>().unwrap(), IssueStatus::Resolved);
        assert!(Severity::High > Severity::Medium);
    }
}
