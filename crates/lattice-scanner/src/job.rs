//! Scan Job progress
//!
//! A scan Job's logs are only complete once the Job has finished, so callers
//! check [`ScanJobStatus`] before handing container output to the report
//! adapter.

use std::fmt;

use k8s_openapi::api::batch::v1::{Job, JobCondition};
use serde::Serialize;

/// Lifecycle phase of a scan Job
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "PascalCase")]
pub enum ScanJobStatus {
    /// No scan pod is running yet
    Pending,
    /// The scan pod is running
    Running,
    /// Every scan container exited successfully; reports can be parsed
    Complete,
    /// The Job failed; with `backoffLimit: 0` this is final
    Failed {
        /// Machine-readable reason, e.g. `DeadlineExceeded`
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Human-readable message from the Job controller
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ScanJobStatus {
    /// Derive the phase from a Job's status conditions and active pod count
    pub fn of(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return Self::Pending;
        };

        let conditions = status.conditions.as_deref().unwrap_or_default();
        if let Some(failed) = true_condition(conditions, "Failed") {
            return Self::Failed {
                reason: failed.reason.clone(),
                message: failed.message.clone(),
            };
        }
        if true_condition(conditions, "Complete").is_some() {
            return Self::Complete;
        }

        if status.active.unwrap_or(0) > 0 {
            Self::Running
        } else {
            Self::Pending
        }
    }

    /// Whether the Job will make no further progress
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }
}

impl fmt::Display for ScanJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed { reason, message } => {
                write!(f, "Failed")?;
                if let Some(reason) = reason {
                    write!(f, " ({})", reason)?;
                }
                if let Some(message) = message {
                    write!(f, ": {}", message)?;
                }
                Ok(())
            }
        }
    }
}

fn true_condition<'a>(conditions: &'a [JobCondition], type_: &str) -> Option<&'a JobCondition> {
    conditions
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    fn job(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    fn condition(type_: &str, status: &str) -> JobCondition {
        JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn job_without_status_is_pending() {
        let status = ScanJobStatus::of(&Job::default());
        assert_eq!(status, ScanJobStatus::Pending);
        assert!(!status.is_finished());
    }

    #[test]
    fn active_pod_is_running() {
        let status = ScanJobStatus::of(&job(JobStatus {
            active: Some(1),
            ..Default::default()
        }));
        assert_eq!(status, ScanJobStatus::Running);
    }

    #[test]
    fn complete_condition_finishes_the_scan() {
        let status = ScanJobStatus::of(&job(JobStatus {
            succeeded: Some(1),
            conditions: Some(vec![condition("Complete", "True")]),
            ..Default::default()
        }));
        assert_eq!(status, ScanJobStatus::Complete);
        assert!(status.is_finished());
    }

    #[test]
    fn deadline_failure_carries_reason_and_message() {
        let status = ScanJobStatus::of(&job(JobStatus {
            conditions: Some(vec![JobCondition {
                reason: Some("DeadlineExceeded".to_string()),
                message: Some("Job was active longer than specified deadline".to_string()),
                ..condition("Failed", "True")
            }]),
            ..Default::default()
        }));

        assert!(status.is_finished());
        assert_eq!(
            status.to_string(),
            "Failed (DeadlineExceeded): Job was active longer than specified deadline"
        );
    }

    #[test]
    fn stale_conditions_are_ignored() {
        let status = ScanJobStatus::of(&job(JobStatus {
            active: Some(1),
            conditions: Some(vec![condition("Failed", "False")]),
            ..Default::default()
        }));
        assert_eq!(status, ScanJobStatus::Running);
    }

    #[test]
    fn serializes_with_phase_tag() {
        let failed = ScanJobStatus::Failed {
            reason: Some("BackoffLimitExceeded".to_string()),
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"phase": "Failed", "reason": "BackoffLimitExceeded"})
        );
        assert_eq!(
            serde_json::to_value(ScanJobStatus::Complete).unwrap(),
            serde_json::json!({"phase": "Complete"})
        );
    }
}
