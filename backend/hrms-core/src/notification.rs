// src/notification.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::models::{ClaimId, LeaveId, ReviewStatus};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendError(String),
    #[error("Invalid notification target: {0}")]
    InvalidTarget(String),
}

impl NotificationError {
    pub fn code(&self) -> &'static str {
        match self {
            NotificationError::SendError(_) => "NOTIFICATION_SEND_FAILED",
            NotificationError::InvalidTarget(_) => "NOTIFICATION_INVALID_TARGET",
        }
    }
}

// --- Messages ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveStatusMessage {
    pub leave_id: LeaveId,
    pub employee_name: String,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i64,
    pub status: ReviewStatus,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimStatusMessage {
    pub claim_id: ClaimId,
    pub employee_name: String,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    pub status: ReviewStatus,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum NotificationJob {
    LeaveStatus { to: String, message: LeaveStatusMessage },
    ClaimStatus { to: String, message: ClaimStatusMessage },
}

impl NotificationJob {
    pub fn recipient(&self) -> &str {
        match self {
            NotificationJob::LeaveStatus { to, .. } | NotificationJob::ClaimStatus { to, .. } => to,
        }
    }
}

pub fn render_leave_status(message: &LeaveStatusMessage) -> (String, String) {
    let subject = format!("Leave Request {}", message.status);
    let body = format!(
        "Dear {},\n\nYour {} request from {} to {} ({} day(s)) has been {}.\n\nComment: {}\n",
        message.employee_name,
        message.leave_type,
        message.start_date.format("%d/%m/%Y"),
        message.end_date.format("%d/%m/%Y"),
        message.total_days,
        message.status.as_str().to_lowercase(),
        message.comment
    );
    (subject, body)
}

pub fn render_claim_status(message: &ClaimStatusMessage) -> (String, String) {
    let subject = format!("Expense Claim {}", message.status);
    let body = format!(
        "Dear {},\n\nYour expense claim of RM {:.2} for {} has been {}.\n\nComment: {}\n",
        message.employee_name,
        message.amount,
        message.expense_date.format("%d/%m/%Y"),
        message.status.as_str().to_lowercase(),
        message.comment
    );
    (subject, body)
}

// --- Sink ---

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn send_leave_status(
        &self,
        message: &LeaveStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError>;

    async fn send_claim_status(
        &self,
        message: &ClaimStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError>;
}

/// Relays rendered messages to an HTTP mail gateway.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self, NotificationError> {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(NotificationError::InvalidTarget(format!(
                "Invalid webhook URL: {}",
                webhook_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::SendError(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    async fn post(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        if !to.contains('@') {
            return Err(NotificationError::InvalidTarget(format!(
                "Invalid email address: {}",
                to
            )));
        }

        let payload = serde_json::json!({
            "to": to,
            "subject": subject,
            "body": body,
            "sent_at": chrono::Utc::now(),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::SendError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(NotificationError::SendError(format!(
                "Webhook error: {} - {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusNotifier for WebhookNotifier {
    async fn send_leave_status(
        &self,
        message: &LeaveStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError> {
        let (subject, body) = render_leave_status(message);
        self.post(to, &subject, &body).await
    }

    async fn send_claim_status(
        &self,
        message: &ClaimStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError> {
        let (subject, body) = render_claim_status(message);
        self.post(to, &subject, &body).await
    }
}

/// Writes messages to the log. Used when no relay is configured.
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn send_leave_status(
        &self,
        message: &LeaveStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError> {
        let (subject, _) = render_leave_status(message);
        info!("[notify {}] {} (leave #{})", to, subject, message.leave_id);
        Ok(())
    }

    async fn send_claim_status(
        &self,
        message: &ClaimStatusMessage,
        to: &str,
    ) -> Result<(), NotificationError> {
        let (subject, _) = render_claim_status(message);
        info!("[notify {}] {} (claim #{})", to, subject, message.claim_id);
        Ok(())
    }
}

// --- Queue & worker ---

#[derive(Clone)]
pub struct NotificationQueue {
    sender: UnboundedSender<NotificationJob>,
}

impl NotificationQueue {
    pub fn new() -> (Self, UnboundedReceiver<NotificationJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Never fails the caller; a closed queue is logged.
    pub fn enqueue(&self, job: NotificationJob) {
        let to = job.recipient().to_string();
        if let Err(e) = self.sender.send(job) {
            error!("Notification for {} dropped, queue closed: {:?}", to, e.0);
        } else {
            debug!("Queued notification for {}", to);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (1-based) plus up to 50% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_cap = (exp.as_millis() as u64) / 2;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

async fn send_once(notifier: &dyn StatusNotifier, job: &NotificationJob) -> Result<(), NotificationError> {
    match job {
        NotificationJob::LeaveStatus { to, message } => notifier.send_leave_status(message, to).await,
        NotificationJob::ClaimStatus { to, message } => notifier.send_claim_status(message, to).await,
    }
}

/// Returns `true` when the job was delivered within the allowed attempts.
pub async fn deliver_with_retry(
    notifier: &dyn StatusNotifier,
    job: &NotificationJob,
    policy: &RetryPolicy,
) -> bool {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match send_once(notifier, job).await {
            Ok(()) => {
                info!("Notification delivered to {} (attempt {})", job.recipient(), attempt);
                return true;
            }
            Err(e @ NotificationError::InvalidTarget(_)) => {
                warn!("Dropping notification ({}): {}", e.code(), e);
                return false;
            }
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Notification to {} failed (attempt {}/{}, {}): {}. Retrying in {:?}",
                    job.recipient(),
                    attempt,
                    attempts,
                    e.code(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Notification to {} dropped after {} attempts ({}): {}",
                    job.recipient(),
                    attempts,
                    e.code(),
                    e
                );
            }
        }
    }
    false
}

pub async fn run_notification_worker(
    mut receiver: UnboundedReceiver<NotificationJob>,
    notifier: Arc<dyn StatusNotifier>,
    policy: RetryPolicy,
) {
    info!(
        "Notification worker started (max {} attempts)",
        policy.max_attempts
    );
    while let Some(job) = receiver.recv().await {
        deliver_with_retry(notifier.as_ref(), &job, &policy).await;
    }
    info!("Notification queue closed, worker exiting");
}

#[cfg(test)]
pub use recording::RecordingNotifier;

#[cfg(test)]
mod recording {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    /// Records delivered jobs; fails the first `fail_first` sends.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub delivered: Mutex<Vec<NotificationJob>>,
        pub attempts: AtomicU32,
        fail_first: u32,
    }

    impl RecordingNotifier {
        pub fn failing_first(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn record(&self, job: NotificationJob) -> Result<(), NotificationError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err(NotificationError::SendError(format!("attempt {attempt} refused")));
            }
            self.delivered.lock().unwrap().push(job);
            Ok(())
        }
    }

    #[async_trait]
    impl StatusNotifier for RecordingNotifier {
        async fn send_leave_status(
            &self,
            message: &LeaveStatusMessage,
            to: &str,
        ) -> Result<(), NotificationError> {
            self.record(NotificationJob::LeaveStatus {
                to: to.to_string(),
                message: message.clone(),
            })
        }

        async fn send_claim_status(
            &self,
            message: &ClaimStatusMessage,
            to: &str,
        ) -> Result<(), NotificationError> {
            self.record(NotificationJob::ClaimStatus {
                to: to.to_string(),
                message: message.clone(),
            })
        }
    }
}
