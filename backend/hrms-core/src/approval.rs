// src/approval.rs
use thiserror::Error;
use tracing::{info, warn};

use crate::models::*;
use crate::notification::{
    ClaimStatusMessage, LeaveStatusMessage, NotificationJob, NotificationQueue,
};
use crate::store::{HrStore, StoreError};

#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("{kind} {id} has already been processed ({status})")]
    AlreadyProcessed {
        kind: &'static str,
        id: u64,
        status: ReviewStatus,
    },
    #[error("No employee record is linked to user '{0}'")]
    ApproverNotFound(String),
    #[error("A reason is required to reject this request")]
    RejectReasonRequired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApprovalError {
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::NotFound { .. } => "NOT_FOUND",
            ApprovalError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
            ApprovalError::ApproverNotFound(_) => "APPROVER_NOT_FOUND",
            ApprovalError::RejectReasonRequired => "REJECT_REASON_REQUIRED",
            ApprovalError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve,
    Reject { reason: Option<String> },
}

impl Decision {
    fn status(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject { .. } => ReviewStatus::Rejected,
        }
    }

    fn reject_reason(&self) -> Option<String> {
        match self {
            Decision::Reject { reason } => reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from),
            Decision::Approve => None,
        }
    }
}

/// A record that moves from Pending to a terminal review status.
pub trait Reviewable {
    const KIND: &'static str;
    fn id(&self) -> u64;
    fn review_status(&self) -> ReviewStatus;
    fn record_decision(&mut self, status: ReviewStatus, approver: EmployeeId, reject_reason: Option<String>);
}

impl Reviewable for LeaveRequest {
    const KIND: &'static str = "Leave request";
    fn id(&self) -> u64 {
        self.id
    }
    fn review_status(&self) -> ReviewStatus {
        self.status
    }
    fn record_decision(&mut self, status: ReviewStatus, approver: EmployeeId, reject_reason: Option<String>) {
        self.status = status;
        self.approved_by = Some(approver);
        if reject_reason.is_some() {
            self.reject_reason = reject_reason;
        }
    }
}

impl Reviewable for ExpenseClaim {
    const KIND: &'static str = "Expense claim";
    fn id(&self) -> u64 {
        self.id
    }
    fn review_status(&self) -> ReviewStatus {
        self.status
    }
    fn record_decision(&mut self, status: ReviewStatus, approver: EmployeeId, reject_reason: Option<String>) {
        self.status = status;
        self.approved_by = Some(approver);
        if reject_reason.is_some() {
            self.reject_reason = reject_reason;
        }
    }
}

/// Applies the decision if the record is still pending.
pub fn apply_decision<R: Reviewable>(
    record: &mut R,
    decision: &Decision,
    approver: EmployeeId,
) -> Result<(), ApprovalError> {
    let status = record.review_status();
    if status != ReviewStatus::Pending {
        return Err(ApprovalError::AlreadyProcessed {
            kind: R::KIND,
            id: record.id(),
            status,
        });
    }
    record.record_decision(decision.status(), approver, decision.reject_reason());
    Ok(())
}

fn status_comment(decision: &Decision, approved_text: &str) -> String {
    match decision {
        Decision::Approve => approved_text.to_string(),
        Decision::Reject { .. } => decision
            .reject_reason()
            .unwrap_or_else(|| "No specific comment provided.".to_string()),
    }
}

#[derive(Clone)]
pub struct ApprovalService {
    store: HrStore,
    notifications: NotificationQueue,
}

impl ApprovalService {
    pub fn new(store: HrStore, notifications: NotificationQueue) -> Self {
        Self {
            store,
            notifications,
        }
    }

    fn resolve_approver(&self, acting_user: &str) -> Result<Employee, ApprovalError> {
        self.store
            .find_employee_by_user(acting_user)?
            .ok_or_else(|| ApprovalError::ApproverNotFound(acting_user.to_string()))
    }

    /// Guards: record exists, still pending, acting user has an employee record.
    fn guard<R: Reviewable>(&self, record: Option<R>, id: u64, acting_user: &str) -> Result<Employee, ApprovalError> {
        let record = record.ok_or(ApprovalError::NotFound { kind: R::KIND, id })?;
        let status = record.review_status();
        if status != ReviewStatus::Pending {
            warn!("{} {} already {}, ignoring decision", R::KIND, id, status);
            return Err(ApprovalError::AlreadyProcessed {
                kind: R::KIND,
                id,
                status,
            });
        }
        self.resolve_approver(acting_user).map_err(|e| {
            warn!("Decision on {} {} blocked: {}", R::KIND, id, e);
            e
        })
    }

    pub fn approve_leave(&self, leave_id: LeaveId, acting_user: &str) -> Result<LeaveRequest, ApprovalError> {
        self.decide_leave(leave_id, acting_user, Decision::Approve)
    }

    pub fn reject_leave(
        &self,
        leave_id: LeaveId,
        acting_user: &str,
        reason: Option<String>,
    ) -> Result<LeaveRequest, ApprovalError> {
        self.decide_leave(leave_id, acting_user, Decision::Reject { reason })
    }

    fn decide_leave(
        &self,
        leave_id: LeaveId,
        acting_user: &str,
        decision: Decision,
    ) -> Result<LeaveRequest, ApprovalError> {
        let approver = self.guard(self.store.get_leave(leave_id)?, leave_id, acting_user)?;
        let leave = self
            .store
            .update_leave(leave_id, |l| apply_decision(l, &decision, approver.id))?;
        info!(
            "Leave #{} {} by employee {}",
            leave.id, leave.status, approver.id
        );

        self.notify_leave(&leave, &decision);
        Ok(leave)
    }

    fn notify_leave(&self, leave: &LeaveRequest, decision: &Decision) {
        let requester = match self.store.get_employee(leave.employee_id) {
            Ok(Some(e)) => e,
            Ok(None) => return,
            Err(e) => {
                warn!("Skipping notification for leave #{}: {}", leave.id, e);
                return;
            }
        };
        if requester.email.trim().is_empty() {
            return;
        }
        let leave_type = self
            .store
            .get_leave_type(leave.leave_type_id)
            .ok()
            .flatten()
            .map(|t| t.name)
            .unwrap_or_else(|| "Leave".to_string());
        self.notifications.enqueue(NotificationJob::LeaveStatus {
            to: requester.email.clone(),
            message: LeaveStatusMessage {
                leave_id: leave.id,
                employee_name: requester.full_name(),
                leave_type,
                start_date: leave.start_date,
                end_date: leave.end_date,
                total_days: leave.day_count(),
                status: leave.status,
                comment: status_comment(decision, "Your leave has been approved by HR."),
            },
        });
    }

    pub fn approve_claim(&self, claim_id: ClaimId, acting_user: &str) -> Result<ExpenseClaim, ApprovalError> {
        self.decide_claim(claim_id, acting_user, Decision::Approve)
    }

    /// Claims can only be rejected with a non-blank reason.
    pub fn reject_claim(
        &self,
        claim_id: ClaimId,
        acting_user: &str,
        reason: Option<String>,
    ) -> Result<ExpenseClaim, ApprovalError> {
        let decision = Decision::Reject { reason };
        if decision.reject_reason().is_none() {
            return Err(ApprovalError::RejectReasonRequired);
        }
        self.decide_claim(claim_id, acting_user, decision)
    }

    fn decide_claim(
        &self,
        claim_id: ClaimId,
        acting_user: &str,
        decision: Decision,
    ) -> Result<ExpenseClaim, ApprovalError> {
        let approver = self.guard(self.store.get_claim(claim_id)?, claim_id, acting_user)?;
        let claim = self
            .store
            .update_claim(claim_id, |c| apply_decision(c, &decision, approver.id))?;
        info!(
            "Claim #{} {} by employee {}",
            claim.id, claim.status, approver.id
        );

        if let Ok(Some(requester)) = self.store.get_employee(claim.employee_id) {
            if !requester.email.trim().is_empty() {
                self.notifications.enqueue(NotificationJob::ClaimStatus {
                    to: requester.email.clone(),
                    message: ClaimStatusMessage {
                        claim_id: claim.id,
                        employee_name: requester.full_name(),
                        amount: claim.amount,
                        expense_date: claim.expense_date,
                        status: claim.status,
                        comment: status_comment(&decision, "Your claim has been approved by HR."),
                    },
                });
            }
        }
        Ok(claim)
    }
}

#[cfg(test)]
mod approval_tests {
    use super::*;
    use crate::store::test_support::employee;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    struct Env {
        service: ApprovalService,
        store: HrStore,
        outbox: UnboundedReceiver<NotificationJob>,
        requester: Employee,
        hr_user: String,
    }

    fn setup_test_environment() -> Env {
        let store = HrStore::new();
        store.seed_default_leave_types().unwrap();
        let (queue, outbox) = NotificationQueue::new();
        let requester = store
            .insert_employee(|id| employee(id, "amy@corp.test", d("2023-01-01"), dec!(3000)))
            .unwrap();
        let hr = store
            .insert_employee(|id| employee(id, "hr@corp.test", d("2020-01-01"), dec!(6000)))
            .unwrap();
        Env {
            service: ApprovalService::new(store.clone(), queue),
            store,
            outbox,
            requester,
            hr_user: hr.user_id,
        }
    }

    fn pending_leave(store: &HrStore, emp: EmployeeId, status: ReviewStatus) -> LeaveRequest {
        store
            .insert_leave(|id| LeaveRequest {
                id,
                employee_id: emp,
                leave_type_id: 1,
                start_date: d("2025-04-07"),
                end_date: d("2025-04-09"),
                reason: "trip".into(),
                status,
                reject_reason: None,
                proof_url: None,
                approved_by: None,
                submitted_at: d("2025-04-01").and_hms_opt(9, 0, 0).unwrap(),
            })
            .unwrap()
    }

    fn pending_claim(store: &HrStore, emp: EmployeeId) -> ExpenseClaim {
        store
            .insert_claim(|id| ExpenseClaim {
                id,
                employee_id: emp,
                claim_date: d("2025-04-02").and_hms_opt(9, 0, 0).unwrap(),
                expense_date: d("2025-04-01"),
                amount: dec!(120.40),
                description: "Taxi".into(),
                status: ReviewStatus::Pending,
                reject_reason: None,
                approved_by: None,
                documents: vec![],
            })
            .unwrap()
    }

    #[test]
    fn approving_sets_status_and_approver_and_notifies() {
        let mut env = setup_test_environment();
        let leave = pending_leave(&env.store, env.requester.id, ReviewStatus::Pending);

        let approved = env.service.approve_leave(leave.id, &env.hr_user).unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert!(approved.approved_by.is_some());
        assert_eq!(approved.reject_reason, None);

        match env.outbox.try_recv().unwrap() {
            NotificationJob::LeaveStatus { to, message } => {
                assert_eq!(to, "amy@corp.test");
                assert_eq!(message.status, ReviewStatus::Approved);
                assert_eq!(message.total_days, 3);
                assert_eq!(message.leave_type, "Annual Leave");
                assert_eq!(message.comment, "Your leave has been approved by HR.");
            }
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[test]
    fn rejecting_with_reason_records_it() {
        let mut env = setup_test_environment();
        let leave = pending_leave(&env.store, env.requester.id, ReviewStatus::Pending);
        let rejected = env
            .service
            .reject_leave(leave.id, &env.hr_user, Some("  Peak season  ".into()))
            .unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.reject_reason.as_deref(), Some("Peak season"));
        let NotificationJob::LeaveStatus { message, .. } = env.outbox.try_recv().unwrap() else {
            panic!("expected leave notification")
        };
        assert_eq!(message.comment, "Peak season");
    }

    #[test]
    fn blank_leave_rejection_reason_is_not_stored() {
        let env = setup_test_environment();
        let leave = pending_leave(&env.store, env.requester.id, ReviewStatus::Pending);
        let rejected = env
            .service
            .reject_leave(leave.id, &env.hr_user, Some("   ".into()))
            .unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.reject_reason, None);
    }

    #[test]
    fn approving_rejected_leave_is_a_no_op() {
        let mut env = setup_test_environment();
        let leave = pending_leave(&env.store, env.requester.id, ReviewStatus::Rejected);

        let err = env.service.approve_leave(leave.id, &env.hr_user).unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyProcessed { status: ReviewStatus::Rejected, .. }
        ));
        assert_eq!(env.store.get_leave(leave.id).unwrap().unwrap(), leave);
        assert!(env.outbox.try_recv().is_err());
    }

    #[test]
    fn guards_run_in_order() {
        let env = setup_test_environment();
        assert!(matches!(
            env.service.approve_leave(4040, "nobody"),
            Err(ApprovalError::NotFound { id: 4040, .. })
        ));

        let done = pending_leave(&env.store, env.requester.id, ReviewStatus::Approved);
        assert!(matches!(
            env.service.approve_leave(done.id, "nobody"),
            Err(ApprovalError::AlreadyProcessed { .. })
        ));

        let open = pending_leave(&env.store, env.requester.id, ReviewStatus::Pending);
        assert!(matches!(
            env.service.approve_leave(open.id, "nobody"),
            Err(ApprovalError::ApproverNotFound(_))
        ));
        assert_eq!(
            env.store.get_leave(open.id).unwrap().unwrap().status,
            ReviewStatus::Pending
        );
    }

    #[test]
    fn missing_email_skips_notification() {
        let mut env = setup_test_environment();
        env.store
            .update_employee(env.requester.id, |e| e.email = String::new())
            .unwrap();
        let leave = pending_leave(&env.store, env.requester.id, ReviewStatus::Pending);
        env.service.approve_leave(leave.id, &env.hr_user).unwrap();
        assert!(env.outbox.try_recv().is_err());
    }

    #[test]
    fn claim_rejection_needs_reason() {
        let env = setup_test_environment();
        let claim = pending_claim(&env.store, env.requester.id);
        assert!(matches!(
            env.service.reject_claim(claim.id, &env.hr_user, None),
            Err(ApprovalError::RejectReasonRequired)
        ));
        assert!(matches!(
            env.service.reject_claim(claim.id, &env.hr_user, Some(" ".into())),
            Err(ApprovalError::RejectReasonRequired)
        ));
        let rejected = env
            .service
            .reject_claim(claim.id, &env.hr_user, Some("No receipt".into()))
            .unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.reject_reason.as_deref(), Some("No receipt"));
    }

    #[test]
    fn claim_approval_notifies_requester() {
        let mut env = setup_test_environment();
        let claim = pending_claim(&env.store, env.requester.id);
        let approved = env.service.approve_claim(claim.id, &env.hr_user).unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert!(matches!(
            env.outbox.try_recv().unwrap(),
            NotificationJob::ClaimStatus { .. }
        ));
        assert!(matches!(
            env.service.approve_claim(claim.id, &env.hr_user),
            Err(ApprovalError::AlreadyProcessed { .. })
        ));
    }
}
