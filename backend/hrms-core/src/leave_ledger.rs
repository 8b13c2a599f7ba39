// src/leave_ledger.rs
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::*;
use crate::storage::{upload_document, ObjectStorage, StorageError, UploadDocument};
use crate::store::{constraint, HrStore, StoreError};

// --- Error Types ---

#[derive(Error, Debug)]
pub enum LeaveError {
    #[error("End date {end} is before start date {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("Employee {0} not found")]
    EmployeeNotFound(EmployeeId),
    #[error("Leave type {0} not found")]
    LeaveTypeNotFound(LeaveTypeId),
    #[error("No {leave_type} entitlement for {year}")]
    NoEntitlement { leave_type: String, year: i32 },
    #[error("Insufficient {leave_type} balance: requested {requested} day(s), {remaining} remaining")]
    InsufficientBalance {
        leave_type: String,
        requested: i64,
        remaining: Decimal,
    },
    #[error("{0} requires a supporting document")]
    ProofRequired(String),
    #[error("Proof upload failed: {0}")]
    UploadFailed(#[source] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaveError {
    pub fn code(&self) -> &'static str {
        match self {
            LeaveError::InvalidRange { .. } => "INVALID_RANGE",
            LeaveError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            LeaveError::LeaveTypeNotFound(_) => "LEAVE_TYPE_NOT_FOUND",
            LeaveError::NoEntitlement { .. } => "NO_ENTITLEMENT",
            LeaveError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LeaveError::ProofRequired(_) => "PROOF_REQUIRED",
            LeaveError::UploadFailed(e) => e.code(),
            LeaveError::Store(e) => e.code(),
        }
    }
}

// --- Ledger Structures ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveBalance {
    pub leave_type_id: LeaveTypeId,
    pub leave_type: String,
    pub category: LeaveCategory,
    pub total_entitlement: Decimal,
    pub days_taken: i64,
    pub days_remaining: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntitlementGrant {
    pub year: i32,
    pub created: Vec<LeaveEntitlement>,
    /// Leave types that already had a row for the year.
    pub skipped: Vec<LeaveTypeId>,
}

#[derive(Debug, Clone)]
pub struct LeaveApplication {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub proof: Option<UploadDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveTypeUsage {
    pub leave_type: String,
    pub requests: usize,
    pub total_days: i64,
}

/// Balances for every entitlement row of `year`. Pending and approved requests
/// starting in `year` count as taken; a request spanning New Year is charged
/// entirely to its start year.
pub fn tally_balances(
    entitlements: &[LeaveEntitlement],
    leave_types: &[LeaveType],
    leaves: &[LeaveRequest],
    year: i32,
) -> Vec<LeaveBalance> {
    entitlements
        .iter()
        .filter(|e| e.year == year)
        .map(|ent| {
            let days_taken: i64 = leaves
                .iter()
                .filter(|l| {
                    l.leave_type_id == ent.leave_type_id
                        && l.start_date.year() == year
                        && l.status.consumes_balance()
                })
                .map(LeaveRequest::day_count)
                .sum();
            let leave_type = leave_types.iter().find(|t| t.id == ent.leave_type_id);
            LeaveBalance {
                leave_type_id: ent.leave_type_id,
                leave_type: leave_type
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| format!("Leave type {}", ent.leave_type_id)),
                category: leave_type.map_or(LeaveCategory::Other, |t| t.category),
                total_entitlement: ent.total_days,
                days_taken,
                days_remaining: (ent.total_days - Decimal::from(days_taken)).max(Decimal::ZERO),
            }
        })
        .collect()
}

/// Annual allotment for someone joining in `join_month` of the current year:
/// `round(base * monthsRemaining / 12)` with ties to even.
pub fn prorated_annual_days(base: Decimal, join_month: u32) -> Decimal {
    let months_remaining = Decimal::from(12 - (join_month.clamp(1, 12) - 1));
    (base * months_remaining / Decimal::from(12))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

// --- Ledger Service ---

#[derive(Clone)]
pub struct LeaveLedger {
    store: HrStore,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    upload_timeout: Duration,
}

impl LeaveLedger {
    pub fn new(
        store: HrStore,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn ObjectStorage>,
        bucket: String,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            storage,
            bucket,
            upload_timeout,
        }
    }

    pub fn compute_balances(
        &self,
        employee_id: EmployeeId,
        year: i32,
    ) -> Result<Vec<LeaveBalance>, LeaveError> {
        if self.store.get_employee(employee_id)?.is_none() {
            return Err(LeaveError::EmployeeNotFound(employee_id));
        }
        let entitlements = self.store.entitlements_for(employee_id, year)?;
        let leave_types = self.store.list_leave_types()?;
        let leaves = self.store.leaves_for_employee(employee_id)?;
        Ok(tally_balances(&entitlements, &leave_types, &leaves, year))
    }

    /// Creates default entitlement rows for the join year. Safe to call twice.
    pub fn initialize_entitlements(
        &self,
        employee_id: EmployeeId,
        join_date: NaiveDate,
    ) -> Result<EntitlementGrant, LeaveError> {
        let year = join_date.year();
        let current_year = self.clock.today().year();
        let mut grant = EntitlementGrant {
            year,
            ..EntitlementGrant::default()
        };

        for leave_type in self.store.list_leave_types()? {
            let Some(base) = leave_type.category.default_entitlement_days() else {
                continue;
            };
            let total_days = if leave_type.category == LeaveCategory::Annual && year == current_year {
                prorated_annual_days(base, join_date.month())
            } else {
                base
            };

            match self
                .store
                .insert_entitlement(employee_id, leave_type.id, year, total_days)
            {
                Ok(row) => grant.created.push(row),
                Err(e) if e.is_unique_violation(constraint::ENTITLEMENT) => {
                    debug!(
                        "Entitlement for employee {} type '{}' {} already exists",
                        employee_id, leave_type.name, year
                    );
                    grant.skipped.push(leave_type.id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Initialized entitlements for employee {} ({}): {} created, {} skipped",
            employee_id,
            year,
            grant.created.len(),
            grant.skipped.len()
        );
        Ok(grant)
    }

    fn check_balance(
        &self,
        employee_id: EmployeeId,
        leave_type: &LeaveType,
        start_date: NaiveDate,
        requested: i64,
    ) -> Result<(), LeaveError> {
        if leave_type.category == LeaveCategory::Unpaid {
            return Ok(());
        }
        let year = start_date.year();
        let balance = self
            .compute_balances(employee_id, year)?
            .into_iter()
            .find(|b| b.leave_type_id == leave_type.id)
            .ok_or_else(|| LeaveError::NoEntitlement {
                leave_type: leave_type.name.clone(),
                year,
            })?;
        if Decimal::from(requested) > balance.days_remaining {
            return Err(LeaveError::InsufficientBalance {
                leave_type: leave_type.name.clone(),
                requested,
                remaining: balance.days_remaining,
            });
        }
        Ok(())
    }

    pub async fn submit_leave(&self, application: LeaveApplication) -> Result<LeaveRequest, LeaveError> {
        let LeaveApplication {
            employee_id,
            leave_type_id,
            start_date,
            end_date,
            reason,
            proof,
        } = application;

        if end_date < start_date {
            warn!(
                "Leave rejected for employee {}: end {} before start {}",
                employee_id, end_date, start_date
            );
            return Err(LeaveError::InvalidRange {
                start: start_date,
                end: end_date,
            });
        }
        let requested = inclusive_day_count(start_date, end_date);

        if self.store.get_employee(employee_id)?.is_none() {
            return Err(LeaveError::EmployeeNotFound(employee_id));
        }
        let leave_type = self
            .store
            .get_leave_type(leave_type_id)?
            .ok_or(LeaveError::LeaveTypeNotFound(leave_type_id))?;

        self.check_balance(employee_id, &leave_type, start_date, requested)?;

        if leave_type.needs_proof() && proof.is_none() {
            warn!(
                "Leave rejected for employee {}: {} without proof",
                employee_id, leave_type.name
            );
            return Err(LeaveError::ProofRequired(leave_type.name.clone()));
        }

        let proof_url = match &proof {
            Some(doc) => Some(
                upload_document(
                    self.storage.as_ref(),
                    &self.bucket,
                    &format!("leave-proofs/{employee_id}"),
                    doc,
                    self.upload_timeout,
                )
                .await
                .map_err(LeaveError::UploadFailed)?,
            ),
            None => None,
        };

        let submitted_at = self.clock.now();
        let leave = self.store.with_employee_lock(employee_id, || {
            // Balance may have moved while the proof was uploading.
            self.check_balance(employee_id, &leave_type, start_date, requested)?;
            self.store
                .insert_leave(|id| LeaveRequest {
                    id,
                    employee_id,
                    leave_type_id,
                    start_date,
                    end_date,
                    reason,
                    status: ReviewStatus::Pending,
                    reject_reason: None,
                    proof_url,
                    approved_by: None,
                    submitted_at,
                })
                .map_err(LeaveError::from)
        })??;

        info!(
            "Leave #{} submitted: employee {}, {} {}..{} ({} day(s))",
            leave.id, employee_id, leave_type.name, start_date, end_date, requested
        );
        Ok(leave)
    }

    /// Approved leave starting in the month, grouped by leave type name.
    pub fn leave_summary(&self, month: u32, year: i32) -> Result<Vec<LeaveTypeUsage>, LeaveError> {
        let leave_types = self.store.list_leave_types()?;
        let mut usage: BTreeMap<String, LeaveTypeUsage> = BTreeMap::new();
        for leave in self.store.list_leaves()?.into_iter().filter(|l| {
            l.status == ReviewStatus::Approved
                && l.start_date.month() == month
                && l.start_date.year() == year
        }) {
            let name = leave_types
                .iter()
                .find(|t| t.id == leave.leave_type_id)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let entry = usage.entry(name.clone()).or_insert(LeaveTypeUsage {
                leave_type: name,
                requests: 0,
                total_days: 0,
            });
            entry.requests += 1;
            entry.total_days += leave.day_count();
        }
        Ok(usage.into_values().collect())
    }
}

#[cfg(test)]
mod leave_ledger_tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::storage::InMemoryStorage;
    use crate::store::test_support::{employee, leave_type_id};
    use bytes::Bytes;
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn setup_test_environment() -> (LeaveLedger, HrStore, TestClock, InMemoryStorage) {
        let store = HrStore::new();
        store.seed_default_leave_types().unwrap();
        let clock = TestClock::new("2025-06-15 10:00:00");
        let storage = InMemoryStorage::new();
        let ledger = LeaveLedger::new(
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(storage.clone()),
            "test-bucket".into(),
            Duration::from_secs(1),
        );
        (ledger, store, clock, storage)
    }

    fn hire(store: &HrStore, email: &str, join: &str) -> EmployeeId {
        store
            .insert_employee(|id| employee(id, email, d(join), dec!(3100)))
            .unwrap()
            .id
    }

    fn proof() -> UploadDocument {
        UploadDocument {
            file_name: "mc.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.4"),
        }
    }

    fn application(
        employee_id: EmployeeId,
        leave_type_id: LeaveTypeId,
        start: &str,
        end: &str,
    ) -> LeaveApplication {
        LeaveApplication {
            employee_id,
            leave_type_id,
            start_date: d(start),
            end_date: d(end),
            reason: "family trip".into(),
            proof: None,
        }
    }

    fn insert_leave(store: &HrStore, emp: EmployeeId, lt: LeaveTypeId, start: &str, end: &str, status: ReviewStatus) {
        store
            .insert_leave(|id| LeaveRequest {
                id,
                employee_id: emp,
                leave_type_id: lt,
                start_date: d(start),
                end_date: d(end),
                reason: "seed".into(),
                status,
                reject_reason: None,
                proof_url: None,
                approved_by: None,
                submitted_at: d("2025-01-01").and_hms_opt(9, 0, 0).unwrap(),
            })
            .unwrap();
    }

    #[test]
    fn pending_and_approved_leave_reduce_balance_rejected_does_not() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        store.insert_entitlement(emp, annual, 2025, dec!(14)).unwrap();

        insert_leave(&store, emp, annual, "2025-01-06", "2025-01-08", ReviewStatus::Approved);
        insert_leave(&store, emp, annual, "2025-02-03", "2025-02-04", ReviewStatus::Pending);
        insert_leave(&store, emp, annual, "2025-03-03", "2025-03-07", ReviewStatus::Rejected);
        insert_leave(&store, emp, annual, "2024-12-02", "2024-12-03", ReviewStatus::Approved);

        let balances = ledger.compute_balances(emp, 2025).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].days_taken, 5);
        assert_eq!(balances[0].days_remaining, dec!(9));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let emergency = leave_type_id(&store, LeaveCategory::Emergency);
        store.insert_entitlement(emp, emergency, 2025, dec!(3)).unwrap();
        insert_leave(&store, emp, emergency, "2025-04-01", "2025-04-05", ReviewStatus::Approved);

        let balances = ledger.compute_balances(emp, 2025).unwrap();
        assert_eq!(balances[0].days_taken, 5);
        assert_eq!(balances[0].days_remaining, Decimal::ZERO);
    }

    #[test]
    fn types_without_entitlement_are_absent() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let sick = leave_type_id(&store, LeaveCategory::Sick);
        store.insert_entitlement(emp, sick, 2025, dec!(14)).unwrap();

        let balances = ledger.compute_balances(emp, 2025).unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].category, LeaveCategory::Sick);
        assert!(ledger.compute_balances(emp, 2024).unwrap().is_empty());
    }

    #[test]
    fn year_spanning_leave_is_charged_to_start_year() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        store.insert_entitlement(emp, annual, 2024, dec!(14)).unwrap();
        store.insert_entitlement(emp, annual, 2025, dec!(14)).unwrap();
        insert_leave(&store, emp, annual, "2024-12-30", "2025-01-02", ReviewStatus::Approved);

        assert_eq!(ledger.compute_balances(emp, 2024).unwrap()[0].days_taken, 4);
        assert_eq!(ledger.compute_balances(emp, 2025).unwrap()[0].days_taken, 0);
    }

    #[test]
    fn joining_in_june_of_current_year_prorates_annual_only() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "new@corp.test", "2025-06-01");
        let grant = ledger.initialize_entitlements(emp, d("2025-06-01")).unwrap();
        assert_eq!(grant.year, 2025);
        assert_eq!(grant.created.len(), 5);

        let days_for = |category| {
            let lt = leave_type_id(&store, category);
            grant
                .created
                .iter()
                .find(|e| e.leave_type_id == lt)
                .map(|e| e.total_days)
                .unwrap()
        };
        assert_eq!(days_for(LeaveCategory::Annual), dec!(8));
        assert_eq!(days_for(LeaveCategory::Sick), dec!(14));
        assert_eq!(days_for(LeaveCategory::Unpaid), dec!(0));
        assert_eq!(days_for(LeaveCategory::Emergency), dec!(3));
        assert_eq!(days_for(LeaveCategory::Hospitalization), dec!(60));
    }

    #[test]
    fn joining_in_earlier_year_gets_full_annual() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "old@corp.test", "2024-09-01");
        let grant = ledger.initialize_entitlements(emp, d("2024-09-01")).unwrap();
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        let row = grant.created.iter().find(|e| e.leave_type_id == annual).unwrap();
        assert_eq!(row.year, 2024);
        assert_eq!(row.total_days, dec!(14));
    }

    #[test]
    fn proration_rounds_half_to_even() {
        assert_eq!(prorated_annual_days(dec!(14), 1), dec!(14));
        assert_eq!(prorated_annual_days(dec!(14), 4), dec!(10)); // 10.5
        assert_eq!(prorated_annual_days(dec!(14), 10), dec!(4)); // 3.5
        assert_eq!(prorated_annual_days(dec!(14), 12), dec!(1));
    }

    #[test]
    fn second_initialization_creates_nothing() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "new@corp.test", "2025-06-01");
        ledger.initialize_entitlements(emp, d("2025-06-01")).unwrap();
        let again = ledger.initialize_entitlements(emp, d("2025-06-01")).unwrap();
        assert!(again.created.is_empty());
        assert_eq!(again.skipped.len(), 5);
        assert_eq!(store.entitlements_for(emp, 2025).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn end_before_start_is_rejected() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        let result = ledger
            .submit_leave(application(emp, annual, "2025-07-05", "2025-07-01"))
            .await;
        assert!(matches!(result, Err(LeaveError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn request_above_remaining_is_rejected() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        store.insert_entitlement(emp, annual, 2025, dec!(3)).unwrap();

        let err = ledger
            .submit_leave(application(emp, annual, "2025-07-01", "2025-07-04"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(store.leaves_for_employee(emp).unwrap().is_empty());

        let ok = ledger
            .submit_leave(application(emp, annual, "2025-07-01", "2025-07-03"))
            .await
            .unwrap();
        assert_eq!(ok.status, ReviewStatus::Pending);
        assert_eq!(ok.approved_by, None);
        assert_eq!(ok.submitted_at, d("2025-06-15").and_hms_opt(10, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn missing_entitlement_row_is_reported() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let emergency = leave_type_id(&store, LeaveCategory::Emergency);
        let err = ledger
            .submit_leave(application(emp, emergency, "2025-07-01", "2025-07-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, LeaveError::NoEntitlement { year: 2025, .. }));
    }

    #[tokio::test]
    async fn unpaid_leave_skips_balance_check() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let unpaid = leave_type_id(&store, LeaveCategory::Unpaid);
        let leave = ledger
            .submit_leave(application(emp, unpaid, "2025-08-01", "2025-08-20"))
            .await
            .unwrap();
        assert_eq!(leave.day_count(), 20);
    }

    #[tokio::test]
    async fn sick_leave_requires_proof() {
        let (ledger, store, _, storage) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let sick = leave_type_id(&store, LeaveCategory::Sick);
        store.insert_entitlement(emp, sick, 2025, dec!(14)).unwrap();

        let err = ledger
            .submit_leave(application(emp, sick, "2025-06-16", "2025-06-17"))
            .await
            .unwrap_err();
        assert!(matches!(err, LeaveError::ProofRequired(_)));

        let leave = ledger
            .submit_leave(LeaveApplication {
                proof: Some(proof()),
                ..application(emp, sick, "2025-06-16", "2025-06-17")
            })
            .await
            .unwrap();
        assert!(leave.proof_url.as_deref().unwrap().contains("leave-proofs/"));
        assert_eq!(storage.object_count(), 1);
    }

    #[tokio::test]
    async fn failed_upload_writes_nothing() {
        let (ledger, store, _, storage) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let hosp = leave_type_id(&store, LeaveCategory::Hospitalization);
        store.insert_entitlement(emp, hosp, 2025, dec!(60)).unwrap();
        storage.set_failing(true);

        let err = ledger
            .submit_leave(LeaveApplication {
                proof: Some(proof()),
                ..application(emp, hosp, "2025-06-20", "2025-06-25")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LeaveError::UploadFailed(_)));
        assert!(store.leaves_for_employee(emp).unwrap().is_empty());
    }

    #[test]
    fn summary_groups_approved_leave_by_type() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-02-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        let sick = leave_type_id(&store, LeaveCategory::Sick);
        insert_leave(&store, emp, annual, "2025-05-05", "2025-05-06", ReviewStatus::Approved);
        insert_leave(&store, emp, annual, "2025-05-20", "2025-05-20", ReviewStatus::Approved);
        insert_leave(&store, emp, sick, "2025-05-12", "2025-05-14", ReviewStatus::Approved);
        insert_leave(&store, emp, sick, "2025-05-26", "2025-05-27", ReviewStatus::Pending);
        insert_leave(&store, emp, annual, "2025-06-02", "2025-06-02", ReviewStatus::Approved);

        let summary = ledger.leave_summary(5, 2025).unwrap();
        assert_eq!(
            summary,
            vec![
                LeaveTypeUsage {
                    leave_type: "Annual Leave".into(),
                    requests: 2,
                    total_days: 3
                },
                LeaveTypeUsage {
                    leave_type: "Sick Leave".into(),
                    requests: 1,
                    total_days: 3
                },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_submissions_cannot_overspend_balance() {
        let (ledger, store, _, _) = setup_test_environment();
        let emp = hire(&store, "amy@corp.test", "2023-01-01");
        let annual = leave_type_id(&store, LeaveCategory::Annual);
        store.insert_entitlement(emp, annual, 2025, dec!(14)).unwrap();

        // Each request fits the 14 days alone, together they do not.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let handles: Vec<_> = [("2025-07-01", "2025-07-10"), ("2025-08-01", "2025-08-10")]
            .into_iter()
            .map(|(start, end)| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                let app = application(emp, annual, start, end);
                tokio::spawn(async move {
                    barrier.wait().await;
                    ledger.submit_leave(app).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(store.leaves_for_employee(emp).unwrap().len(), 1);
    }
}
