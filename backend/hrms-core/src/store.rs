// src/store.rs
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::*;

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Unique constraint '{constraint}' violated: {detail}")]
    UniqueViolation {
        constraint: &'static str,
        detail: String,
    },
    #[error("Store table '{0}' is unavailable (lock poisoned)")]
    LockPoisoned(&'static str),
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::UniqueViolation { .. } => "UNIQUE_VIOLATION",
            StoreError::LockPoisoned(_) => "STORE_UNAVAILABLE",
            StoreError::Snapshot(_) => "SNAPSHOT_FAILED",
        }
    }

    pub fn is_unique_violation(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint, .. } if *constraint == name)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub mod constraint {
    pub const EMPLOYEE_EMAIL: &str = "employee_email";
    pub const EMPLOYEE_CONTACT: &str = "employee_contact_number";
    pub const EMPLOYEE_USER: &str = "employee_user_id";
    pub const ENTITLEMENT: &str = "leave_entitlement_employee_type_year";
    pub const PAYROLL_PERIOD: &str = "payroll_employee_month_year";
}

fn lock<'a, T>(table: &'a Mutex<T>, name: &'static str) -> StoreResult<MutexGuard<'a, T>> {
    table.lock().map_err(|_| StoreError::LockPoisoned(name))
}

fn sorted_by_id<T, F: Fn(&T) -> u64>(mut rows: Vec<T>, id: F) -> Vec<T> {
    rows.sort_by_key(|r| id(r));
    rows
}

// --- Snapshot ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    next_id: u64,
    employees: Vec<Employee>,
    leave_types: Vec<LeaveType>,
    entitlements: Vec<LeaveEntitlement>,
    leaves: Vec<LeaveRequest>,
    claims: Vec<ExpenseClaim>,
    payrolls: Vec<Payroll>,
    attendance: Vec<Attendance>,
}

// --- Store ---

/// In-process relational store. Every table sits behind its own mutex and each
/// check-then-act (unique insert, get-or-insert, conditional update) runs while
/// that table's lock is held.
#[derive(Clone)]
pub struct HrStore {
    next_id: Arc<AtomicU64>,
    employees: Arc<Mutex<HashMap<EmployeeId, Employee>>>,
    leave_types: Arc<Mutex<HashMap<LeaveTypeId, LeaveType>>>,
    entitlements: Arc<Mutex<HashMap<(EmployeeId, LeaveTypeId, i32), LeaveEntitlement>>>,
    leaves: Arc<Mutex<HashMap<LeaveId, LeaveRequest>>>,
    claims: Arc<Mutex<HashMap<ClaimId, ExpenseClaim>>>,
    payrolls: Arc<Mutex<HashMap<(EmployeeId, u32, i32), Payroll>>>,
    attendance: Arc<Mutex<HashMap<(EmployeeId, NaiveDate), Attendance>>>,
    employee_locks: Arc<Mutex<HashMap<EmployeeId, Arc<Mutex<()>>>>>,
}

impl Default for HrStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HrStore {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            employees: Arc::new(Mutex::new(HashMap::new())),
            leave_types: Arc::new(Mutex::new(HashMap::new())),
            entitlements: Arc::new(Mutex::new(HashMap::new())),
            leaves: Arc::new(Mutex::new(HashMap::new())),
            claims: Arc::new(Mutex::new(HashMap::new())),
            payrolls: Arc::new(Mutex::new(HashMap::new())),
            attendance: Arc::new(Mutex::new(HashMap::new())),
            employee_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Inserts the standard leave types when the table is empty.
    pub fn seed_default_leave_types(&self) -> StoreResult<()> {
        let mut types = lock(&self.leave_types, "leave_types")?;
        if !types.is_empty() {
            return Ok(());
        }
        let defaults = [
            ("Annual Leave", LeaveCategory::Annual, false),
            ("Sick Leave", LeaveCategory::Sick, true),
            ("Unpaid Leave", LeaveCategory::Unpaid, false),
            ("Emergency Leave", LeaveCategory::Emergency, false),
            ("Hospitalization Leave", LeaveCategory::Hospitalization, true),
        ];
        for (name, category, requires_proof) in defaults {
            let id = self.allocate_id();
            types.insert(
                id,
                LeaveType {
                    id,
                    name: name.to_string(),
                    description: None,
                    requires_proof,
                    category,
                },
            );
        }
        info!("Seeded {} default leave types", types.len());
        Ok(())
    }

    // --- Employees ---

    pub fn insert_employee(
        &self,
        build: impl FnOnce(EmployeeId) -> Employee,
    ) -> StoreResult<Employee> {
        let mut employees = lock(&self.employees, "employees")?;
        let employee = build(self.allocate_id());

        let email = employee.email.trim().to_lowercase();
        if employees
            .values()
            .any(|e| e.email.trim().to_lowercase() == email)
        {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::EMPLOYEE_EMAIL,
                detail: employee.email.clone(),
            });
        }
        if let Some(contact) = employee.contact_number.as_deref().filter(|c| !c.is_empty()) {
            if employees
                .values()
                .any(|e| e.contact_number.as_deref() == Some(contact))
            {
                return Err(StoreError::UniqueViolation {
                    constraint: constraint::EMPLOYEE_CONTACT,
                    detail: contact.to_string(),
                });
            }
        }

        if employees.values().any(|e| e.user_id == employee.user_id) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::EMPLOYEE_USER,
                detail: employee.user_id.clone(),
            });
        }

        employees.insert(employee.id, employee.clone());
        Ok(employee)
    }

    pub fn get_employee(&self, id: EmployeeId) -> StoreResult<Option<Employee>> {
        Ok(lock(&self.employees, "employees")?.get(&id).cloned())
    }

    pub fn find_employee_by_user(&self, user_id: &str) -> StoreResult<Option<Employee>> {
        Ok(lock(&self.employees, "employees")?
            .values()
            .find(|e| e.user_id == user_id)
            .cloned())
    }

    pub fn list_employees(&self) -> StoreResult<Vec<Employee>> {
        let rows = lock(&self.employees, "employees")?.values().cloned().collect();
        Ok(sorted_by_id(rows, |e: &Employee| e.id))
    }

    pub fn update_employee<R>(
        &self,
        id: EmployeeId,
        f: impl FnOnce(&mut Employee) -> R,
    ) -> StoreResult<(Employee, R)> {
        let mut employees = lock(&self.employees, "employees")?;
        let employee = employees.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "Employee",
            id: id.to_string(),
        })?;
        let out = f(employee);
        Ok((employee.clone(), out))
    }

    /// Hard delete, used only to roll back a half-finished onboarding.
    pub fn delete_employee(&self, id: EmployeeId) -> StoreResult<Option<Employee>> {
        Ok(lock(&self.employees, "employees")?.remove(&id))
    }

    /// Runs `f` while holding the employee's private lock.
    pub fn with_employee_lock<R>(&self, id: EmployeeId, f: impl FnOnce() -> R) -> StoreResult<R> {
        let employee_lock = lock(&self.employee_locks, "employee_locks")?
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock(&employee_lock, "employee_lock")?;
        Ok(f())
    }

    // --- Leave types & entitlements ---

    pub fn list_leave_types(&self) -> StoreResult<Vec<LeaveType>> {
        let rows = lock(&self.leave_types, "leave_types")?.values().cloned().collect();
        Ok(sorted_by_id(rows, |t: &LeaveType| t.id))
    }

    pub fn get_leave_type(&self, id: LeaveTypeId) -> StoreResult<Option<LeaveType>> {
        Ok(lock(&self.leave_types, "leave_types")?.get(&id).cloned())
    }

    pub fn insert_entitlement(
        &self,
        employee_id: EmployeeId,
        leave_type_id: LeaveTypeId,
        year: i32,
        total_days: rust_decimal::Decimal,
    ) -> StoreResult<LeaveEntitlement> {
        let mut entitlements = lock(&self.entitlements, "entitlements")?;
        let key = (employee_id, leave_type_id, year);
        if entitlements.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::ENTITLEMENT,
                detail: format!("employee {employee_id}, type {leave_type_id}, year {year}"),
            });
        }
        let row = LeaveEntitlement {
            id: self.allocate_id(),
            employee_id,
            leave_type_id,
            year,
            total_days,
        };
        entitlements.insert(key, row.clone());
        Ok(row)
    }

    pub fn entitlements_for(
        &self,
        employee_id: EmployeeId,
        year: i32,
    ) -> StoreResult<Vec<LeaveEntitlement>> {
        let rows = lock(&self.entitlements, "entitlements")?
            .values()
            .filter(|e| e.employee_id == employee_id && e.year == year)
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |e: &LeaveEntitlement| e.id))
    }

    // --- Leave requests ---

    pub fn insert_leave(
        &self,
        build: impl FnOnce(LeaveId) -> LeaveRequest,
    ) -> StoreResult<LeaveRequest> {
        let leave = build(self.allocate_id());
        lock(&self.leaves, "leaves")?.insert(leave.id, leave.clone());
        Ok(leave)
    }

    pub fn get_leave(&self, id: LeaveId) -> StoreResult<Option<LeaveRequest>> {
        Ok(lock(&self.leaves, "leaves")?.get(&id).cloned())
    }

    pub fn leaves_for_employee(&self, employee_id: EmployeeId) -> StoreResult<Vec<LeaveRequest>> {
        let rows = lock(&self.leaves, "leaves")?
            .values()
            .filter(|l| l.employee_id == employee_id)
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |l: &LeaveRequest| l.id))
    }

    pub fn list_leaves(&self) -> StoreResult<Vec<LeaveRequest>> {
        let rows = lock(&self.leaves, "leaves")?.values().cloned().collect();
        Ok(sorted_by_id(rows, |l: &LeaveRequest| l.id))
    }

    /// Applies `f` to a copy of the row and commits it only when `f` succeeds.
    pub fn update_leave<E: From<StoreError>>(
        &self,
        id: LeaveId,
        f: impl FnOnce(&mut LeaveRequest) -> Result<(), E>,
    ) -> Result<LeaveRequest, E> {
        let mut leaves = lock(&self.leaves, "leaves")?;
        let current = leaves.get(&id).ok_or(StoreError::NotFound {
            entity: "LeaveRequest",
            id: id.to_string(),
        })?;
        let mut updated = current.clone();
        f(&mut updated)?;
        leaves.insert(id, updated.clone());
        Ok(updated)
    }

    // --- Expense claims ---

    pub fn insert_claim(
        &self,
        build: impl FnOnce(ClaimId) -> ExpenseClaim,
    ) -> StoreResult<ExpenseClaim> {
        let claim = build(self.allocate_id());
        lock(&self.claims, "claims")?.insert(claim.id, claim.clone());
        Ok(claim)
    }

    pub fn get_claim(&self, id: ClaimId) -> StoreResult<Option<ExpenseClaim>> {
        Ok(lock(&self.claims, "claims")?.get(&id).cloned())
    }

    pub fn list_claims(&self) -> StoreResult<Vec<ExpenseClaim>> {
        let rows = lock(&self.claims, "claims")?.values().cloned().collect();
        Ok(sorted_by_id(rows, |c: &ExpenseClaim| c.id))
    }

    /// Applies `f` to a copy of the row and commits it only when `f` succeeds.
    pub fn update_claim<E: From<StoreError>>(
        &self,
        id: ClaimId,
        f: impl FnOnce(&mut ExpenseClaim) -> Result<(), E>,
    ) -> Result<ExpenseClaim, E> {
        let mut claims = lock(&self.claims, "claims")?;
        let current = claims.get(&id).ok_or(StoreError::NotFound {
            entity: "ExpenseClaim",
            id: id.to_string(),
        })?;
        let mut updated = current.clone();
        f(&mut updated)?;
        claims.insert(id, updated.clone());
        Ok(updated)
    }

    // --- Payroll ---

    pub fn insert_payroll(&self, build: impl FnOnce(PayrollId) -> Payroll) -> StoreResult<Payroll> {
        let mut payrolls = lock(&self.payrolls, "payrolls")?;
        let payroll = build(self.allocate_id());
        let key = (payroll.employee_id, payroll.month, payroll.year);
        if payrolls.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::PAYROLL_PERIOD,
                detail: format!(
                    "employee {}, {:02}/{}",
                    payroll.employee_id, payroll.month, payroll.year
                ),
            });
        }
        payrolls.insert(key, payroll.clone());
        Ok(payroll)
    }

    pub fn find_payroll(
        &self,
        employee_id: EmployeeId,
        month: u32,
        year: i32,
    ) -> StoreResult<Option<Payroll>> {
        Ok(lock(&self.payrolls, "payrolls")?
            .get(&(employee_id, month, year))
            .cloned())
    }

    pub fn payrolls_for_period(&self, month: u32, year: i32) -> StoreResult<Vec<Payroll>> {
        let rows = lock(&self.payrolls, "payrolls")?
            .values()
            .filter(|p| p.month == month && p.year == year)
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |p: &Payroll| p.id))
    }

    // --- Attendance ---

    /// Returns the existing row for (employee, date) or inserts the one built
    /// by `build`. The flag is `true` when a row was inserted.
    pub fn get_or_insert_attendance(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        build: impl FnOnce(AttendanceId) -> Attendance,
    ) -> StoreResult<(Attendance, bool)> {
        let mut attendance = lock(&self.attendance, "attendance")?;
        if let Some(existing) = attendance.get(&(employee_id, date)) {
            return Ok((existing.clone(), false));
        }
        let row = build(self.allocate_id());
        attendance.insert((employee_id, date), row.clone());
        Ok((row, true))
    }

    /// Applies `f` to the row for (employee, date) under the table lock.
    pub fn update_attendance<R>(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
        f: impl FnOnce(&mut Attendance) -> R,
    ) -> StoreResult<Option<(Attendance, R)>> {
        let mut attendance = lock(&self.attendance, "attendance")?;
        Ok(attendance.get_mut(&(employee_id, date)).map(|row| {
            let out = f(row);
            (row.clone(), out)
        }))
    }

    pub fn find_attendance(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> StoreResult<Option<Attendance>> {
        Ok(lock(&self.attendance, "attendance")?
            .get(&(employee_id, date))
            .cloned())
    }

    pub fn latest_attendance(&self, employee_id: EmployeeId) -> StoreResult<Option<Attendance>> {
        Ok(lock(&self.attendance, "attendance")?
            .values()
            .filter(|a| a.employee_id == employee_id)
            .max_by_key(|a| (a.date, a.check_in))
            .cloned())
    }

    pub fn attendance_on(&self, date: NaiveDate) -> StoreResult<Vec<Attendance>> {
        let rows = lock(&self.attendance, "attendance")?
            .values()
            .filter(|a| a.date == date)
            .cloned()
            .collect();
        Ok(sorted_by_id(rows, |a: &Attendance| a.id))
    }

    pub fn attendance_in_month(&self, month: u32, year: i32) -> StoreResult<Vec<Attendance>> {
        let mut rows: Vec<Attendance> = lock(&self.attendance, "attendance")?
            .values()
            .filter(|a| a.date.month() == month && a.date.year() == year)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.date, a.employee_id));
        Ok(rows)
    }

    // --- Snapshot persistence ---

    pub fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let snapshot = StoreSnapshot {
            next_id: self.next_id.load(Ordering::SeqCst),
            employees: self.list_employees()?,
            leave_types: self.list_leave_types()?,
            entitlements: lock(&self.entitlements, "entitlements")?
                .values()
                .cloned()
                .collect(),
            leaves: self.list_leaves()?,
            claims: self.list_claims()?,
            payrolls: lock(&self.payrolls, "payrolls")?.values().cloned().collect(),
            attendance: lock(&self.attendance, "attendance")?
                .values()
                .cloned()
                .collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        debug!("Store snapshot written to {}", path.display());
        Ok(())
    }

    /// Loads a snapshot, or an empty store when the file does not exist yet.
    pub fn load_snapshot(path: &Path) -> StoreResult<Self> {
        let store = Self::new();
        if !path.exists() {
            warn!(
                "No snapshot at {}, starting with an empty store",
                path.display()
            );
            return Ok(store);
        }
        let raw = fs::read_to_string(path).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let snapshot: StoreSnapshot =
            serde_json::from_str(&raw).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        store.next_id.store(snapshot.next_id.max(1), Ordering::SeqCst);
        {
            let mut employees = lock(&store.employees, "employees")?;
            employees.extend(snapshot.employees.into_iter().map(|e| (e.id, e)));
            let mut types = lock(&store.leave_types, "leave_types")?;
            types.extend(snapshot.leave_types.into_iter().map(|t| (t.id, t)));
            let mut entitlements = lock(&store.entitlements, "entitlements")?;
            entitlements.extend(
                snapshot
                    .entitlements
                    .into_iter()
                    .map(|e| ((e.employee_id, e.leave_type_id, e.year), e)),
            );
            let mut leaves = lock(&store.leaves, "leaves")?;
            leaves.extend(snapshot.leaves.into_iter().map(|l| (l.id, l)));
            let mut claims = lock(&store.claims, "claims")?;
            claims.extend(snapshot.claims.into_iter().map(|c| (c.id, c)));
            let mut payrolls = lock(&store.payrolls, "payrolls")?;
            payrolls.extend(
                snapshot
                    .payrolls
                    .into_iter()
                    .map(|p| ((p.employee_id, p.month, p.year), p)),
            );
            let mut attendance = lock(&store.attendance, "attendance")?;
            attendance.extend(
                snapshot
                    .attendance
                    .into_iter()
                    .map(|a| ((a.employee_id, a.date), a)),
            );
            info!(
                "Loaded snapshot from {}: {} employees, {} leave requests, {} payroll rows",
                path.display(),
                employees.len(),
                leaves.len(),
                payrolls.len()
            );
        }
        Ok(store)
    }
}


#[cfg(test)]
mod store_tests {
    use super::test_support::*;
    use super::*;
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn duplicate_email_is_rejected_case_insensitively() {
        let store = HrStore::new();
        store
            .insert_employee(|id| employee(id, "amy@corp.test", d("2024-01-01"), dec!(3000)))
            .unwrap();
        let err = store
            .insert_employee(|id| employee(id, "AMY@corp.test", d("2024-01-01"), dec!(3000)))
            .unwrap_err();
        assert!(err.is_unique_violation(constraint::EMPLOYEE_EMAIL));
        assert_eq!(store.list_employees().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_contact_number_is_rejected() {
        let store = HrStore::new();
        store
            .insert_employee(|id| Employee {
                contact_number: Some("0123".into()),
                ..employee(id, "a@corp.test", d("2024-01-01"), dec!(3000))
            })
            .unwrap();
        let err = store
            .insert_employee(|id| Employee {
                contact_number: Some("0123".into()),
                ..employee(id, "b@corp.test", d("2024-01-01"), dec!(3000))
            })
            .unwrap_err();
        assert!(err.is_unique_violation(constraint::EMPLOYEE_CONTACT));
    }

    #[test]
    fn one_employee_per_login_principal() {
        let store = HrStore::new();
        store
            .insert_employee(|id| Employee {
                user_id: "hr-1".into(),
                ..employee(id, "a@corp.test", d("2024-01-01"), dec!(3000))
            })
            .unwrap();
        let err = store
            .insert_employee(|id| Employee {
                user_id: "hr-1".into(),
                ..employee(id, "b@corp.test", d("2024-01-01"), dec!(3000))
            })
            .unwrap_err();
        assert!(err.is_unique_violation(constraint::EMPLOYEE_USER));
        assert_eq!(store.find_employee_by_user("hr-1").unwrap().unwrap().email, "a@corp.test");
    }

    #[test]
    fn entitlement_is_unique_per_employee_type_year() {
        let store = HrStore::new();
        store.insert_entitlement(1, 2, 2025, dec!(14)).unwrap();
        let err = store.insert_entitlement(1, 2, 2025, dec!(14)).unwrap_err();
        assert!(err.is_unique_violation(constraint::ENTITLEMENT));
        assert!(store.insert_entitlement(1, 2, 2026, dec!(14)).is_ok());
    }

    #[test]
    fn get_or_insert_attendance_keeps_first_row() {
        let store = HrStore::new();
        let date = d("2025-03-03");
        let (first, created) = store
            .get_or_insert_attendance(1, date, |id| Attendance {
                id,
                employee_id: 1,
                date,
                check_in: chrono::NaiveTime::from_hms_opt(8, 0, 0),
                check_out: None,
            })
            .unwrap();
        assert!(created);
        let (second, created) = store
            .get_or_insert_attendance(1, date, |id| Attendance {
                id,
                employee_id: 1,
                date,
                check_in: chrono::NaiveTime::from_hms_opt(10, 0, 0),
                check_out: None,
            })
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(store.attendance_on(date).unwrap().len(), 1);
    }

    #[test]
    fn failed_update_does_not_commit() {
        let store = HrStore::new();
        let leave = store
            .insert_leave(|id| LeaveRequest {
                id,
                employee_id: 1,
                leave_type_id: 1,
                start_date: d("2025-01-01"),
                end_date: d("2025-01-01"),
                reason: "x".into(),
                status: ReviewStatus::Pending,
                reject_reason: None,
                proof_url: None,
                approved_by: None,
                submitted_at: d("2024-12-20").and_hms_opt(9, 0, 0).unwrap(),
            })
            .unwrap();
        let result: Result<LeaveRequest, StoreError> = store.update_leave(leave.id, |l| {
            l.status = ReviewStatus::Approved;
            Err(StoreError::Snapshot("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get_leave(leave.id).unwrap().unwrap().status,
            ReviewStatus::Pending
        );
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let store = HrStore::new();
        store.seed_default_leave_types().unwrap();
        store
            .insert_employee(|id| employee(id, "snap@corp.test", d("2024-05-01"), dec!(4200.50)))
            .unwrap();
        let path = std::env::temp_dir().join(format!(
            "hrms-snapshot-test-{}.json",
            std::process::id()
        ));
        store.save_snapshot(&path).unwrap();

        let loaded = HrStore::load_snapshot(&path).unwrap();
        let employees = loaded.list_employees().unwrap();
        assert_eq!(employees.len(), 1);
        assert_eq!(employees[0].basic_salary, dec!(4200.50));
        assert_eq!(loaded.list_leave_types().unwrap().len(), 5);
        // Ids keep increasing after a reload.
        let next = loaded
            .insert_employee(|id| employee(id, "next@corp.test", d("2024-05-01"), dec!(1)))
            .unwrap();
        assert!(next.id > employees[0].id);
        let _ = fs::remove_file(&path);
    }
}
