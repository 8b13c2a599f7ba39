// src/models.rs
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// --- Identifiers ---

pub type EmployeeId = u64;
pub type LeaveTypeId = u64;
pub type LeaveId = u64;
pub type ClaimId = u64;
pub type PayrollId = u64;
pub type AttendanceId = u64;

// --- Employee ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    /// Login principal linked to this record (HR managers approve through it).
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: Option<String>,
    pub join_date: NaiveDate,
    pub basic_salary: Decimal,
    pub department_id: Option<u64>,
    pub position_id: Option<u64>,
    pub profile_picture_url: Option<String>,
    pub is_active: bool,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

// --- Leave Types ---

/// Stable classification of a leave type. Business rules key off this, never
/// off the display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaveCategory {
    Annual,
    Sick,
    Unpaid,
    Emergency,
    Hospitalization,
    Other,
}

impl LeaveCategory {
    /// Whole-year allotment granted at onboarding. `None` means no row is created.
    pub fn default_entitlement_days(self) -> Option<Decimal> {
        match self {
            LeaveCategory::Annual => Some(dec!(14)),
            LeaveCategory::Sick => Some(dec!(14)),
            LeaveCategory::Unpaid => Some(dec!(0)),
            LeaveCategory::Emergency => Some(dec!(3)),
            LeaveCategory::Hospitalization => Some(dec!(60)),
            LeaveCategory::Other => None,
        }
    }

    pub fn requires_proof(self) -> bool {
        matches!(self, LeaveCategory::Sick | LeaveCategory::Hospitalization)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveType {
    pub id: LeaveTypeId,
    pub name: String,
    pub description: Option<String>,
    pub requires_proof: bool,
    pub category: LeaveCategory,
}

impl LeaveType {
    pub fn needs_proof(&self) -> bool {
        self.requires_proof || self.category.requires_proof()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveEntitlement {
    pub id: u64,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub year: i32,
    pub total_days: Decimal,
}

// --- Review workflow shared by leave requests and expense claims ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "Pending",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Rejected => "Rejected",
            ReviewStatus::Cancelled => "Cancelled",
        }
    }

    /// Counts against the balance while pending or once approved.
    pub fn consumes_balance(self) -> bool {
        matches!(self, ReviewStatus::Pending | ReviewStatus::Approved)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Leave Requests ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveId,
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub status: ReviewStatus,
    pub reject_reason: Option<String>,
    pub proof_url: Option<String>,
    pub approved_by: Option<EmployeeId>,
    pub submitted_at: NaiveDateTime,
}

impl LeaveRequest {
    pub fn day_count(&self) -> i64 {
        inclusive_day_count(self.start_date, self.end_date)
    }
}

/// Number of calendar days in `start..=end`.
pub fn inclusive_day_count(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

// --- Expense Claims ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDocument {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseClaim {
    pub id: ClaimId,
    pub employee_id: EmployeeId,
    pub claim_date: NaiveDateTime,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub status: ReviewStatus,
    pub reject_reason: Option<String>,
    pub approved_by: Option<EmployeeId>,
    pub documents: Vec<ClaimDocument>,
}

// --- Payroll ---

/// Gross-to-net figures for one employee and month. All money is rounded to cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollFigures {
    pub basic_salary: Decimal,
    pub days_in_month: u32,
    pub unpaid_days: i64,
    pub daily_rate: Decimal,
    pub unpaid_deduction: Decimal,
    pub salary_after_leave: Decimal,
    pub allowances: Decimal,
    pub overtime_pay: Decimal,
    /// Unpaid-leave deduction plus the fixed deduction.
    pub deductions: Decimal,
    pub epf_employee: Decimal,
    pub epf_employer: Decimal,
    pub socso_employee: Decimal,
    pub socso_employer: Decimal,
    pub eis_employee: Decimal,
    pub eis_employer: Decimal,
    pub pcb: Decimal,
    pub net_salary: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payroll {
    pub id: PayrollId,
    pub employee_id: EmployeeId,
    pub month: u32,
    pub year: i32,
    #[serde(flatten)]
    pub figures: PayrollFigures,
    pub payment_date: Option<NaiveDateTime>,
}

impl Payroll {
    pub fn is_paid(&self) -> bool {
        self.payment_date.is_some()
    }
}

// --- Attendance ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
}

impl Attendance {
    pub fn is_open(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }

    pub fn checked_in_at(&self) -> Option<NaiveDateTime> {
        self.check_in.map(|t| self.date.and_time(t))
    }

    pub fn checked_out_at(&self) -> Option<NaiveDateTime> {
        self.check_out.map(|t| self.date.and_time(t))
    }

    /// Late means checked in strictly after `threshold`.
    pub fn is_late(&self, threshold: NaiveTime) -> bool {
        self.check_in.map_or(false, |t| t > threshold)
    }
}
