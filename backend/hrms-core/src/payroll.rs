// src/payroll.rs
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::models::*;
use crate::store::{constraint, HrStore, StoreError};

// --- Statutory rates (Malaysia) ---

pub const EPF_EMPLOYEE_RATE: Decimal = dec!(0.11);
pub const EPF_EMPLOYER_RATE: Decimal = dec!(0.13);
pub const SOCSO_RATE: Decimal = dec!(0.005);
pub const EIS_RATE: Decimal = dec!(0.002);
pub const PCB_RATE: Decimal = dec!(0.01);
pub const FIXED_ALLOWANCE: Decimal = dec!(150.00);
pub const FIXED_DEDUCTION: Decimal = dec!(50.00);

#[derive(Error, Debug)]
pub enum PayrollError {
    #[error("Invalid payroll period {month}/{year}")]
    InvalidPeriod { month: u32, year: i32 },
    #[error("Employee {0} not found")]
    EmployeeNotFound(EmployeeId),
    #[error("Payroll figures overflow for basic salary {basic_salary}")]
    Overflow { basic_salary: Decimal },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PayrollError {
    pub fn code(&self) -> &'static str {
        match self {
            PayrollError::InvalidPeriod { .. } => "INVALID_PERIOD",
            PayrollError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            PayrollError::Overflow { .. } => "PAYROLL_OVERFLOW",
            PayrollError::Store(e) => e.code(),
        }
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Calendar days in the month, or `None` for an invalid period.
pub fn days_in_month(month: u32, year: i32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

/// Gross-to-net for one month. Each money figure is rounded to cents before
/// it takes part in the net.
pub fn calculate_figures(
    basic_salary: Decimal,
    unpaid_days: i64,
    days_in_month: u32,
) -> Result<PayrollFigures, PayrollError> {
    let overflow = || PayrollError::Overflow { basic_salary };
    let share = |base: Decimal, rate: Decimal| base.checked_mul(rate).map(money).ok_or_else(overflow);

    let days = Decimal::from(days_in_month.max(1));
    let daily_rate = basic_salary.checked_div(days).ok_or_else(overflow)?;
    let unpaid_deduction = basic_salary
        .checked_mul(Decimal::from(unpaid_days))
        .and_then(|v| v.checked_div(days))
        .map(money)
        .ok_or_else(overflow)?;
    let salary_after_leave = basic_salary
        .checked_sub(unpaid_deduction)
        .ok_or_else(overflow)?
        .max(Decimal::ZERO);

    let epf_employee = share(salary_after_leave, EPF_EMPLOYEE_RATE)?;
    let epf_employer = share(salary_after_leave, EPF_EMPLOYER_RATE)?;
    let socso_employee = share(salary_after_leave, SOCSO_RATE)?;
    let socso_employer = share(salary_after_leave, SOCSO_RATE)?;
    let eis_employee = share(salary_after_leave, EIS_RATE)?;
    let eis_employer = share(salary_after_leave, EIS_RATE)?;
    let pcb = share(salary_after_leave, PCB_RATE)?;

    let withheld = [epf_employee, socso_employee, eis_employee, pcb, FIXED_DEDUCTION]
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or_else(overflow)?;
    let net_salary = salary_after_leave
        .checked_add(FIXED_ALLOWANCE)
        .and_then(|v| v.checked_sub(withheld))
        .ok_or_else(overflow)?;
    let deductions = unpaid_deduction
        .checked_add(FIXED_DEDUCTION)
        .ok_or_else(overflow)?;

    Ok(PayrollFigures {
        basic_salary,
        days_in_month,
        unpaid_days,
        daily_rate: money(daily_rate),
        unpaid_deduction,
        salary_after_leave,
        allowances: FIXED_ALLOWANCE,
        overtime_pay: Decimal::ZERO,
        deductions,
        epf_employee,
        epf_employer,
        socso_employee,
        socso_employer,
        eis_employee,
        eis_employer,
        pcb,
        net_salary,
    })
}

fn total_net<'a>(figures: impl Iterator<Item = &'a PayrollFigures>) -> Result<Decimal, PayrollError> {
    let mut total = Decimal::ZERO;
    for f in figures {
        total = total.checked_add(f.net_salary).ok_or(PayrollError::Overflow {
            basic_salary: f.basic_salary,
        })?;
    }
    Ok(total)
}

// --- Views ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayslipStatus {
    #[serde(rename = "Calculated (Unsaved)")]
    CalculatedUnsaved,
    Paid,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayslipView {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub month: u32,
    pub year: i32,
    pub status: PayslipStatus,
    pub payroll_id: Option<PayrollId>,
    pub figures: PayrollFigures,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPayrollSummary {
    pub month: u32,
    pub year: i32,
    /// "Completed" once any payroll row exists for the month, else "Pending".
    pub status: &'static str,
    pub employee_count: usize,
    pub total_net_pay: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayrollFailure {
    pub employee_id: EmployeeId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayrollRunReport {
    pub month: u32,
    pub year: i32,
    pub processed: Vec<EmployeeId>,
    pub skipped: Vec<EmployeeId>,
    pub failed: Vec<PayrollFailure>,
}

// --- Calculator ---

#[derive(Clone)]
pub struct PayrollCalculator {
    store: HrStore,
    clock: Arc<dyn Clock>,
}

impl PayrollCalculator {
    pub fn new(store: HrStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn validate_period(month: u32, year: i32) -> Result<u32, PayrollError> {
        days_in_month(month, year).ok_or(PayrollError::InvalidPeriod { month, year })
    }

    /// Approved unpaid-category leave days for requests starting in the month.
    pub fn unpaid_leave_days(
        &self,
        employee_id: EmployeeId,
        month: u32,
        year: i32,
    ) -> Result<i64, PayrollError> {
        let unpaid_types: Vec<LeaveTypeId> = self
            .store
            .list_leave_types()?
            .into_iter()
            .filter(|t| t.category == LeaveCategory::Unpaid)
            .map(|t| t.id)
            .collect();
        Ok(self
            .store
            .leaves_for_employee(employee_id)?
            .iter()
            .filter(|l| {
                l.status == ReviewStatus::Approved
                    && unpaid_types.contains(&l.leave_type_id)
                    && l.start_date.month() == month
                    && l.start_date.year() == year
            })
            .map(LeaveRequest::day_count)
            .sum())
    }

    pub fn calculate_payslip(
        &self,
        employee: &Employee,
        month: u32,
        year: i32,
    ) -> Result<PayrollFigures, PayrollError> {
        let days = Self::validate_period(month, year)?;
        let unpaid_days = self.unpaid_leave_days(employee.id, month, year)?;
        calculate_figures(employee.basic_salary, unpaid_days, days)
    }

    fn view_for(&self, employee: &Employee, month: u32, year: i32) -> Result<PayslipView, PayrollError> {
        let (status, payroll_id, figures) = match self.store.find_payroll(employee.id, month, year)? {
            Some(saved) => {
                let status = if saved.is_paid() {
                    PayslipStatus::Paid
                } else {
                    PayslipStatus::Pending
                };
                (status, Some(saved.id), saved.figures)
            }
            None => (
                PayslipStatus::CalculatedUnsaved,
                None,
                self.calculate_payslip(employee, month, year)?,
            ),
        };
        Ok(PayslipView {
            employee_id: employee.id,
            employee_name: employee.full_name(),
            month,
            year,
            status,
            payroll_id,
            figures,
        })
    }

    /// The saved payslip when one exists, otherwise an unsaved computation.
    pub fn preview_payslip(
        &self,
        employee_id: EmployeeId,
        month: u32,
        year: i32,
    ) -> Result<PayslipView, PayrollError> {
        Self::validate_period(month, year)?;
        let employee = self
            .store
            .get_employee(employee_id)?
            .ok_or(PayrollError::EmployeeNotFound(employee_id))?;
        self.view_for(&employee, month, year)
    }

    /// One row per active employee plus anyone already paid for the month.
    pub fn payslips_for_month(&self, month: u32, year: i32) -> Result<Vec<PayslipView>, PayrollError> {
        Self::validate_period(month, year)?;
        let saved: Vec<EmployeeId> = self
            .store
            .payrolls_for_period(month, year)?
            .iter()
            .map(|p| p.employee_id)
            .collect();
        self.store
            .list_employees()?
            .iter()
            .filter(|e| e.is_active || saved.contains(&e.id))
            .map(|e| self.view_for(e, month, year))
            .collect()
    }

    pub fn monthly_summary(&self, month: u32, year: i32) -> Result<MonthlyPayrollSummary, PayrollError> {
        Self::validate_period(month, year)?;
        let saved = self.store.payrolls_for_period(month, year)?;
        if !saved.is_empty() {
            return Ok(MonthlyPayrollSummary {
                month,
                year,
                status: "Completed",
                employee_count: saved.len(),
                total_net_pay: total_net(saved.iter().map(|p| &p.figures))?,
            });
        }

        let simulated = self
            .store
            .list_employees()?
            .iter()
            .filter(|e| e.is_active)
            .map(|e| self.calculate_payslip(e, month, year))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MonthlyPayrollSummary {
            month,
            year,
            status: "Pending",
            employee_count: simulated.len(),
            total_net_pay: total_net(simulated.iter())?,
        })
    }

    /// Computes and stores payroll for every active employee without a row for
    /// the period. Per-employee failures are reported, not propagated.
    pub fn process_payroll(&self, month: u32, year: i32) -> Result<PayrollRunReport, PayrollError> {
        Self::validate_period(month, year)?;
        info!("Processing payroll for {:02}/{}", month, year);

        let mut report = PayrollRunReport {
            month,
            year,
            ..PayrollRunReport::default()
        };

        for employee in self.store.list_employees()?.into_iter().filter(|e| e.is_active) {
            match self.store.find_payroll(employee.id, month, year) {
                Ok(Some(_)) => {
                    report.skipped.push(employee.id);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Payroll lookup failed for employee {}: {}", employee.id, e);
                    report.failed.push(PayrollFailure {
                        employee_id: employee.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            let figures = match self.calculate_payslip(&employee, month, year) {
                Ok(figures) => figures,
                Err(e) => {
                    error!("Payroll calculation failed for employee {}: {}", employee.id, e);
                    report.failed.push(PayrollFailure {
                        employee_id: employee.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let payment_date = self.clock.now();
            match self.store.insert_payroll(|id| Payroll {
                id,
                employee_id: employee.id,
                month,
                year,
                figures,
                payment_date: Some(payment_date),
            }) {
                Ok(row) => {
                    info!(
                        "Payroll #{} stored for employee {}: net {}",
                        row.id, employee.id, row.figures.net_salary
                    );
                    report.processed.push(employee.id);
                }
                Err(e) if e.is_unique_violation(constraint::PAYROLL_PERIOD) => {
                    warn!(
                        "Payroll for employee {} {:02}/{} was created concurrently, skipping",
                        employee.id, month, year
                    );
                    report.skipped.push(employee.id);
                }
                Err(e) => {
                    error!("Failed to store payroll for employee {}: {}", employee.id, e);
                    report.failed.push(PayrollFailure {
                        employee_id: employee.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Payroll {:02}/{} done: {} processed, {} skipped, {} failed",
            month,
            year,
            report.processed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
