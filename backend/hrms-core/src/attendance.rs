// src/attendance.rs
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::face::{FaceVerification, FaceVerifier};
use crate::models::*;
use crate::store::{HrStore, StoreError};

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("No active clock-in found for employee {employee_id} on {date}")]
    NoActiveSession { employee_id: EmployeeId, date: NaiveDate },
    #[error("Employee {0} not found")]
    EmployeeNotFound(EmployeeId),
    #[error("Invalid report period {month}/{year}")]
    InvalidPeriod { month: u32, year: i32 },
    #[error("CSV export failed: {0}")]
    Export(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::NoActiveSession { .. } => "NO_ACTIVE_SESSION",
            AttendanceError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            AttendanceError::InvalidPeriod { .. } => "INVALID_PERIOD",
            AttendanceError::Export(_) => "EXPORT_FAILED",
            AttendanceError::Store(e) => e.code(),
        }
    }
}

impl From<csv::Error> for AttendanceError {
    fn from(e: csv::Error) -> Self {
        AttendanceError::Export(e.to_string())
    }
}

pub const DISPLAY_FORMAT: &str = "%H:%M %d/%m/%Y";

fn display(ts: Option<NaiveDateTime>) -> String {
    ts.map(|t| t.format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

// --- Views ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceStatus {
    pub employee_id: EmployeeId,
    pub is_clocked_in: bool,
    pub last_clock_in: Option<NaiveDateTime>,
    pub last_clock_out: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAttendanceRow {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub is_late: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAttendanceSummary {
    pub date: NaiveDate,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub rows: Vec<DailyAttendanceRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayAttendanceCount {
    pub date: NaiveDate,
    pub present: usize,
    pub absent: usize,
}

// --- Attendance Clock ---

#[derive(Clone)]
pub struct AttendanceClock {
    store: HrStore,
    clock: Arc<dyn Clock>,
    late_after: NaiveTime,
}

impl AttendanceClock {
    pub fn new(store: HrStore, clock: Arc<dyn Clock>, late_after: NaiveTime) -> Self {
        Self {
            store,
            clock,
            late_after,
        }
    }

    pub fn is_late(&self, row: &Attendance) -> bool {
        row.is_late(self.late_after)
    }

    /// Opens today's row. A second call the same day returns the first row.
    pub fn clock_in(&self, employee_id: EmployeeId) -> Result<Attendance, AttendanceError> {
        let now = self.clock.now();
        let date = now.date();
        let (row, created) = self.store.get_or_insert_attendance(employee_id, date, |id| Attendance {
            id,
            employee_id,
            date,
            check_in: Some(now.time()),
            check_out: None,
        })?;
        if created {
            info!(
                "Employee {} clocked in at {}{}",
                employee_id,
                now.format(DISPLAY_FORMAT),
                if self.is_late(&row) { " (late)" } else { "" }
            );
        } else {
            info!("Employee {} already clocked in on {}", employee_id, date);
        }
        Ok(row)
    }

    /// Closes today's row. Already-closed rows are returned unchanged.
    pub fn clock_out(&self, employee_id: EmployeeId) -> Result<Attendance, AttendanceError> {
        let now = self.clock.now();
        let date = now.date();
        let updated = self.store.update_attendance(employee_id, date, |row| {
            if row.check_out.is_none() {
                row.check_out = Some(now.time());
                true
            } else {
                false
            }
        })?;
        match updated {
            Some((row, true)) => {
                info!("Employee {} clocked out at {}", employee_id, now.format(DISPLAY_FORMAT));
                Ok(row)
            }
            Some((row, false)) => Ok(row),
            None => {
                warn!("Clock-out without clock-in: employee {} on {}", employee_id, date);
                Err(AttendanceError::NoActiveSession { employee_id, date })
            }
        }
    }

    pub fn status(&self, employee_id: EmployeeId) -> Result<AttendanceStatus, AttendanceError> {
        let latest = self.store.latest_attendance(employee_id)?;
        Ok(AttendanceStatus {
            employee_id,
            is_clocked_in: latest.as_ref().map_or(false, Attendance::is_open),
            last_clock_in: latest.as_ref().and_then(Attendance::checked_in_at),
            last_clock_out: latest.as_ref().and_then(Attendance::checked_out_at),
        })
    }

    /// Every employee for `date`, with an empty row for those who did not
    /// clock in. `search` filters by name, case-insensitively.
    pub fn daily_summary(
        &self,
        date: NaiveDate,
        search: Option<&str>,
    ) -> Result<DailyAttendanceSummary, AttendanceError> {
        let rows_by_employee: BTreeMap<EmployeeId, Attendance> = self
            .store
            .attendance_on(date)?
            .into_iter()
            .map(|a| (a.employee_id, a))
            .collect();
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let rows: Vec<DailyAttendanceRow> = self
            .store
            .list_employees()?
            .into_iter()
            .filter(|e| e.is_active || rows_by_employee.contains_key(&e.id))
            .filter(|e| {
                needle
                    .as_ref()
                    .map_or(true, |n| e.full_name().to_lowercase().contains(n))
            })
            .map(|e| {
                let row = rows_by_employee.get(&e.id);
                DailyAttendanceRow {
                    employee_id: e.id,
                    employee_name: e.full_name(),
                    check_in: row.and_then(|r| r.check_in),
                    check_out: row.and_then(|r| r.check_out),
                    is_late: row.map_or(false, |r| self.is_late(r)),
                }
            })
            .collect();

        let present = rows.iter().filter(|r| r.check_in.is_some()).count();
        Ok(DailyAttendanceSummary {
            date,
            present,
            late: rows.iter().filter(|r| r.is_late).count(),
            absent: rows.len() - present,
            rows,
        })
    }

    /// Per-day counts for days with any attendance in the month. Absent is
    /// measured against the current active headcount.
    pub fn monthly_report(&self, month: u32, year: i32) -> Result<Vec<DayAttendanceCount>, AttendanceError> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(AttendanceError::InvalidPeriod { month, year });
        }
        let headcount = self
            .store
            .list_employees()?
            .iter()
            .filter(|e| e.is_active)
            .count();
        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for row in self.store.attendance_in_month(month, year)? {
            if row.check_in.is_some() {
                *per_day.entry(row.date).or_default() += 1;
            }
        }
        Ok(per_day
            .into_iter()
            .map(|(date, present)| DayAttendanceCount {
                date,
                present,
                absent: headcount.saturating_sub(present),
            })
            .collect())
    }

    pub fn export_month_csv(&self, month: u32, year: i32) -> Result<String, AttendanceError> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(AttendanceError::InvalidPeriod { month, year });
        }
        let names: BTreeMap<EmployeeId, String> = self
            .store
            .list_employees()?
            .into_iter()
            .map(|e| (e.id, e.full_name()))
            .collect();

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["date", "employee_id", "employee_name", "check_in", "check_out", "late"])?;
        for row in self.store.attendance_in_month(month, year)? {
            let fmt = |t: Option<NaiveTime>| t.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default();
            writer.write_record([
                row.date.to_string(),
                row.employee_id.to_string(),
                names.get(&row.employee_id).cloned().unwrap_or_default(),
                fmt(row.check_in),
                fmt(row.check_out),
                if self.is_late(&row) { "yes" } else { "no" }.to_string(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AttendanceError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| AttendanceError::Export(e.to_string()))
    }
}

// --- Face-verified clock flow ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockAction {
    ClockIn,
    ClockOut,
}

impl ClockAction {
    /// "clockout" in any case means clock-out; anything else clocks in.
    pub fn parse(action: &str) -> Self {
        if action.trim().eq_ignore_ascii_case("clockout") {
            ClockAction::ClockOut
        } else {
            ClockAction::ClockIn
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockOutcome {
    pub success: bool,
    pub message: String,
    pub is_clocked_in: bool,
    pub last_clock_in: String,
    pub last_clock_out: String,
}

impl ClockOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            is_clocked_in: false,
            last_clock_in: "N/A".to_string(),
            last_clock_out: "N/A".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ClockService {
    store: HrStore,
    attendance: AttendanceClock,
    verifier: Arc<dyn FaceVerifier>,
    verify_timeout: Duration,
}

impl ClockService {
    pub fn new(
        store: HrStore,
        attendance: AttendanceClock,
        verifier: Arc<dyn FaceVerifier>,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            store,
            attendance,
            verifier,
            verify_timeout,
        }
    }

    pub async fn verify_and_process(
        &self,
        employee_id: EmployeeId,
        image_base64: &str,
        action: ClockAction,
    ) -> ClockOutcome {
        if image_base64.trim().is_empty() {
            return ClockOutcome::rejected("Invalid image data.");
        }
        let employee = match self.store.get_employee(employee_id) {
            Ok(Some(employee)) => employee,
            Ok(None) => return ClockOutcome::rejected("Employee not found."),
            Err(e) => {
                warn!("Employee lookup failed during clock {:?}: {}", action, e);
                return ClockOutcome::rejected("Attendance is temporarily unavailable.");
            }
        };
        let Some(reference_url) = employee
            .profile_picture_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        else {
            return ClockOutcome::rejected("No stored profile photo found. Contact HR.");
        };

        let verification = tokio::time::timeout(
            self.verify_timeout,
            self.verifier.verify_face(employee_id, image_base64, reference_url),
        )
        .await
        .unwrap_or_else(|_| {
            warn!(
                "Face verification for employee {} timed out after {:?}",
                employee_id, self.verify_timeout
            );
            FaceVerification {
                is_verified: false,
                message: "Face verification timed out.".to_string(),
            }
        });

        if !verification.is_verified {
            warn!(
                "Face not recognized for employee {}: {}",
                employee_id, verification.message
            );
            return ClockOutcome::rejected(format!("Face not recognized. {}", verification.message));
        }

        let result = match action {
            ClockAction::ClockIn => self.attendance.clock_in(employee_id),
            ClockAction::ClockOut => self.attendance.clock_out(employee_id),
        };
        match result {
            Ok(row) => ClockOutcome {
                success: true,
                message: verification.message,
                is_clocked_in: row.is_open(),
                last_clock_in: display(row.checked_in_at()),
                last_clock_out: display(row.checked_out_at()),
            },
            Err(AttendanceError::NoActiveSession { .. }) => {
                ClockOutcome::rejected("No active clock-in found for today.")
            }
            Err(e) => {
                warn!("Clock {:?} failed for employee {}: {}", action, employee_id, e);
                ClockOutcome::rejected("Attendance is temporarily unavailable.")
            }
        }
    }
}
