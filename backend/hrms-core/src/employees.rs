// src/employees.rs
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::leave_ledger::{EntitlementGrant, LeaveError, LeaveLedger};
use crate::models::*;
use crate::storage::{upload_document, ObjectStorage, StorageError, UploadDocument};
use crate::store::{constraint, HrStore, StoreError};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

const PHOTO_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Upper bound on a monthly basic salary.
pub const MAX_BASIC_SALARY: Decimal = dec!(1000000000);

#[derive(Error, Debug)]
pub enum EmployeeError {
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("First and last name are required")]
    MissingName,
    #[error("A login user id is required")]
    MissingUserId,
    #[error("Basic salary {0} is outside 0 to 1000000000")]
    SalaryOutOfRange(Decimal),
    #[error("Email '{0}' is already registered")]
    DuplicateEmail(String),
    #[error("Contact number '{0}' is already registered")]
    DuplicateContact(String),
    #[error("User '{0}' is already linked to an employee")]
    DuplicateUser(String),
    #[error("Profile photo could not be stored: {0}")]
    Photo(#[source] StorageError),
    #[error("Employee {0} not found")]
    NotFound(EmployeeId),
    #[error(transparent)]
    Leave(#[from] LeaveError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EmployeeError {
    pub fn code(&self) -> &'static str {
        match self {
            EmployeeError::InvalidEmail(_) => "INVALID_EMAIL",
            EmployeeError::MissingName => "MISSING_NAME",
            EmployeeError::MissingUserId => "MISSING_USER_ID",
            EmployeeError::SalaryOutOfRange(_) => "SALARY_OUT_OF_RANGE",
            EmployeeError::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            EmployeeError::DuplicateContact(_) => "DUPLICATE_CONTACT",
            EmployeeError::DuplicateUser(_) => "DUPLICATE_USER",
            EmployeeError::Photo(e) => e.code(),
            EmployeeError::NotFound(_) => "EMPLOYEE_NOT_FOUND",
            EmployeeError::Leave(e) => e.code(),
            EmployeeError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: Option<String>,
    pub join_date: NaiveDate,
    pub basic_salary: Decimal,
    pub department_id: Option<u64>,
    pub position_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Onboarding {
    pub employee: Employee,
    pub entitlements: EntitlementGrant,
}

#[derive(Clone)]
pub struct EmployeeService {
    store: HrStore,
    ledger: LeaveLedger,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    upload_timeout: Duration,
}

impl EmployeeService {
    pub fn new(
        store: HrStore,
        ledger: LeaveLedger,
        storage: Arc<dyn ObjectStorage>,
        bucket: String,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            storage,
            bucket,
            upload_timeout,
        }
    }

    fn validate(new: &NewEmployee) -> Result<(), EmployeeError> {
        if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
            return Err(EmployeeError::MissingName);
        }
        if new.user_id.trim().is_empty() {
            return Err(EmployeeError::MissingUserId);
        }
        if !EMAIL_RE.is_match(new.email.trim()) {
            return Err(EmployeeError::InvalidEmail(new.email.clone()));
        }
        if new.basic_salary < Decimal::ZERO || new.basic_salary > MAX_BASIC_SALARY {
            return Err(EmployeeError::SalaryOutOfRange(new.basic_salary));
        }
        Ok(())
    }

    /// Creates the employee, stores the profile photo and grants the default
    /// entitlements. A failed photo upload removes the new employee again.
    pub async fn create_employee(
        &self,
        new: NewEmployee,
        photo: Option<UploadDocument>,
    ) -> Result<Onboarding, EmployeeError> {
        Self::validate(&new)?;
        if let Some(photo) = &photo {
            photo
                .ensure_extension(&PHOTO_EXTENSIONS)
                .map_err(EmployeeError::Photo)?;
        }

        let employee = self
            .store
            .insert_employee(|id| Employee {
                id,
                user_id: new.user_id.trim().to_string(),
                first_name: new.first_name.trim().to_string(),
                last_name: new.last_name.trim().to_string(),
                email: new.email.trim().to_string(),
                contact_number: new
                    .contact_number
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from),
                join_date: new.join_date,
                basic_salary: new.basic_salary,
                department_id: new.department_id,
                position_id: new.position_id,
                profile_picture_url: None,
                is_active: true,
            })
            .map_err(|e| match e {
                StoreError::UniqueViolation { constraint: c, detail } if c == constraint::EMPLOYEE_EMAIL => {
                    EmployeeError::DuplicateEmail(detail)
                }
                StoreError::UniqueViolation { constraint: c, detail } if c == constraint::EMPLOYEE_CONTACT => {
                    EmployeeError::DuplicateContact(detail)
                }
                StoreError::UniqueViolation { constraint: c, detail } if c == constraint::EMPLOYEE_USER => {
                    EmployeeError::DuplicateUser(detail)
                }
                other => EmployeeError::Store(other),
            })?;

        let employee = match photo {
            Some(photo) => {
                let uploaded = upload_document(
                    self.storage.as_ref(),
                    &self.bucket,
                    &format!("profile-pictures/{}", employee.id),
                    &photo,
                    self.upload_timeout,
                )
                .await;
                match uploaded {
                    Ok(url) => {
                        self.store
                            .update_employee(employee.id, |e| e.profile_picture_url = Some(url))?
                            .0
                    }
                    Err(e) => {
                        warn!(
                            "Photo upload failed for new employee {}, rolling back: {}",
                            employee.id, e
                        );
                        if let Err(rollback) = self.store.delete_employee(employee.id) {
                            error!("Rollback of employee {} failed: {}", employee.id, rollback);
                        }
                        return Err(EmployeeError::Photo(e));
                    }
                }
            }
            None => employee,
        };

        let entitlements = self
            .ledger
            .initialize_entitlements(employee.id, employee.join_date)?;
        info!(
            "Employee {} ({}) onboarded, joined {}",
            employee.id,
            employee.full_name(),
            employee.join_date
        );
        Ok(Onboarding {
            employee,
            entitlements,
        })
    }

    /// Soft delete: the record and its history stay, payroll skips it.
    pub fn deactivate_employee(&self, employee_id: EmployeeId) -> Result<Employee, EmployeeError> {
        let (employee, was_active) = self
            .store
            .update_employee(employee_id, |e| std::mem::replace(&mut e.is_active, false))
            .map_err(|e| match e {
                StoreError::NotFound { .. } => EmployeeError::NotFound(employee_id),
                other => EmployeeError::Store(other),
            })?;
        if was_active {
            info!("Employee {} deactivated", employee_id);
        }
        Ok(employee)
    }
}
