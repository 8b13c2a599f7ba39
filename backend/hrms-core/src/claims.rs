// src/claims.rs
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::models::*;
use crate::storage::{upload_document, ObjectStorage, StorageError, UploadDocument};
use crate::store::{HrStore, StoreError};

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Employee {0} not found")]
    EmployeeNotFound(EmployeeId),
    #[error("Claim amount must be greater than zero")]
    InvalidAmount,
    #[error("A supporting document is required")]
    DocumentRequired,
    #[error("Document upload failed: {0}")]
    UploadFailed(#[source] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClaimError {
    pub fn code(&self) -> &'static str {
        match self {
            ClaimError::EmployeeNotFound(_) => "EMPLOYEE_NOT_FOUND",
            ClaimError::InvalidAmount => "INVALID_AMOUNT",
            ClaimError::DocumentRequired => "DOCUMENT_REQUIRED",
            ClaimError::UploadFailed(e) => e.code(),
            ClaimError::Store(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimApplication {
    pub employee_id: EmployeeId,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    pub description: String,
    pub document: Option<UploadDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimStatusSummary {
    pub status: ReviewStatus,
    pub count: usize,
    pub total_amount: Decimal,
}

#[derive(Clone)]
pub struct ClaimService {
    store: HrStore,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    upload_timeout: Duration,
}

impl ClaimService {
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

    /// Uploads the receipt first; nothing is written if the upload fails.
    pub async fn submit_claim(&self, application: ClaimApplication) -> Result<ExpenseClaim, ClaimError> {
        let ClaimApplication {
            employee_id,
            amount,
            expense_date,
            description,
            document,
        } = application;

        if amount <= Decimal::ZERO {
            return Err(ClaimError::InvalidAmount);
        }
        if self.store.get_employee(employee_id)?.is_none() {
            return Err(ClaimError::EmployeeNotFound(employee_id));
        }
        let document = document.ok_or(ClaimError::DocumentRequired)?;

        let url = upload_document(
            self.storage.as_ref(),
            &self.bucket,
            &format!("claims/{employee_id}"),
            &document,
            self.upload_timeout,
        )
        .await
        .map_err(|e| {
            warn!("Claim document upload failed for employee {}: {}", employee_id, e);
            ClaimError::UploadFailed(e)
        })?;

        let claim_date = self.clock.now();
        let claim = self.store.insert_claim(|id| ExpenseClaim {
            id,
            employee_id,
            claim_date,
            expense_date,
            amount,
            description: description.trim().to_string(),
            status: ReviewStatus::Pending,
            reject_reason: None,
            approved_by: None,
            documents: vec![ClaimDocument {
                file_name: document.file_name.clone(),
                url,
            }],
        })?;
        info!(
            "Claim #{} submitted by employee {}: {} on {}",
            claim.id, employee_id, amount, expense_date
        );
        Ok(claim)
    }

    /// Claims with an expense date in the month, grouped by status.
    pub fn claim_summary(&self, month: u32, year: i32) -> Result<Vec<ClaimStatusSummary>, ClaimError> {
        let mut by_status: BTreeMap<&'static str, ClaimStatusSummary> = BTreeMap::new();
        for claim in self
            .store
            .list_claims()?
            .into_iter()
            .filter(|c| c.expense_date.month() == month && c.expense_date.year() == year)
        {
            let entry = by_status
                .entry(claim.status.as_str())
                .or_insert(ClaimStatusSummary {
                    status: claim.status,
                    count: 0,
                    total_amount: Decimal::ZERO,
                });
            entry.count += 1;
            entry.total_amount += claim.amount;
        }
        Ok(by_status.into_values().collect())
    }
}
