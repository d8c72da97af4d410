//! Carrier assignment transaction.
//!
//! Assigning a carrier to a parcel is one transaction of three statements,
//! always issued in this order:
//!
//! 1. accept the chosen carrier's pending request,
//! 2. reject every other pending request for the parcel,
//! 3. move the parcel to `assigned` with the winning carrier and a timestamp.
//!
//! Either all three effects commit or none do. The accept step must touch a
//! row; when it does not, the request is absent or already terminal and the
//! transaction is rolled back before anyone else's request is rejected.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::AssignmentError;
use crate::models::carrier_request::Assignment;
use crate::store::statement::StatementKind;
use crate::store::{Gateway, Statement, StoreError, Transaction};

pub struct TransactionManager {
    gateway: Arc<dyn Gateway>,
}

impl TransactionManager {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn assign_carrier(
        &self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<Assignment, AssignmentError> {
        self.assign_carrier_with_cancel(parcel_id, carrier_id, std::future::pending())
            .await
    }

    /// Like [`assign_carrier`](Self::assign_carrier), rolled back if not done within `timeout`.
    pub async fn assign_carrier_within(
        &self,
        parcel_id: i64,
        carrier_id: i64,
        timeout: Duration,
    ) -> Result<Assignment, AssignmentError> {
        self.assign_carrier_with_cancel(parcel_id, carrier_id, tokio::time::sleep(timeout))
            .await
    }

    /// Runs the assignment until `cancel` resolves. A cancelled assignment is
    /// rolled back and reported as a transaction failure.
    pub async fn assign_carrier_with_cancel<F>(
        &self,
        parcel_id: i64,
        carrier_id: i64,
        cancel: F,
    ) -> Result<Assignment, AssignmentError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);

        // Waiting for a pooled connection counts against the caller's deadline.
        let begun = tokio::select! {
            biased;
            _ = &mut cancel => Err(AssignmentError::TransactionFailure(
                "assignment cancelled before the transaction began".to_string(),
            )),
            begun = self.gateway.begin() => begun.map_err(|err| {
                AssignmentError::TransactionFailure(format!("begin failed: {err}"))
            }),
        };
        let mut tx = match begun {
            Ok(tx) => tx,
            Err(err) => {
                error!(
                    parcel_id,
                    carrier_id,
                    error = %err,
                    "failed to begin assignment transaction"
                );
                return Err(err);
            }
        };

        let assigned_at = Utc::now();
        let outcome = tokio::select! {
            biased;
            _ = &mut cancel => Err(AssignmentError::TransactionFailure(
                "assignment cancelled before commit".to_string(),
            )),
            outcome = run_statements(tx.as_mut(), parcel_id, carrier_id, assigned_at) => outcome,
        };

        let rejected_requests = match outcome {
            Ok(rejected) => rejected,
            Err(err) => {
                log_failure(parcel_id, carrier_id, &err);
                rollback(tx.as_mut(), parcel_id).await;
                return Err(err);
            }
        };

        if let Err(err) = tx.commit().await {
            let err = AssignmentError::TransactionFailure(format!("commit failed: {err}"));
            log_failure(parcel_id, carrier_id, &err);
            rollback(tx.as_mut(), parcel_id).await;
            return Err(err);
        }

        info!(parcel_id, carrier_id, rejected_requests, "carrier assigned");

        Ok(Assignment {
            parcel_id,
            carrier_id,
            rejected_requests,
            assigned_at,
        })
    }
}

/// Issues the three statements; returns how many competing requests were rejected.
async fn run_statements(
    tx: &mut dyn Transaction,
    parcel_id: i64,
    carrier_id: i64,
    assigned_at: DateTime<Utc>,
) -> Result<u64, AssignmentError> {
    let accepted = exec(
        tx,
        Statement::AcceptRequest {
            parcel_id,
            carrier_id,
        },
    )
    .await?;

    if accepted == 0 {
        let status = tx
            .request_status(parcel_id, carrier_id)
            .await
            .map_err(|err| classify(StatementKind::AcceptRequest, err))?;

        return Err(match status {
            None => AssignmentError::NotFound(format!(
                "carrier {carrier_id} has no request for parcel {parcel_id}"
            )),
            Some(status) => AssignmentError::InvalidState(format!(
                "request of carrier {carrier_id} for parcel {parcel_id} is already {}",
                status.as_str()
            )),
        });
    }

    let rejected = exec(
        tx,
        Statement::RejectCompetingRequests {
            parcel_id,
            carrier_id,
        },
    )
    .await?;

    let assigned = exec(
        tx,
        Statement::AssignParcel {
            parcel_id,
            carrier_id,
            assigned_at,
        },
    )
    .await?;

    if assigned == 0 {
        let status = tx
            .parcel_status(parcel_id)
            .await
            .map_err(|err| classify(StatementKind::AssignParcel, err))?;

        return Err(match status {
            None => AssignmentError::NotFound(format!("parcel {parcel_id} not found")),
            Some(status) => AssignmentError::InvalidState(format!(
                "parcel {parcel_id} is {}, not created",
                status.as_str()
            )),
        });
    }

    Ok(rejected)
}

async fn exec(tx: &mut dyn Transaction, statement: Statement) -> Result<u64, AssignmentError> {
    tx.exec(&statement)
        .await
        .map_err(|err| classify(statement.kind(), err))
}

fn classify(step: StatementKind, err: StoreError) -> AssignmentError {
    match err {
        StoreError::UniqueViolation(constraint) => {
            AssignmentError::InvalidState(format!("{step:?}: constraint {constraint} violated"))
        }
        StoreError::Conflict(msg) => {
            AssignmentError::InvalidState(format!("{step:?}: concurrent assignment: {msg}"))
        }
        StoreError::NotFound(msg) => AssignmentError::NotFound(format!("{step:?}: {msg}")),
        StoreError::Failure(msg) => AssignmentError::Generic(format!("{step:?}: {msg}")),
    }
}

async fn rollback(tx: &mut dyn Transaction, parcel_id: i64) {
    if let Err(err) = tx.rollback().await {
        error!(parcel_id, error = %err, "failed to roll back assignment transaction");
    }
}

fn log_failure(parcel_id: i64, carrier_id: i64, err: &AssignmentError) {
    match err {
        AssignmentError::InvalidState(_) | AssignmentError::NotFound(_) => {
            warn!(parcel_id, carrier_id, error = %err, "assignment rejected");
        }
        AssignmentError::TransactionFailure(_) | AssignmentError::Generic(_) => {
            error!(parcel_id, carrier_id, error = %err, "assignment failed");
        }
    }
}
