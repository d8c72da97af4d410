use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::engine::assignment::TransactionManager;
use crate::error::{AssignmentError, RequestError};
use crate::models::carrier_request::Assignment;
use crate::models::parcel::ParcelStatus;
use crate::observability::metrics::Metrics;
use crate::store::{Gateway, Statement, StoreError};

/// Entry point for carriers: bidding on a parcel and settling who delivers it.
pub struct CarrierRequestService {
    gateway: Arc<dyn Gateway>,
    manager: TransactionManager,
    assign_timeout: Duration,
    metrics: Metrics,
}

impl CarrierRequestService {
    pub fn new(gateway: Arc<dyn Gateway>, assign_timeout: Duration, metrics: Metrics) -> Self {
        Self {
            manager: TransactionManager::new(gateway.clone()),
            gateway,
            assign_timeout,
            metrics,
        }
    }

    /// Records a pending request of `carrier_id` for `parcel_id`.
    pub async fn submit_request(
        &self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<(), RequestError> {
        let result = self.insert_request(parcel_id, carrier_id).await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(RequestError::Duplicate { .. }) => "duplicate",
            Err(RequestError::ParcelNotFound(_) | RequestError::ParcelClosed(_)) => "rejected",
            Err(RequestError::Generic(_)) => "error",
        };
        self.metrics
            .carrier_requests_total
            .with_label_values(&[outcome])
            .inc();

        match &result {
            Ok(()) => info!(parcel_id, carrier_id, "carrier request submitted"),
            Err(RequestError::Generic(err)) => {
                error!(parcel_id, carrier_id, error = %err, "failed to submit carrier request")
            }
            Err(err) => warn!(parcel_id, carrier_id, error = %err, "carrier request refused"),
        }
        result
    }

    async fn insert_request(&self, parcel_id: i64, carrier_id: i64) -> Result<(), RequestError> {
        let mut tx = self
            .gateway
            .begin()
            .await
            .map_err(|err| RequestError::Generic(format!("begin failed: {err}")))?;

        let inserted = match tx
            .exec(&Statement::InsertCarrierRequest {
                parcel_id,
                carrier_id,
            })
            .await
        {
            Ok(inserted) => inserted,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(parcel_id, error = %rollback_err, "failed to roll back carrier request");
                }
                return Err(insert_error(parcel_id, carrier_id, err));
            }
        };

        if inserted == 0 {
            let status = tx.parcel_status(parcel_id).await;
            if let Err(rollback_err) = tx.rollback().await {
                error!(parcel_id, error = %rollback_err, "failed to roll back carrier request");
            }
            return Err(match status {
                Ok(None) => RequestError::ParcelNotFound(parcel_id),
                Ok(Some(ParcelStatus::Created)) => {
                    RequestError::Generic(format!("request for parcel {parcel_id} was not stored"))
                }
                Ok(Some(_)) => RequestError::ParcelClosed(parcel_id),
                Err(err) => RequestError::Generic(err.to_string()),
            });
        }

        tx.commit()
            .await
            .map_err(|err| insert_error(parcel_id, carrier_id, err))
    }

    /// Accepts `carrier_id` for `parcel_id` and rejects every competitor.
    pub async fn assign_carrier(
        &self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<Assignment, AssignmentError> {
        let start = Instant::now();
        let result = self
            .manager
            .assign_carrier_within(parcel_id, carrier_id, self.assign_timeout)
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AssignmentError::InvalidState(_)) => "invalid_state",
            Err(AssignmentError::NotFound(_)) => "not_found",
            Err(AssignmentError::TransactionFailure(_) | AssignmentError::Generic(_)) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }
}

/// A serialization conflict on the insert means an assignment of the same
/// parcel committed first.
fn insert_error(parcel_id: i64, carrier_id: i64, err: StoreError) -> RequestError {
    match err {
        StoreError::UniqueViolation(_) => RequestError::Duplicate {
            parcel_id,
            carrier_id,
        },
        StoreError::Conflict(_) => RequestError::ParcelClosed(parcel_id),
        StoreError::NotFound(_) => RequestError::ParcelNotFound(parcel_id),
        StoreError::Failure(msg) => RequestError::Generic(msg),
    }
}
