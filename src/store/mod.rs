pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod statement;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::carrier_request::{CarrierRequest, RequestStatus};
use crate::models::parcel::{Parcel, ParcelDraft, ParcelEdit, ParcelFilter, ParcelStatus};

pub use statement::Statement;

/// Store errors, classified at the gateway boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("store failure: {0}")]
    Failure(String),
}

/// An open transaction. Dropping it without `commit` discards every write.
#[async_trait]
pub trait Transaction: Send {
    /// Runs a write statement and returns the number of rows it affected.
    async fn exec(&mut self, statement: &Statement) -> Result<u64, StoreError>;

    async fn request_status(
        &mut self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<Option<RequestStatus>, StoreError>;

    async fn parcel_status(&mut self, parcel_id: i64) -> Result<Option<ParcelStatus>, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Transactional half of the persistence gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// CRUD half of the persistence gateway, used by the parcel service.
#[async_trait]
pub trait ParcelRepository: Send + Sync {
    async fn insert_parcel(&self, draft: ParcelDraft) -> Result<Parcel, StoreError>;

    async fn fetch_parcel(&self, parcel_id: i64) -> Result<Option<Parcel>, StoreError>;

    async fn list_parcels(&self, filter: ParcelFilter) -> Result<Vec<Parcel>, StoreError>;

    /// Applies `edit` only while the parcel is still `created`; returns affected rows.
    async fn update_parcel(&self, parcel_id: i64, edit: &ParcelEdit) -> Result<u64, StoreError>;

    async fn list_requests(&self, parcel_id: i64) -> Result<Vec<CarrierRequest>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
