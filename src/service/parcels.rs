use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info};

use crate::error::ParcelError;
use crate::models::carrier_request::CarrierRequest;
use crate::models::parcel::{
    NewParcel, Parcel, ParcelDraft, ParcelEdit, ParcelFilter, ParcelStatus,
};
use crate::observability::metrics::Metrics;
use crate::store::{ParcelRepository, StoreError};

pub const CARRIER_FEE: Decimal = dec!(180.00);
pub const COMPANY_FEE: Decimal = dec!(20.00);

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct ParcelService {
    repo: Arc<dyn ParcelRepository>,
    metrics: Metrics,
}

impl ParcelService {
    pub fn new(repo: Arc<dyn ParcelRepository>, metrics: Metrics) -> Self {
        Self { repo, metrics }
    }

    pub async fn create_parcel(&self, input: NewParcel) -> Result<Parcel, ParcelError> {
        input.validate().map_err(ParcelError::Invalid)?;
        let source_time = input
            .source_time
            .ok_or_else(|| ParcelError::Invalid("source time is required".to_string()))?;

        let draft = ParcelDraft {
            user_id: input.user_id,
            source_address: input.source_address,
            destination_address: input.destination_address,
            source_time,
            parcel_type: input.parcel_type,
            price: CARRIER_FEE + COMPANY_FEE,
            carrier_fee: CARRIER_FEE,
            company_fee: COMPANY_FEE,
        };

        let parcel = self.repo.insert_parcel(draft).await.map_err(|err| {
            error!(error = %err, "failed to create parcel");
            internal(err)
        })?;

        self.metrics.parcels_created_total.inc();
        info!(parcel_id = parcel.id, user_id = parcel.user_id, "parcel created");
        Ok(parcel)
    }

    pub async fn get_parcel(&self, parcel_id: i64) -> Result<Parcel, ParcelError> {
        self.repo
            .fetch_parcel(parcel_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ParcelError::NotFound(format!("parcel {parcel_id} not found")))
    }

    pub async fn list_parcels(
        &self,
        status: Option<ParcelStatus>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Parcel>, ParcelError> {
        let filter = ParcelFilter {
            status,
            limit: limit
                .filter(|limit| *limit > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        };

        self.repo.list_parcels(filter).await.map_err(internal)
    }

    /// Edits a parcel that has not been assigned yet.
    pub async fn edit_parcel(
        &self,
        parcel_id: i64,
        edit: ParcelEdit,
    ) -> Result<Parcel, ParcelError> {
        edit.validate().map_err(ParcelError::Invalid)?;

        let updated = self
            .repo
            .update_parcel(parcel_id, &edit)
            .await
            .map_err(internal)?;

        if updated == 0 {
            let parcel = self.get_parcel(parcel_id).await?;
            return Err(ParcelError::Invalid(format!(
                "parcel {parcel_id} is {} and can no longer be edited",
                parcel.status.as_str()
            )));
        }

        info!(parcel_id, "parcel edited");
        self.get_parcel(parcel_id).await
    }

    pub async fn list_requests(&self, parcel_id: i64) -> Result<Vec<CarrierRequest>, ParcelError> {
        self.get_parcel(parcel_id).await?;
        self.repo.list_requests(parcel_id).await.map_err(internal)
    }
}

fn internal(err: StoreError) -> ParcelError {
    match err {
        StoreError::UniqueViolation(msg) => ParcelError::Invalid(msg),
        other => ParcelError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::ParcelService;
    use crate::error::ParcelError;
    use crate::models::parcel::{NewParcel, ParcelEdit, ParcelStatus};
    use crate::observability::metrics::Metrics;
    use crate::store::memory::InMemoryStore;

    fn service() -> ParcelService {
        ParcelService::new(Arc::new(InMemoryStore::new()), Metrics::new())
    }

    fn new_parcel() -> NewParcel {
        NewParcel {
            user_id: 1,
            source_address: "Dhaka Bangladesh".to_string(),
            destination_address: "Pabna Shadar".to_string(),
            source_time: Some(Utc::now()),
            parcel_type: "Document".to_string(),
        }
    }

    #[tokio::test]
    async fn created_parcel_carries_fixed_fees() {
        let parcel = service().create_parcel(new_parcel()).await.unwrap();

        assert_eq!(parcel.status, ParcelStatus::Created);
        assert_eq!(parcel.carrier_id, None);
        assert_eq!(parcel.carrier_fee, dec!(180.00));
        assert_eq!(parcel.company_fee, dec!(20.00));
        assert_eq!(parcel.price, dec!(200.00));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let service = service();
        let err = service
            .create_parcel(NewParcel {
                user_id: 1,
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ParcelError::Invalid(_)));
        assert!(service.list_parcels(None, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_parcel_is_not_found() {
        let err = service().get_parcel(9).await.unwrap_err();
        assert!(matches!(err, ParcelError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_caps_page_size() {
        let service = service();
        for _ in 0..3 {
            service.create_parcel(new_parcel()).await.unwrap();
        }

        let page = service.list_parcels(None, Some(2), None).await.unwrap();
        assert_eq!(page.len(), 2);

        let rest = service.list_parcels(None, Some(500), Some(2)).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn edit_updates_only_given_fields() {
        let service = service();
        let parcel = service.create_parcel(new_parcel()).await.unwrap();

        let edited = service
            .edit_parcel(
                parcel.id,
                ParcelEdit {
                    destination_address: Some("Rajshahi".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.destination_address, "Rajshahi");
        assert_eq!(edited.source_address, parcel.source_address);
    }

    #[tokio::test]
    async fn edit_of_missing_parcel_is_not_found() {
        let err = service()
            .edit_parcel(
                3,
                ParcelEdit {
                    parcel_type: Some("Box".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ParcelError::NotFound(_)));
    }
}
