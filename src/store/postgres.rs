use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::carrier_request::{CarrierRequest, RequestStatus};
use crate::models::parcel::{Parcel, ParcelDraft, ParcelEdit, ParcelFilter, ParcelStatus};
use crate::store::{Gateway, ParcelRepository, Statement, StoreError, Transaction};

const PARCEL_COLUMNS: &str = "id, user_id, carrier_id, status, source_address, \
     destination_address, source_time, type, price, carrier_fee, company_fee, \
     assigned_at, created_at, updated_at";

/// Postgres-backed gateway over a bounded `sqlx` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let max_connections = config.max_open_conn();
        let pool = pool_options(config)
            .connect(&config.url())
            .await
            .map_err(classify)?;

        info!(
            host = %config.host,
            database = %config.name,
            max_connections,
            "connected to postgres"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations under `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Failure(format!("migration failed: {err}")))
    }
}

/// sqlx has no idle ceiling, so `max_idle_conn` is the number of connections
/// kept warm. It never exceeds the open limit.
fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    let max_connections = config.max_open_conn();
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(config.max_idle_conn().min(max_connections))
        .max_lifetime(config.conn_max_lifetime())
}

fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => StoreError::UniqueViolation(
                db_err.constraint().unwrap_or("unique constraint").to_string(),
            ),
            Some("40001") | Some("40P01") => StoreError::Conflict(db_err.message().to_string()),
            Some("23503") => StoreError::NotFound(db_err.message().to_string()),
            _ => StoreError::Failure(err.to_string()),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        _ => StoreError::Failure(err.to_string()),
    }
}

fn parcel_from_row(row: &PgRow) -> Result<Parcel, StoreError> {
    let status: String = row.try_get("status").map_err(classify)?;
    let status = ParcelStatus::parse(&status)
        .ok_or_else(|| StoreError::Failure(format!("unknown parcel status '{status}'")))?;

    Ok(Parcel {
        id: row.try_get("id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        carrier_id: row.try_get("carrier_id").map_err(classify)?,
        status,
        source_address: row.try_get("source_address").map_err(classify)?,
        destination_address: row.try_get("destination_address").map_err(classify)?,
        source_time: row.try_get("source_time").map_err(classify)?,
        parcel_type: row.try_get("type").map_err(classify)?,
        price: row.try_get("price").map_err(classify)?,
        carrier_fee: row.try_get("carrier_fee").map_err(classify)?,
        company_fee: row.try_get("company_fee").map_err(classify)?,
        assigned_at: row.try_get("assigned_at").map_err(classify)?,
        created_at: row.try_get("created_at").map_err(classify)?,
        updated_at: row.try_get("updated_at").map_err(classify)?,
    })
}

fn request_from_row(row: &PgRow) -> Result<CarrierRequest, StoreError> {
    let status: String = row.try_get("status").map_err(classify)?;
    let status = RequestStatus::parse(&status)
        .ok_or_else(|| StoreError::Failure(format!("unknown request status '{status}'")))?;

    Ok(CarrierRequest {
        id: row.try_get("id").map_err(classify)?,
        parcel_id: row.try_get("parcel_id").map_err(classify)?,
        carrier_id: row.try_get("carrier_id").map_err(classify)?,
        status,
        created_at: row.try_get("created_at").map_err(classify)?,
    })
}

#[async_trait]
impl Gateway for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Competing assignments and late carrier requests on one parcel must
        // abort rather than interleave.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }
}

struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Failure("transaction already finished".to_string()))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn exec(&mut self, statement: &Statement) -> Result<u64, StoreError> {
        let query = sqlx::query::<Postgres>(statement.sql());
        let query = match statement {
            Statement::AcceptRequest {
                parcel_id,
                carrier_id,
            }
            | Statement::RejectCompetingRequests {
                parcel_id,
                carrier_id,
            }
            | Statement::InsertCarrierRequest {
                parcel_id,
                carrier_id,
            } => query.bind(*parcel_id).bind(*carrier_id),
            Statement::AssignParcel {
                parcel_id,
                carrier_id,
                assigned_at,
            } => query.bind(*parcel_id).bind(*carrier_id).bind(*assigned_at),
        };

        let tx = self.open()?;
        let result = query.execute(&mut **tx).await.map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn request_status(
        &mut self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<Option<RequestStatus>, StoreError> {
        let tx = self.open()?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM carrier_request WHERE parcel_id = $1 AND carrier_id = $2",
        )
        .bind(parcel_id)
        .bind(carrier_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)?;

        row.map(|(status,)| {
            RequestStatus::parse(&status)
                .ok_or_else(|| StoreError::Failure(format!("unknown request status '{status}'")))
        })
        .transpose()
    }

    async fn parcel_status(&mut self, parcel_id: i64) -> Result<Option<ParcelStatus>, StoreError> {
        let tx = self.open()?;
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM parcel WHERE id = $1")
            .bind(parcel_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(classify)?;

        row.map(|(status,)| {
            ParcelStatus::parse(&status)
                .ok_or_else(|| StoreError::Failure(format!("unknown parcel status '{status}'")))
        })
        .transpose()
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Failure("transaction already finished".to_string()))?;
        tx.commit().await.map_err(classify)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        // A failed commit has already ended the transaction server-side.
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(classify),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ParcelRepository for PgStore {
    async fn insert_parcel(&self, draft: ParcelDraft) -> Result<Parcel, StoreError> {
        let sql = format!(
            "INSERT INTO parcel (user_id, source_address, destination_address, source_time, type, \
             price, carrier_fee, company_fee) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PARCEL_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(draft.user_id)
            .bind(&draft.source_address)
            .bind(&draft.destination_address)
            .bind(draft.source_time)
            .bind(&draft.parcel_type)
            .bind(draft.price)
            .bind(draft.carrier_fee)
            .bind(draft.company_fee)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        parcel_from_row(&row)
    }

    async fn fetch_parcel(&self, parcel_id: i64) -> Result<Option<Parcel>, StoreError> {
        let sql = format!("SELECT {PARCEL_COLUMNS} FROM parcel WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(parcel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(parcel_from_row).transpose()
    }

    async fn list_parcels(&self, filter: ParcelFilter) -> Result<Vec<Parcel>, StoreError> {
        let sql = format!(
            "SELECT {PARCEL_COLUMNS} FROM parcel \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|status| status.as_str()))
            .bind(i64::from(filter.limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(parcel_from_row).collect()
    }

    async fn update_parcel(&self, parcel_id: i64, edit: &ParcelEdit) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE parcel SET \
               source_address = COALESCE($2, source_address), \
               destination_address = COALESCE($3, destination_address), \
               source_time = COALESCE($4, source_time), \
               type = COALESCE($5, type), \
               updated_at = now() \
             WHERE id = $1 AND status = 'created'",
        )
        .bind(parcel_id)
        .bind(edit.source_address.as_deref())
        .bind(edit.destination_address.as_deref())
        .bind(edit.source_time)
        .bind(edit.parcel_type.as_deref())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected())
    }

    async fn list_requests(&self, parcel_id: i64) -> Result<Vec<CarrierRequest>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, parcel_id, carrier_id, status, created_at \
             FROM carrier_request WHERE parcel_id = $1 ORDER BY id",
        )
        .bind(parcel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter().map(request_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
