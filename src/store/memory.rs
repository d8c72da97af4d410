use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::models::carrier_request::{CarrierRequest, RequestStatus};
use crate::models::parcel::{Parcel, ParcelDraft, ParcelEdit, ParcelFilter, ParcelStatus};
use crate::store::statement::StatementKind;
use crate::store::{Gateway, ParcelRepository, Statement, StoreError, Transaction};

const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Begin,
    Statement(StatementKind),
    Commit,
    Rollback,
}

#[derive(Default)]
struct Tables {
    parcels: BTreeMap<i64, Parcel>,
    requests: BTreeMap<i64, CarrierRequest>,
    last_parcel_id: i64,
    last_request_id: i64,
}

impl Tables {
    /// Applies `edit` to a parcel still in `created`; returns rows affected.
    fn edit_parcel(&mut self, parcel_id: i64, edit: &ParcelEdit) -> u64 {
        let Some(parcel) = self.parcels.get_mut(&parcel_id) else {
            return 0;
        };
        if parcel.status != ParcelStatus::Created {
            return 0;
        }

        if let Some(source_address) = &edit.source_address {
            parcel.source_address = source_address.clone();
        }
        if let Some(destination_address) = &edit.destination_address {
            parcel.destination_address = destination_address.clone();
        }
        if let Some(source_time) = edit.source_time {
            parcel.source_time = source_time;
        }
        if let Some(parcel_type) = &edit.parcel_type {
            parcel.parcel_type = parcel_type.clone();
        }
        parcel.updated_at = Utc::now();
        1
    }
}

struct Inner {
    tables: RwLock<Tables>,
    parcel_locks: DashMap<i64, Arc<Mutex<()>>>,
    connections: Arc<Semaphore>,
    failures: DashMap<FailurePoint, ()>,
    statement_log: Mutex<Vec<Statement>>,
}

impl Inner {
    fn parcel_lock(&self, parcel_id: i64) -> Arc<Mutex<()>> {
        self.parcel_locks
            .entry(parcel_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry once nobody holds or waits on it.
    fn release_parcel(&self, parcel_id: i64) {
        self.parcel_locks
            .remove_if(&parcel_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn should_fail(&self, point: FailurePoint) -> bool {
        self.failures.contains_key(&point)
    }
}

/// Relational store held in process memory.
///
/// Each transaction borrows one of a bounded number of connections and locks
/// every parcel it touches until it commits or rolls back, so concurrent
/// writers on one parcel are serialized while different parcels proceed
/// independently. Writes are staged in the transaction and only become
/// visible on commit.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_max_connections(DEFAULT_MAX_CONNECTIONS)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                parcel_locks: DashMap::new(),
                connections: Arc::new(Semaphore::new(max_connections.max(1))),
                failures: DashMap::new(),
                statement_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Makes every later operation at `point` fail until cleared.
    pub fn inject_failure(&self, point: FailurePoint) {
        self.inner.failures.insert(point, ());
    }

    pub fn clear_failures(&self) {
        self.inner.failures.clear();
    }

    /// Statements executed so far, in order, including rolled back ones.
    pub async fn statement_log(&self) -> Vec<Statement> {
        self.inner.statement_log.lock().await.clone()
    }

    /// Connections not currently lent to a transaction.
    pub fn idle_connections(&self) -> usize {
        self.inner.connections.available_permits()
    }
}

#[async_trait]
impl Gateway for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        if self.inner.should_fail(FailurePoint::Begin) {
            return Err(StoreError::Failure("injected failure on begin".to_string()));
        }

        let connection = self
            .inner
            .connections
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| StoreError::Failure(format!("connection pool closed: {err}")))?;

        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            _connection: connection,
            locks: HashMap::new(),
            staged_requests: BTreeMap::new(),
            staged_parcels: BTreeMap::new(),
        }))
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    _connection: OwnedSemaphorePermit,
    locks: HashMap<i64, OwnedMutexGuard<()>>,
    staged_requests: BTreeMap<i64, CarrierRequest>,
    staged_parcels: BTreeMap<i64, Parcel>,
}

impl MemoryTransaction {
    async fn lock_parcel(&mut self, parcel_id: i64) {
        if self.locks.contains_key(&parcel_id) {
            return;
        }
        let lock = self.inner.parcel_lock(parcel_id);
        let guard = lock.lock_owned().await;
        self.locks.insert(parcel_id, guard);
    }

    /// Committed rows for the parcel overlaid with this transaction's writes.
    fn requests_of(&self, tables: &Tables, parcel_id: i64) -> BTreeMap<i64, CarrierRequest> {
        let mut rows: BTreeMap<i64, CarrierRequest> = tables
            .requests
            .values()
            .filter(|request| request.parcel_id == parcel_id)
            .map(|request| (request.id, request.clone()))
            .collect();

        for (id, request) in &self.staged_requests {
            if request.parcel_id == parcel_id {
                rows.insert(*id, request.clone());
            }
        }
        rows
    }

    fn parcel_of(&self, tables: &Tables, parcel_id: i64) -> Option<Parcel> {
        self.staged_parcels
            .get(&parcel_id)
            .or_else(|| tables.parcels.get(&parcel_id))
            .cloned()
    }

    fn set_request_status(
        &mut self,
        rows: BTreeMap<i64, CarrierRequest>,
        matches: impl Fn(&CarrierRequest) -> bool,
        status: RequestStatus,
    ) -> Result<u64, StoreError> {
        let targets: Vec<CarrierRequest> = rows
            .values()
            .filter(|request| request.status == RequestStatus::Pending && matches(request))
            .cloned()
            .collect();

        if status == RequestStatus::Accepted && !targets.is_empty() {
            let already_accepted = rows
                .values()
                .any(|request| request.status == RequestStatus::Accepted);
            if already_accepted || targets.len() > 1 {
                return Err(StoreError::UniqueViolation(
                    "carrier_request_one_accepted_per_parcel".to_string(),
                ));
            }
        }

        let affected = targets.len() as u64;
        for mut request in targets {
            request.status = status;
            self.staged_requests.insert(request.id, request);
        }
        Ok(affected)
    }

    fn release_locks(&mut self) {
        for (parcel_id, guard) in self.locks.drain() {
            drop(guard);
            self.inner.release_parcel(parcel_id);
        }
    }

    fn discard(&mut self) {
        self.staged_requests.clear();
        self.staged_parcels.clear();
        self.release_locks();
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn exec(&mut self, statement: &Statement) -> Result<u64, StoreError> {
        self.lock_parcel(statement.parcel_id()).await;
        self.inner.statement_log.lock().await.push(statement.clone());

        if self
            .inner
            .should_fail(FailurePoint::Statement(statement.kind()))
        {
            return Err(StoreError::Failure(format!(
                "injected failure on {:?}",
                statement.kind()
            )));
        }

        match statement {
            Statement::AcceptRequest {
                parcel_id,
                carrier_id,
            } => {
                let rows = {
                    let tables = self.inner.tables.read().await;
                    self.requests_of(&tables, *parcel_id)
                };
                let carrier_id = *carrier_id;
                self.set_request_status(
                    rows,
                    |request| request.carrier_id == carrier_id,
                    RequestStatus::Accepted,
                )
            }
            Statement::RejectCompetingRequests {
                parcel_id,
                carrier_id,
            } => {
                let rows = {
                    let tables = self.inner.tables.read().await;
                    self.requests_of(&tables, *parcel_id)
                };
                let carrier_id = *carrier_id;
                self.set_request_status(
                    rows,
                    |request| request.carrier_id != carrier_id,
                    RequestStatus::Rejected,
                )
            }
            Statement::AssignParcel {
                parcel_id,
                carrier_id,
                assigned_at,
            } => {
                let parcel = {
                    let tables = self.inner.tables.read().await;
                    self.parcel_of(&tables, *parcel_id)
                };
                match parcel {
                    Some(mut parcel) if parcel.status == ParcelStatus::Created => {
                        parcel.carrier_id = Some(*carrier_id);
                        parcel.status = ParcelStatus::Assigned;
                        parcel.assigned_at = Some(*assigned_at);
                        parcel.updated_at = *assigned_at;
                        self.staged_parcels.insert(parcel.id, parcel);
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
            Statement::InsertCarrierRequest {
                parcel_id,
                carrier_id,
            } => {
                let mut tables = self.inner.tables.write().await;
                let open = self
                    .parcel_of(&tables, *parcel_id)
                    .is_some_and(|parcel| parcel.status == ParcelStatus::Created);
                if !open {
                    return Ok(0);
                }

                let duplicate = self
                    .requests_of(&tables, *parcel_id)
                    .values()
                    .any(|request| request.carrier_id == *carrier_id);
                if duplicate {
                    return Err(StoreError::UniqueViolation(
                        "carrier_request_parcel_id_carrier_id_key".to_string(),
                    ));
                }

                tables.last_request_id += 1;
                let request = CarrierRequest {
                    id: tables.last_request_id,
                    parcel_id: *parcel_id,
                    carrier_id: *carrier_id,
                    status: RequestStatus::Pending,
                    created_at: Utc::now(),
                };
                self.staged_requests.insert(request.id, request);
                Ok(1)
            }
        }
    }

    async fn request_status(
        &mut self,
        parcel_id: i64,
        carrier_id: i64,
    ) -> Result<Option<RequestStatus>, StoreError> {
        self.lock_parcel(parcel_id).await;
        let tables = self.inner.tables.read().await;
        Ok(self
            .requests_of(&tables, parcel_id)
            .values()
            .find(|request| request.carrier_id == carrier_id)
            .map(|request| request.status))
    }

    async fn parcel_status(&mut self, parcel_id: i64) -> Result<Option<ParcelStatus>, StoreError> {
        self.lock_parcel(parcel_id).await;
        let tables = self.inner.tables.read().await;
        Ok(self.parcel_of(&tables, parcel_id).map(|parcel| parcel.status))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.inner.should_fail(FailurePoint::Commit) {
            return Err(StoreError::Failure("injected failure on commit".to_string()));
        }

        {
            let mut tables = self.inner.tables.write().await;
            for (id, request) in std::mem::take(&mut self.staged_requests) {
                tables.requests.insert(id, request);
            }
            for (id, parcel) in std::mem::take(&mut self.staged_parcels) {
                tables.parcels.insert(id, parcel);
            }
        }
        self.release_locks();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.discard();
        if self.inner.should_fail(FailurePoint::Rollback) {
            return Err(StoreError::Failure("injected failure on rollback".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ParcelRepository for InMemoryStore {
    async fn insert_parcel(&self, draft: ParcelDraft) -> Result<Parcel, StoreError> {
        let mut tables = self.inner.tables.write().await;
        tables.last_parcel_id += 1;

        let now = Utc::now();
        let parcel = Parcel {
            id: tables.last_parcel_id,
            user_id: draft.user_id,
            carrier_id: None,
            status: ParcelStatus::Created,
            source_address: draft.source_address,
            destination_address: draft.destination_address,
            source_time: draft.source_time,
            parcel_type: draft.parcel_type,
            price: draft.price,
            carrier_fee: draft.carrier_fee,
            company_fee: draft.company_fee,
            assigned_at: None,
            created_at: now,
            updated_at: now,
        };

        tables.parcels.insert(parcel.id, parcel.clone());
        Ok(parcel)
    }

    async fn fetch_parcel(&self, parcel_id: i64) -> Result<Option<Parcel>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables.parcels.get(&parcel_id).cloned())
    }

    async fn list_parcels(&self, filter: ParcelFilter) -> Result<Vec<Parcel>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .parcels
            .values()
            .filter(|parcel| filter.status.is_none_or(|status| parcel.status == status))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn update_parcel(&self, parcel_id: i64, edit: &ParcelEdit) -> Result<u64, StoreError> {
        let guard = self.inner.parcel_lock(parcel_id).lock_owned().await;

        let updated = {
            let mut tables = self.inner.tables.write().await;
            tables.edit_parcel(parcel_id, edit)
        };
        drop(guard);
        self.inner.release_parcel(parcel_id);
        Ok(updated)
    }

    async fn list_requests(&self, parcel_id: i64) -> Result<Vec<CarrierRequest>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .requests
            .values()
            .filter(|request| request.parcel_id == parcel_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::{FailurePoint, InMemoryStore};
    use crate::models::carrier_request::RequestStatus;
    use crate::models::parcel::{ParcelDraft, ParcelEdit, ParcelFilter, ParcelStatus};
    use crate::store::statement::StatementKind;
    use crate::store::{Gateway, ParcelRepository, Statement, StoreError};

    fn draft() -> ParcelDraft {
        ParcelDraft {
            user_id: 1,
            source_address: "Dhaka Bangladesh".to_string(),
            destination_address: "Pabna Shadar".to_string(),
            source_time: Utc::now(),
            parcel_type: "Document".to_string(),
            price: dec!(200.00),
            carrier_fee: dec!(180.00),
            company_fee: dec!(20.00),
        }
    }

    async fn insert_request(store: &InMemoryStore, parcel_id: i64, carrier_id: i64) {
        let mut tx = store.begin().await.unwrap();
        let affected = tx
            .exec(&Statement::InsertCarrierRequest {
                parcel_id,
                carrier_id,
            })
            .await
            .unwrap();
        assert_eq!(affected, 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryStore::new();
        let parcel = store.insert_parcel(draft()).await.unwrap();
        insert_request(&store, parcel.id, 2).await;

        let mut tx = store.begin().await.unwrap();
        let affected = tx
            .exec(&Statement::AcceptRequest {
                parcel_id: parcel.id,
                carrier_id: 2,
            })
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(
            tx.request_status(parcel.id, 2).await.unwrap(),
            Some(RequestStatus::Accepted)
        );

        let committed = store.list_requests(parcel.id).await.unwrap();
        assert_eq!(committed[0].status, RequestStatus::Pending);

        tx.commit().await.unwrap();
        let committed = store.list_requests(parcel.id).await.unwrap();
        assert_eq!(committed[0].status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes_and_frees_its_connection() {
        let store = InMemoryStore::with_max_connections(2);
        let parcel = store.insert_parcel(draft()).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(store.idle_connections(), 1);
            tx.exec(&Statement::InsertCarrierRequest {
                parcel_id: parcel.id,
                carrier_id: 4,
            })
            .await
            .unwrap();
        }

        assert_eq!(store.idle_connections(), 2);
        assert!(store.list_requests(parcel.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn parcel_locks_are_released_with_their_transaction() {
        let store = InMemoryStore::new();
        let parcel = store.insert_parcel(draft()).await.unwrap();
        insert_request(&store, parcel.id, 2).await;

        let mut tx = store.begin().await.unwrap();
        for unknown in 1_000..1_010 {
            assert_eq!(tx.parcel_status(unknown).await.unwrap(), None);
        }
        tx.request_status(parcel.id, 2).await.unwrap();
        assert_eq!(store.inner.parcel_locks.len(), 11);
        tx.rollback().await.unwrap();
        assert!(store.inner.parcel_locks.is_empty());

        {
            let mut dropped = store.begin().await.unwrap();
            dropped.parcel_status(77).await.unwrap();
        }
        store
            .update_parcel(404, &ParcelEdit::default())
            .await
            .unwrap();
        assert!(store.inner.parcel_locks.is_empty());
    }

    #[tokio::test]
    async fn waiting_transaction_keeps_the_lock_entry() {
        let store = InMemoryStore::new();
        let parcel = store.insert_parcel(draft()).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.parcel_status(parcel.id).await.unwrap();

        let waiter = {
            let store = store.clone();
            let parcel_id = parcel.id;
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.exec(&Statement::InsertCarrierRequest {
                    parcel_id,
                    carrier_id: 3,
                })
                .await
                .unwrap();
                tx.commit().await.unwrap();
            })
        };
        tokio::task::yield_now().await;

        holder.commit().await.unwrap();
        waiter.await.unwrap();

        assert_eq!(store.list_requests(parcel.id).await.unwrap().len(), 1);
        assert!(store.inner.parcel_locks.is_empty());
    }

    #[tokio::test]
    async fn duplicate_request_is_a_unique_violation() {
        let store = InMemoryStore::new();
        let parcel = store.insert_parcel(draft()).await.unwrap();
        insert_request(&store, parcel.id, 2).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .exec(&Statement::InsertCarrierRequest {
                parcel_id: parcel.id,
                carrier_id: 2,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn insert_into_missing_parcel_affects_no_rows() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let affected = tx
            .exec(&Statement::InsertCarrierRequest {
                parcel_id: 42,
                carrier_id: 2,
            })
            .await
            .unwrap();

        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn injected_statement_failure_is_reported_and_logged() {
        let store = InMemoryStore::new();
        store.inject_failure(FailurePoint::Statement(StatementKind::AssignParcel));

        let mut tx = store.begin().await.unwrap();
        let statement = Statement::AssignParcel {
            parcel_id: 1,
            carrier_id: 2,
            assigned_at: Utc::now(),
        };
        assert!(tx.exec(&statement).await.is_err());
        assert_eq!(store.statement_log().await, vec![statement.clone()]);

        store.clear_failures();
        let affected = tx.exec(&statement).await.unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn edits_only_apply_to_created_parcels() {
        let store = InMemoryStore::new();
        let parcel = store.insert_parcel(draft()).await.unwrap();
        insert_request(&store, parcel.id, 2).await;

        let edit = ParcelEdit {
            destination_address: Some("Rajshahi".to_string()),
            ..Default::default()
        };
        assert_eq!(store.update_parcel(parcel.id, &edit).await.unwrap(), 1);

        let mut tx = store.begin().await.unwrap();
        tx.exec(&Statement::AssignParcel {
            parcel_id: parcel.id,
            carrier_id: 2,
            assigned_at: Utc::now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.update_parcel(parcel.id, &edit).await.unwrap(), 0);
        let stored = store.fetch_parcel(parcel.id).await.unwrap().unwrap();
        assert_eq!(stored.destination_address, "Rajshahi");
        assert_eq!(stored.status, ParcelStatus::Assigned);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_pages() {
        let store = InMemoryStore::new();
        for _ in 0..5 {
            store.insert_parcel(draft()).await.unwrap();
        }

        let page = store
            .list_parcels(ParcelFilter {
                status: Some(ParcelStatus::Created),
                limit: 2,
                offset: 3,
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), vec![4, 5]);

        let none = store
            .list_parcels(ParcelFilter {
                status: Some(ParcelStatus::Delivered),
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
