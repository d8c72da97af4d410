use chrono::{DateTime, Utc};

/// Parameterised write statements issued inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `$1` parcel id, `$2` carrier id.
    AcceptRequest { parcel_id: i64, carrier_id: i64 },
    /// `$1` parcel id, `$2` winning carrier id.
    RejectCompetingRequests { parcel_id: i64, carrier_id: i64 },
    /// `$1` parcel id, `$2` carrier id, `$3` assignment time.
    AssignParcel {
        parcel_id: i64,
        carrier_id: i64,
        assigned_at: DateTime<Utc>,
    },
    /// `$1` parcel id, `$2` carrier id.
    InsertCarrierRequest { parcel_id: i64, carrier_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    AcceptRequest,
    RejectCompetingRequests,
    AssignParcel,
    InsertCarrierRequest,
}

const ACCEPT_REQUEST: &str = "UPDATE carrier_request \
     SET status = 'accepted', updated_at = now() \
     WHERE parcel_id = $1 AND carrier_id = $2 AND status = 'pending'";

const REJECT_COMPETING_REQUESTS: &str = "UPDATE carrier_request \
     SET status = 'rejected', updated_at = now() \
     WHERE parcel_id = $1 AND carrier_id <> $2 AND status = 'pending'";

const ASSIGN_PARCEL: &str = "UPDATE parcel \
     SET carrier_id = $2, status = 'assigned', assigned_at = $3, updated_at = $3 \
     WHERE id = $1 AND status = 'created'";

const INSERT_CARRIER_REQUEST: &str = "INSERT INTO carrier_request (parcel_id, carrier_id, status) \
     SELECT $1, $2, 'pending' \
     WHERE EXISTS (SELECT 1 FROM parcel WHERE id = $1 AND status = 'created')";

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::AcceptRequest { .. } => StatementKind::AcceptRequest,
            Statement::RejectCompetingRequests { .. } => StatementKind::RejectCompetingRequests,
            Statement::AssignParcel { .. } => StatementKind::AssignParcel,
            Statement::InsertCarrierRequest { .. } => StatementKind::InsertCarrierRequest,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self.kind() {
            StatementKind::AcceptRequest => ACCEPT_REQUEST,
            StatementKind::RejectCompetingRequests => REJECT_COMPETING_REQUESTS,
            StatementKind::AssignParcel => ASSIGN_PARCEL,
            StatementKind::InsertCarrierRequest => INSERT_CARRIER_REQUEST,
        }
    }

    /// Every statement is keyed by exactly one parcel.
    pub fn parcel_id(&self) -> i64 {
        match self {
            Statement::AcceptRequest { parcel_id, .. }
            | Statement::RejectCompetingRequests { parcel_id, .. }
            | Statement::AssignParcel { parcel_id, .. }
            | Statement::InsertCarrierRequest { parcel_id, .. } => *parcel_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Statement, StatementKind};

    #[test]
    fn request_updates_only_touch_pending_rows() {
        let accept = Statement::AcceptRequest {
            parcel_id: 1,
            carrier_id: 2,
        };
        let reject = Statement::RejectCompetingRequests {
            parcel_id: 1,
            carrier_id: 2,
        };

        assert!(accept.sql().contains("status = 'pending'"));
        assert!(reject.sql().contains("carrier_id <> $2"));
        assert!(reject.sql().contains("status = 'pending'"));
    }

    #[test]
    fn parcel_update_is_guarded_by_created_status() {
        let assign = Statement::AssignParcel {
            parcel_id: 7,
            carrier_id: 3,
            assigned_at: Utc::now(),
        };

        assert_eq!(assign.kind(), StatementKind::AssignParcel);
        assert_eq!(assign.parcel_id(), 7);
        assert!(assign.sql().contains("WHERE id = $1 AND status = 'created'"));
    }
}
