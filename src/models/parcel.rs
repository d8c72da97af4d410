use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParcelStatus {
    Created,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl ParcelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelStatus::Created => "created",
            ParcelStatus::Assigned => "assigned",
            ParcelStatus::InTransit => "in_transit",
            ParcelStatus::Delivered => "delivered",
            ParcelStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(ParcelStatus::Created),
            "assigned" => Some(ParcelStatus::Assigned),
            "in_transit" => Some(ParcelStatus::InTransit),
            "delivered" => Some(ParcelStatus::Delivered),
            "cancelled" => Some(ParcelStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parcel {
    pub id: i64,
    pub user_id: i64,
    pub carrier_id: Option<i64>,
    pub status: ParcelStatus,
    pub source_address: String,
    pub destination_address: String,
    pub source_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub parcel_type: String,
    pub price: Decimal,
    pub carrier_fee: Decimal,
    pub company_fee: Decimal,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer input for a new parcel. Pricing is filled in by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewParcel {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub source_address: String,
    #[serde(default)]
    pub destination_address: String,
    pub source_time: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub parcel_type: String,
}

impl NewParcel {
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id == 0 {
            return Err("user id is required".to_string());
        }
        if self.source_address.trim().is_empty() {
            return Err("source address is required".to_string());
        }
        if self.destination_address.trim().is_empty() {
            return Err("destination address is required".to_string());
        }
        if self.source_time.is_none() {
            return Err("source time is required".to_string());
        }
        if self.parcel_type.trim().is_empty() {
            return Err("parcel type is required".to_string());
        }
        Ok(())
    }
}

/// Row handed to the repository once the service has validated and priced it.
#[derive(Debug, Clone)]
pub struct ParcelDraft {
    pub user_id: i64,
    pub source_address: String,
    pub destination_address: String,
    pub source_time: DateTime<Utc>,
    pub parcel_type: String,
    pub price: Decimal,
    pub carrier_fee: Decimal,
    pub company_fee: Decimal,
}

/// Editable fields; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParcelEdit {
    pub source_address: Option<String>,
    pub destination_address: Option<String>,
    pub source_time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub parcel_type: Option<String>,
}

impl ParcelEdit {
    pub fn is_empty(&self) -> bool {
        self.source_address.is_none()
            && self.destination_address.is_none()
            && self.source_time.is_none()
            && self.parcel_type.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("nothing to update".to_string());
        }
        let blank = |value: &Option<String>| value.as_deref().is_some_and(|v| v.trim().is_empty());
        if blank(&self.source_address) {
            return Err("source address cannot be empty".to_string());
        }
        if blank(&self.destination_address) {
            return Err("destination address cannot be empty".to_string());
        }
        if blank(&self.parcel_type) {
            return Err("parcel type cannot be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParcelFilter {
    pub status: Option<ParcelStatus>,
    pub limit: u32,
    pub offset: u32,
}
