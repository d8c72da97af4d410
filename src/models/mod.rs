pub mod carrier_request;
pub mod parcel;
