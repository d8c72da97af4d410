pub mod carrier_requests;
pub mod parcels;
