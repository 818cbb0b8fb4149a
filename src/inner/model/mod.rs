pub mod adapter_info;
pub mod characteristic_payload;
pub mod connection_state;
pub mod fqcn;
pub mod peripheral;
pub mod session_event;
pub mod scan_filters;
