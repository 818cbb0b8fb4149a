pub mod filter;
pub mod service_characteristic_key;
pub mod session_conf;
