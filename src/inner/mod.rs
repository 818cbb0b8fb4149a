pub mod conf;
pub mod connection;
pub(crate) mod debounce_limiter;
pub mod dto;
pub mod error;
pub(crate) mod events;
pub mod gatt;
pub mod host;
pub(crate) mod key_lock;
pub mod metrics;
pub mod model;
pub mod radio;
pub(crate) mod registry;
pub mod scanner;
pub mod session;
pub mod telemetry;
