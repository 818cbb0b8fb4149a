pub mod known_device;
pub mod session_configuration;
