pub mod cmd_args;
pub mod dto;
pub(crate) mod manager;
pub mod model;
pub mod traits;
