pub mod inner;

pub use inner::conf::model::session_conf::SessionConf;
pub use inner::error::{ErrorKind, SessionError, SessionResult};
pub use inner::host::{HostModules, Profile, ProfileModule};
pub use inner::radio::btle::BtleRadio;
pub use inner::session::Session;
