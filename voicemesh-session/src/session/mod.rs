mod command;
mod coordinator;
mod events;
mod session;
mod watchdog;

pub use command::SessionStatus;
pub use coordinator::*;
pub use events::*;
pub use session::SessionConfig;
pub use watchdog::WatchdogConfig;

pub(crate) use command::*;
pub(crate) use session::Session;
pub(crate) use watchdog::Watchdog;
