mod manager;
mod rtc;
mod transport;

pub use manager::*;
pub use rtc::*;
pub use transport::*;
