mod capture;
mod controller;
mod frame;
mod output;

pub use capture::*;
pub use controller::*;
pub use frame::*;
pub use output::*;
