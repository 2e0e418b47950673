mod channel;
mod memory;

pub use channel::*;
pub use memory::*;
