//! Shared types for the Shellmux terminal multiplexer.

mod events;
mod highlight;
mod history;
mod session;
mod target;

pub use events::*;
pub use highlight::*;
pub use history::*;
pub use session::*;
pub use target::*;
