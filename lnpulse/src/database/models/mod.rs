//! Database models.

pub mod delivery;
pub mod event;
pub mod notification;

pub use delivery::*;
pub use event::*;
pub use notification::*;
