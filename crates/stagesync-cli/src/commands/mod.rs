pub mod common;
pub mod drain;
pub mod get;
pub mod list;
pub mod queue;
pub mod resync;
pub mod set;
