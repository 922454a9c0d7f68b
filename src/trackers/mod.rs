//! Market and account state trackers, one actor apiece.

pub mod account;
pub mod book;
pub mod executions;
pub mod trades;

pub use account::AccountTracker;
pub use book::BookTracker;
pub use executions::ExecutionTracker;
pub use trades::TradesTracker;
