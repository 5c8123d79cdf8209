pub mod api;
pub mod cache;
pub mod events;
pub mod naming;
pub mod types;
pub mod worker;
