pub mod accounts;
pub mod events;
pub mod health;
pub mod settings;
pub mod targets;
pub mod versions;
