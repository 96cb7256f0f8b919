pub mod agent;
pub mod bridge;
pub mod errors;
pub mod events;
pub mod models;
pub mod providers;
pub mod tools;
