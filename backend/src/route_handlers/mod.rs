pub mod auth;
pub mod instruments;
pub mod market;
pub mod system;
