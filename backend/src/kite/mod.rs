pub mod checksum;
pub mod gateway;
pub mod types;
