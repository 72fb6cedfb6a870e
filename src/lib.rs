pub mod config;
pub mod logic;
pub mod model;
pub mod serialization;
