pub mod controller;
pub mod document;
pub mod schema;
pub mod validation;
pub mod versioned;
