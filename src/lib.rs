pub mod audit;
pub mod config;
pub mod model;
pub mod observability;
pub mod report;
pub mod store;
