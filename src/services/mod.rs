// Service layer - aggregation, persistence boundary, pool sync, HTTP API

pub mod api;
pub mod database;
pub mod sink;
pub mod stats;
pub mod sync;
