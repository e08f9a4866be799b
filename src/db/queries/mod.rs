//! Database queries

pub mod batch;
pub mod collection_point;
pub mod order;
