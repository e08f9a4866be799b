//! Business logic services

pub mod batch_writer;
pub mod batching;
pub mod clustering;
pub mod fallback;
pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod routing;
pub mod sequencer;
