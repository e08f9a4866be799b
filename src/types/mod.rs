//! Type definitions

pub mod address;
pub mod batch;
pub mod messages;
pub mod order;
pub mod run;

pub use address::*;
pub use batch::*;
pub use messages::*;
pub use order::*;
pub use run::*;
