//! Core types of the fissa client: the room data model, vote aggregation,
//! topic naming, the broker wrapper and the backend gateway contract.

mod config;
mod model;
mod topics;
mod util;
mod votes;

pub mod broker;
pub mod gateway;

pub use config::*;
pub use model::*;
pub use topics::*;
pub use util::*;
pub use votes::*;
