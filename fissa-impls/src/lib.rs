mod catalog;
mod http_gateway;
mod mqtt;

pub use catalog::*;
pub use http_gateway::*;
pub use mqtt::*;
