pub mod channels;
pub mod config;
pub mod http;
mod main_logic;

pub use channels::ChannelCache;
pub use http::{GatewayState, build_router};
pub use main_logic::run;
