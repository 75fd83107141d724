pub mod api;
pub mod classify;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod error;
pub mod inbound;
pub mod server;
pub mod stats;
pub mod transport;

pub use api::AdminServer;
pub use config::InboundDescriptor;
pub use controller::Controller;
pub use error::{Error, Result};
pub use inbound::Inbound;
pub use server::InboundServer;
pub use stats::{Event, Outcome, Stats, StatsRecorder, StatsSnapshot};

/// Header stamped on every duplicated request so backends can tell forked
/// traffic from direct traffic.
pub const NFORK_HEADER: &str = "x-nfork";
