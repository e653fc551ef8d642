//! Custom Resource Definitions consumed by the controller
//!
//! The GameServer CRD is installed and owned by Agones; this crate only
//! models the subset of it needed to expose game servers.

mod game_server;

pub use game_server::{
    GameServer, GameServerPort, GameServerSpec, GameServerState, GameServerStatus,
    GameServerStatusPort,
};
