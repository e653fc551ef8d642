//! Agones GameServer resource
//!
//! Only the fields the controller reads are modelled. The CRD itself is owned
//! and installed by Agones, so writes back to a GameServer always go through
//! merge patches and never replace the whole object.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "agones.dev",
    version = "v1",
    kind = "GameServer",
    namespaced,
    status = "GameServerStatus",
    shortname = "gs"
)]
#[serde(rename_all = "camelCase")]
pub struct GameServerSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<GameServerPort>,
}

/// Port declared on the GameServer container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameServerPort {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub container_port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameServerStatus {
    #[serde(default)]
    pub state: GameServerState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<GameServerStatusPort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Port allocated to a running GameServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GameServerStatusPort {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub port: i32,
}

/// Lifecycle state reported by Agones
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum GameServerState {
    PortAllocation,
    Creating,
    Starting,
    Scheduled,
    RequestReady,
    Ready,
    Shutdown,
    Error,
    Unhealthy,
    Reserved,
    Allocated,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for GameServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl GameServer {
    /// Lifecycle state, `Unknown` until Agones publishes a status
    pub fn state(&self) -> GameServerState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }
}
