//! gameserver-ingress-controller: Kubernetes controller exposing Agones
//! GameServers through a headless Service and an Ingress
//!
//! GameServers opt in through annotations. Once both objects exist the
//! GameServer is marked with `octops.io/ingress-ready: "true"`.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod gameserver;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::config::{ControllerArgs, ControllerConfig, LogFormat};
pub use crate::error::{Error, Result, ValidationError};
