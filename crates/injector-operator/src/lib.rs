//! Sidecar injector operator: CLI configuration, HTTPS server and the pod
//! mutation webhook

#![deny(missing_docs)]

pub mod config;
pub mod server;
pub mod webhook;
