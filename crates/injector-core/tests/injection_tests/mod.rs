//! Injection pipeline scenarios

mod helpers;
mod properties;
mod scenarios;
