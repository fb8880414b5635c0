//! Weather By Meridian library
//!
//! The snapshot store, network intermediary and forecast agent behind the
//! `meridian` binary.

pub mod agent;
pub mod app;
pub mod cli;
pub mod config;
pub mod intermediary;
pub mod network;
pub mod store;

#[cfg(test)]
mod testing;
