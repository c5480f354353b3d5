#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod config;
pub mod coordination;
pub mod credentials;
pub mod error;
pub mod input;
pub mod orchestrator;
pub mod provider;
pub mod router;
pub mod session;
