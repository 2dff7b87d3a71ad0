#[macro_use]
extern crate tracing;

pub mod certs;
pub mod command;
pub mod context;
pub mod docker;
pub mod error;
pub mod helm;
pub mod k3d;
pub mod kubectl;
pub mod milestones;
pub mod nodehosts;
pub mod reconcile;
pub mod services;
pub mod setup;
pub mod values;

#[cfg(test)]
mod testing;

pub use error::{
    Error,
    Result,
};
