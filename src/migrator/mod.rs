pub mod audit;
pub mod builder;
pub mod config;
pub mod controller;
pub mod drift;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod reference;
pub mod service;
pub mod state;
pub mod sync;
pub mod util;

#[cfg(test)]
pub mod testing;
