mod algorithm;
pub mod assignment;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod map;
pub mod oracle;
pub mod registry;
pub mod resolver;
pub mod scenario;
pub mod simulation;
pub mod solver;
pub mod stat;
