//! Service wiring for the regent recovery core.
//!
//! Deployments embed [`RegentServer`]: they supply the topology backend
//! (instance reads and re-parenting primitives) and the replication
//! analyzer. The server supplies everything ambient: the durable recovery
//! registry, hook execution, auditing, and the continuous check-and-recover
//! loop.

pub mod config;
pub mod server;

pub use config::load_config;
pub use server::{init_tracing, RegentServer, RegentServerBuilder};
