//! Shared foundation for the planar bootstrap daemon: the cluster topology
//! model with its lookup indexes, the error taxonomy, topology JSON
//! ingestion, and runtime configuration.

pub mod config;
pub mod error;
pub mod planar_config;
pub mod topology;

pub use config::NodeConfig;
pub use error::BootstrapError;
pub use topology::{Device, Host, HostDb, PlanarInterface};
