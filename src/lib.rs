pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod resolvers;
pub mod retry;
pub mod session;
pub mod settings;
pub mod sightings;
pub mod store;
pub mod transport;
