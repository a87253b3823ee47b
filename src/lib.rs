// Library modules
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod normalize;
pub mod relay;
pub mod skill_package;
pub mod ws;

pub use config::Config;
pub use error::GatewayError;
pub use hub::Hub;
