pub mod config;
pub mod engine;
pub mod error;
pub mod fork;
pub mod upgradable;

pub use config::{ConfigError, UpgradeConfig};
pub use engine::{
    Authorize, ConsensusEngine, HeaderVerification, RpcApi, SignerFn, SignerKind, VerifyResult,
};
pub use error::ConsensusError;
pub use fork::{Era, ForkPredicate};
pub use upgradable::UpgradableEngine;
