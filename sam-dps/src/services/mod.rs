//! DPS services
//!
//! - [`orchestrator`]: caller-facing operations
//! - [`poller`]: hand-over of transformed global uploads
//! - [`core_factor_cache`]: manufacturer/model core factor trie
//! - [`rpc`]: downstream service calls

pub mod core_factor_cache;
pub mod orchestrator;
pub mod poller;
pub mod rpc;

pub use core_factor_cache::{CoreFactorCache, CoreFactorTrie};
pub use orchestrator::IngestionOrchestrator;
pub use poller::{Poller, PollerState};
pub use rpc::{HttpTransport, RpcError, RpcMethod, RpcTransport};
