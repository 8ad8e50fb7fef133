pub mod claim;
pub mod common;
pub mod handle;
pub mod patch;
pub mod pool;
pub mod provider;
pub mod value;

pub use claim::{ResourceClaim, ResourceClaimSpec, ResourceClaimStatus};
pub use common::*;
pub use handle::{ResourceHandle, ResourceHandleSpec, ResourceHandleStatus};
pub use pool::*;
pub use provider::*;
pub use value::Value;
