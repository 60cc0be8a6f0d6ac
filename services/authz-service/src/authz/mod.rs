//! Authorization decisions: queries, the policy chain, the decision cache
//! and the engine that ties them together.

pub mod cache;
pub mod engine;
pub mod policy;
pub mod query;

pub use cache::{CacheStats, DecisionCache};
pub use engine::{AuthorizationEngine, Authorizer};
pub use policy::{AuthorizationDecision, NO_MATCHING_POLICY, PolicySet, ReadPolicy, ResourceFamily};
pub use query::{AuthorizationQuery, CacheKey, Operation, normalize_path, path_segments};
