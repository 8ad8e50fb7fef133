/// `status.approval.message` while a claim awaits approval.
pub const APPROVAL_PENDING: &str = "Waiting for approval.";

/// Logged (and optionally surfaced) when a claim's requested lifespan end
/// is clamped by a provider-defined maximum.
pub const LIFESPAN_CLAMPED: &str = "Requested lifespan end exceeds the provider maximum and was clamped.";

/// `status.resources[i].waitingFor` while a linked provider's wait-for
/// expression has not yet turned truthy.
pub const WAITING_FOR_LINKED_PROVIDER: &str = "Linked ResourceProvider";

/// `status.resources[i].waitingFor` while a resource needs a bound claim
/// before it can be created.
pub const WAITING_FOR_RESOURCE_CLAIM: &str = "ResourceClaim";
