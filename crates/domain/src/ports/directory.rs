use crate::DomainResult;
use crate::identity::{ListingSummary, UserProfile};

/// Read-only lookups against the user and listing collaborators. The
/// messaging core never writes through this port.
pub trait DirectoryLookup: Send + Sync {
    fn user_profile(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<UserProfile>>>;

    fn listing_summary(
        &self,
        listing_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ListingSummary>>>;
}
