use std::collections::HashMap;
use std::sync::Arc;

use staylink_domain::DomainResult;
use staylink_domain::identity::{ListingSummary, UserProfile};
use staylink_domain::ports::BoxFuture;
use staylink_domain::ports::directory::DirectoryLookup;
use tokio::sync::RwLock;

/// Seedable directory of user profiles and listing summaries. Stands in for
/// the marketplace's user and listing services, which the messaging core only
/// ever reads from.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<HashMap<String, UserProfile>>>,
    listings: Arc<RwLock<HashMap<String, ListingSummary>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, profile: UserProfile) {
        self.users
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn seed_listing(&self, listing: ListingSummary) {
        self.listings
            .write()
            .await
            .insert(listing.listing_id.clone(), listing);
    }
}

impl DirectoryLookup for InMemoryDirectory {
    fn user_profile(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let user_id = user_id.to_string();
        let users = self.users.clone();
        Box::pin(async move { Ok(users.read().await.get(&user_id).cloned()) })
    }

    fn listing_summary(
        &self,
        listing_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ListingSummary>>> {
        let listing_id = listing_id.to_string();
        let listings = self.listings.clone();
        Box::pin(async move { Ok(listings.read().await.get(&listing_id).cloned()) })
    }
}
