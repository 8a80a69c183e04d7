//! User repository.

use std::sync::Arc;

use tracing::debug;

use crate::model::{attr, Entity, User};
use crate::storage::{Condition, Key, Store, Update};

use super::Result;

/// Repository for user profiles and their point totals.
pub struct UserRepository {
    store: Arc<dyn Store>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a user with zero points. Fails with a conflict if the id is taken.
    pub async fn create(&self, id: &str, display_name: &str) -> Result<User> {
        let user = User {
            id: id.to_string(),
            display_name: display_name.to_string(),
            points: 0,
        };
        self.store
            .put(user.to_item()?, Some(Condition::NotExists))
            .await?;
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        match self.store.get(&Key::user_profile(id)).await? {
            Some(item) => Ok(Some(User::from_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Atomically add points to an existing user and return the new total.
    ///
    /// A missing user is a conflict; the profile is never created here.
    pub async fn add_points(&self, id: &str, points: i64) -> Result<i64> {
        let item = self
            .store
            .update(
                &Key::user_profile(id),
                Update::new()
                    .add(attr::POINTS, points)
                    .when(Condition::Exists),
            )
            .await?;
        let total = item.get_i64(attr::POINTS).unwrap_or(points);
        debug!(user_id = %id, points, total, "Added points");
        Ok(total)
    }
}
