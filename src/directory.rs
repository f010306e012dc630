use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::User;

/// Lookup into the external identity store. Registration, activation and
/// credentials live elsewhere; the engine only reads.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: Ulid) -> Option<User>;
    async fn get_by_username(&self, username: &str) -> Option<User>;
}

/// Directory backed by a map. Used by the binary until an identity service is
/// wired in, and by tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<Ulid, User>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Register an active user and return it.
    pub fn add_member(&self, username: &str) -> User {
        let user = User {
            id: Ulid::new(),
            username: username.to_string(),
            is_admin: false,
            is_active: true,
        };
        self.insert(user.clone());
        user
    }

    pub fn add_admin(&self, username: &str) -> User {
        let user = User {
            id: Ulid::new(),
            username: username.to_string(),
            is_admin: true,
            is_active: true,
        };
        self.insert(user.clone());
        user
    }

    pub fn deactivate(&self, id: Ulid) {
        if let Some(mut user) = self.users.get_mut(&id) {
            user.is_active = false;
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get_by_id(&self, id: Ulid) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    async fn get_by_username(&self, username: &str) -> Option<User> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.value().clone())
    }
}
