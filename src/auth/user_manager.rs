//! User and permission manager.
//!
//! Two layers back every check: persisted rows in `sys_users` /
//! `sys_privileges` (plus the bootstrap text files at the engine root),
//! and this in-memory cache. Checks take a read lock; grant and revoke
//! take a write lock and the caller persists the change in the same
//! statement.

use std::collections::HashMap;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::common::{Error, ErrorCode, Result};

use super::privilege::{Privilege, PrivilegeKind, ROLE_SUPERUSER};

/// One user account.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
}

pub struct UserManager {
    users: RwLock<HashMap<String, User>>,
    privileges: RwLock<Vec<Privilege>>,
}

/// SHA-256, hex-encoded.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl UserManager {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            privileges: RwLock::new(Vec::new()),
        }
    }

    fn key(username: &str) -> String {
        username.to_ascii_lowercase()
    }

    /// Create a user with an already-hashed password.
    pub fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<User> {
        let mut users = self.users.write();
        if users.contains_key(&Self::key(username)) {
            return Err(Error::new(
                ErrorCode::UserAlreadyExists,
                "auth",
                format!("user '{}' already exists", username),
            ));
        }
        let user = User {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role: role.to_string(),
            active: true,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        users.insert(Self::key(username), user.clone());
        debug!(username, role, "user created");
        Ok(user)
    }

    /// Drop a user and every privilege granted to them.
    pub fn drop_user(&self, username: &str) -> Result<()> {
        let mut users = self.users.write();
        if users.remove(&Self::key(username)).is_none() {
            return Err(Error::new(
                ErrorCode::UserNotExist,
                "auth",
                format!("user '{}' does not exist", username),
            ));
        }
        drop(users);
        self.privileges
            .write()
            .retain(|p| !p.grantee.eq_ignore_ascii_case(username));
        Ok(())
    }

    pub fn alter_password(&self, username: &str, password_hash: &str) -> Result<()> {
        let mut users = self.users.write();
        let user = users.get_mut(&Self::key(username)).ok_or_else(|| {
            Error::new(
                ErrorCode::UserNotExist,
                "auth",
                format!("user '{}' does not exist", username),
            )
        })?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    /// Verify a plaintext password against the stored digest. Inactive
    /// users never authenticate.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let users = self.users.read();
        match users.get(&Self::key(username)) {
            Some(user) => user.active && user.password_hash == hash_password(password),
            None => false,
        }
    }

    pub fn user(&self, username: &str) -> Option<User> {
        self.users.read().get(&Self::key(username)).cloned()
    }

    pub fn user_exists(&self, username: &str) -> bool {
        self.users.read().contains_key(&Self::key(username))
    }

    pub fn is_superuser(&self, username: &str) -> bool {
        self.users
            .read()
            .get(&Self::key(username))
            .map(|u| u.role == ROLE_SUPERUSER)
            .unwrap_or(false)
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Record a grant in the cache. Duplicate grants collapse.
    pub fn grant(&self, privilege: Privilege) {
        let mut privileges = self.privileges.write();
        if !privileges.contains(&privilege) {
            privileges.push(privilege);
        }
    }

    /// Remove matching grants. Revoking ALL removes every grant on the
    /// scope; revoking a single kind removes that kind (and nothing
    /// else). Returns how many grants were removed.
    pub fn revoke(
        &self,
        username: &str,
        database: &str,
        table: &str,
        kind: PrivilegeKind,
    ) -> usize {
        let mut privileges = self.privileges.write();
        let before = privileges.len();
        privileges.retain(|p| {
            let scope_match = p.grantee.eq_ignore_ascii_case(username)
                && p.database.eq_ignore_ascii_case(database)
                && p.table.eq_ignore_ascii_case(table);
            let kind_match = kind == PrivilegeKind::All || p.privilege == kind;
            !(scope_match && kind_match)
        });
        before - privileges.len()
    }

    /// The permission check: superuser allows everything; otherwise a
    /// matching grant must exist.
    pub fn check_permission(
        &self,
        username: &str,
        database: &str,
        table: &str,
        requested: PrivilegeKind,
    ) -> bool {
        if self.is_superuser(username) {
            return true;
        }
        self.privileges
            .read()
            .iter()
            .any(|p| p.matches(username, database, table, requested))
    }

    pub fn user_privileges(&self, username: &str) -> Vec<Privilege> {
        self.privileges
            .read()
            .iter()
            .filter(|p| p.grantee.eq_ignore_ascii_case(username))
            .cloned()
            .collect()
    }

    pub fn all_privileges(&self) -> Vec<Privilege> {
        self.privileges.read().clone()
    }

    /// Replace the whole cache (startup reconstruction).
    pub fn load(&self, users: Vec<User>, privileges: Vec<Privilege>) {
        let mut map = HashMap::new();
        for user in users {
            map.insert(Self::key(&user.username), user);
        }
        *self.users.write() = map;
        *self.privileges.write() = privileges;
    }
}

impl Default for UserManager {
    fn default() -> Self {
        Self::new()
    }
}
