//! Users, roles, privileges, and authentication.
//!
//! - [`UserManager`] - the in-memory cache behind every permission check
//! - [`Privilege`] / [`PrivilegeKind`] - the grant model
//! - [`BootstrapFiles`] - users.dat / permissions.dat at the engine root

mod bootstrap_file;
mod privilege;
mod user_manager;

pub use bootstrap_file::BootstrapFiles;
pub use privilege::{
    GranteeType, Privilege, PrivilegeKind, ROLE_ADMIN, ROLE_SUPERUSER, ROLE_USER,
};
pub use user_manager::{hash_password, User, UserManager};
