//! Privilege model: grantees, privilege kinds, and wildcard matching.

use std::fmt;

/// Built-in role names.
pub const ROLE_SUPERUSER: &str = "superuser";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Privileges grantable on a database/table scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegeKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    All,
}

impl PrivilegeKind {
    pub fn parse(s: &str) -> Option<PrivilegeKind> {
        Some(match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => PrivilegeKind::Select,
            "INSERT" => PrivilegeKind::Insert,
            "UPDATE" => PrivilegeKind::Update,
            "DELETE" => PrivilegeKind::Delete,
            "CREATE" => PrivilegeKind::Create,
            "DROP" => PrivilegeKind::Drop,
            "ALTER" => PrivilegeKind::Alter,
            "ALL" | "ALL PRIVILEGES" => PrivilegeKind::All,
            _ => return None,
        })
    }

    /// Whether a granted privilege satisfies a requested one.
    pub fn covers(&self, requested: PrivilegeKind) -> bool {
        *self == PrivilegeKind::All || *self == requested
    }
}

impl fmt::Display for PrivilegeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrivilegeKind::Select => "SELECT",
            PrivilegeKind::Insert => "INSERT",
            PrivilegeKind::Update => "UPDATE",
            PrivilegeKind::Delete => "DELETE",
            PrivilegeKind::Create => "CREATE",
            PrivilegeKind::Drop => "DROP",
            PrivilegeKind::Alter => "ALTER",
            PrivilegeKind::All => "ALL",
        };
        f.write_str(s)
    }
}

/// Who a privilege was granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranteeType {
    User,
    Role,
}

impl fmt::Display for GranteeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GranteeType::User => "USER",
            GranteeType::Role => "ROLE",
        })
    }
}

/// One granted privilege. `database` and `table` may be the wildcard
/// `*`, matched at check time.
#[derive(Debug, Clone, PartialEq)]
pub struct Privilege {
    pub grantee_type: GranteeType,
    pub grantee: String,
    pub database: String,
    pub table: String,
    pub privilege: PrivilegeKind,
    pub grantor: String,
}

impl Privilege {
    pub fn for_user(
        grantee: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        privilege: PrivilegeKind,
        grantor: impl Into<String>,
    ) -> Self {
        Self {
            grantee_type: GranteeType::User,
            grantee: grantee.into(),
            database: database.into(),
            table: table.into(),
            privilege,
            grantor: grantor.into(),
        }
    }

    /// Does this grant satisfy a permission check?
    pub fn matches(&self, user: &str, database: &str, table: &str, requested: PrivilegeKind) -> bool {
        self.grantee_type == GranteeType::User
            && self.grantee.eq_ignore_ascii_case(user)
            && (self.database == "*" || self.database.eq_ignore_ascii_case(database))
            && (self.table == "*" || self.table.eq_ignore_ascii_case(table))
            && self.privilege.covers(requested)
    }
}
