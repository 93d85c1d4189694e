//! Bootstrap copies of users and privileges at the engine root.
//!
//! `users.dat` and `permissions.dat` let the engine authenticate and
//! authorize before (and while) the `system` database itself loads.
//! Line formats:
//!
//! ```text
//! users.dat:        username|password_hash|role|active|created_at
//! permissions.dat:  username|db|table|privilege
//! ```
//!
//! Additions are tail-appended; removals (DROP USER, REVOKE) rewrite
//! the affected file from the in-memory state.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::config::{PERMISSIONS_FILE_NAME, USERS_FILE_NAME};
use crate::common::Result;

use super::privilege::{Privilege, PrivilegeKind};
use super::user_manager::User;

pub struct BootstrapFiles {
    users_path: PathBuf,
    permissions_path: PathBuf,
}

impl BootstrapFiles {
    pub fn at_root(root: &Path) -> Self {
        Self {
            users_path: root.join(USERS_FILE_NAME),
            permissions_path: root.join(PERMISSIONS_FILE_NAME),
        }
    }

    /// Load both files. Missing files load as empty; malformed lines
    /// are skipped with a warning.
    pub fn load(&self) -> Result<(Vec<User>, Vec<Privilege>)> {
        let mut users = Vec::new();
        for line in read_lines(&self.users_path)? {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != 5 {
                warn!(line = %line, "skipping malformed users.dat line");
                continue;
            }
            users.push(User {
                username: fields[0].to_string(),
                password_hash: fields[1].to_string(),
                role: fields[2].to_string(),
                active: fields[3] == "1" || fields[3].eq_ignore_ascii_case("true"),
                created_at: fields[4].to_string(),
            });
        }

        let mut privileges = Vec::new();
        for line in read_lines(&self.permissions_path)? {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != 4 {
                warn!(line = %line, "skipping malformed permissions.dat line");
                continue;
            }
            let Some(kind) = PrivilegeKind::parse(fields[3]) else {
                warn!(line = %line, "skipping unknown privilege kind");
                continue;
            };
            privileges.push(Privilege::for_user(
                fields[0], fields[1], fields[2], kind, "root",
            ));
        }

        Ok((users, privileges))
    }

    /// Tail-append one user line.
    pub fn append_user(&self, user: &User) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.users_path)?;
        writeln!(file, "{}", user_line(user))?;
        file.sync_data()?;
        Ok(())
    }

    /// Tail-append one privilege line.
    pub fn append_privilege(&self, privilege: &Privilege) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.permissions_path)?;
        writeln!(file, "{}", privilege_line(privilege))?;
        file.sync_data()?;
        Ok(())
    }

    /// Rewrite both files from the authoritative in-memory state.
    pub fn rewrite(&self, users: &[User], privileges: &[Privilege]) -> Result<()> {
        let mut file = File::create(&self.users_path)?;
        for user in users {
            writeln!(file, "{}", user_line(user))?;
        }
        file.sync_data()?;

        let mut file = File::create(&self.permissions_path)?;
        for privilege in privileges {
            writeln!(file, "{}", privilege_line(privilege))?;
        }
        file.sync_data()?;
        Ok(())
    }
}

fn user_line(user: &User) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        user.username,
        user.password_hash,
        user.role,
        if user.active { "1" } else { "0" },
        user.created_at
    )
}

fn privilege_line(privilege: &Privilege) -> String {
    format!(
        "{}|{}|{}|{}",
        privilege.grantee, privilege.database, privilege.table, privilege.privilege
    )
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}
