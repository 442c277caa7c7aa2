//! Account management on the designated identity node.
//!
//! Passwords are stored as salted PHC strings (PBKDF2); plaintext never
//! touches storage and hashes never leave this module. Lookups key on
//! username, the handle operators and the portal actually use; the numeric id
//! is carried on [`UserAccount`] for display only.

use crate::connection::LiveConnection;
use crate::schema;
use pbkdf2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use pbkdf2::Pbkdf2;
use skybridge_types::{CoreError, IdentityError, SqlRow, UserAccount, UserRole};
use tracing::info;

/// The built-in administrator; it can be reset but never removed.
pub const PROTECTED_ACCOUNT: &str = "admin";

pub struct IdentityStore {
    params: pbkdf2::Params,
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self {
            params: pbkdf2::Params::default(),
        }
    }
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheaper key-stretching for throwaway stores (tests, scratch setups).
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            params: pbkdf2::Params {
                rounds,
                ..Default::default()
            },
        }
    }

    /// Every account, sorted by username. Hashes stay behind.
    pub async fn list(
        &self,
        conn: &LiveConnection,
    ) -> std::result::Result<Vec<UserAccount>, IdentityError> {
        ready(conn).await?;
        let rows = conn
            .fetch_all(
                "SELECT id, username, role, created_at FROM companion_users ORDER BY username",
                vec![],
            )
            .await
            .map_err(store_err)?;
        rows.iter().map(account_from_row).collect()
    }

    pub async fn get(
        &self,
        conn: &LiveConnection,
        username: &str,
    ) -> std::result::Result<UserAccount, IdentityError> {
        ready(conn).await?;
        let rows = conn
            .fetch_all(
                "SELECT id, username, role, created_at FROM companion_users WHERE username = $1",
                vec![username.into()],
            )
            .await
            .map_err(store_err)?;
        rows.first()
            .map(account_from_row)
            .transpose()?
            .ok_or_else(|| IdentityError::NotFound {
                username: username.to_string(),
            })
    }

    pub async fn add(
        &self,
        conn: &LiveConnection,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> std::result::Result<UserAccount, IdentityError> {
        ready(conn).await?;
        let hash = self.hash_password(password)?;
        conn.execute(
            "INSERT INTO companion_users (username, password_hash, role) VALUES ($1, $2, $3)",
            vec![username.into(), hash.into(), role.as_str().into()],
        )
        .await
        .map_err(|e| add_err(username, e))?;
        info!(username, %role, "account created");
        self.get(conn, username).await
    }

    pub async fn update_role(
        &self,
        conn: &LiveConnection,
        username: &str,
        role: UserRole,
    ) -> std::result::Result<(), IdentityError> {
        let account = self.get(conn, username).await?;
        conn.execute(
            "UPDATE companion_users SET role = $1 WHERE username = $2",
            vec![role.as_str().into(), username.into()],
        )
        .await
        .map_err(store_err)?;
        info!(username, from = %account.role, to = %role, "role changed");
        Ok(())
    }

    pub async fn delete(
        &self,
        conn: &LiveConnection,
        username: &str,
    ) -> std::result::Result<(), IdentityError> {
        if username == PROTECTED_ACCOUNT {
            return Err(IdentityError::ProtectedAccount {
                username: username.to_string(),
            });
        }
        self.get(conn, username).await?;
        conn.execute(
            "DELETE FROM companion_users WHERE username = $1",
            vec![username.into()],
        )
        .await
        .map_err(store_err)?;
        info!(username, "account deleted");
        Ok(())
    }

    /// Administrative override; the old password is not required.
    pub async fn reset_password(
        &self,
        conn: &LiveConnection,
        username: &str,
        new_password: &str,
    ) -> std::result::Result<(), IdentityError> {
        self.get(conn, username).await?;
        let hash = self.hash_password(new_password)?;
        conn.execute(
            "UPDATE companion_users SET password_hash = $1 WHERE username = $2",
            vec![hash.into(), username.into()],
        )
        .await
        .map_err(store_err)?;
        info!(username, "password reset");
        Ok(())
    }

    /// Portal login check. A missing account and a wrong password fail with
    /// the same error so the response never says which part was wrong.
    pub async fn verify(
        &self,
        conn: &LiveConnection,
        username: &str,
        password: &str,
    ) -> std::result::Result<UserAccount, IdentityError> {
        ready(conn).await?;
        let rows = conn
            .fetch_all(
                "SELECT id, username, password_hash, role, created_at \
                 FROM companion_users WHERE username = $1",
                vec![username.into()],
            )
            .await
            .map_err(store_err)?;
        let auth_failure = || IdentityError::AuthFailure {
            username: username.to_string(),
        };
        let Some(row) = rows.first() else {
            return Err(auth_failure());
        };
        let stored = row.get_text("password_hash").unwrap_or_default();
        if verify_password(password, stored)? {
            account_from_row(row)
        } else {
            Err(auth_failure())
        }
    }

    fn hash_password(&self, password: &str) -> std::result::Result<String, IdentityError> {
        let salt = SaltString::generate(&mut OsRng);
        Pbkdf2
            .hash_password_customized(password.as_bytes(), None, None, self.params, &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| IdentityError::Hash {
                message: e.to_string(),
            })
    }
}

async fn ready(conn: &LiveConnection) -> std::result::Result<(), IdentityError> {
    schema::ensure_identity_schema(conn).await.map_err(store_err)
}

fn store_err(e: CoreError) -> IdentityError {
    IdentityError::Store {
        message: e.to_string(),
    }
}

fn add_err(username: &str, e: CoreError) -> IdentityError {
    if matches!(&e, CoreError::Storage(s) if s.is_duplicate_key()) {
        IdentityError::AlreadyExists {
            username: username.to_string(),
        }
    } else {
        store_err(e)
    }
}

fn account_from_row(row: &SqlRow) -> std::result::Result<UserAccount, IdentityError> {
    let id = row.get_i64("id").ok_or_else(|| IdentityError::Store {
        message: "account row has no integer id".to_string(),
    })?;
    let username = row
        .get_text("username")
        .ok_or_else(|| IdentityError::Store {
            message: "account row has no username".to_string(),
        })?
        .to_string();
    let role: UserRole = row
        .get_text("role")
        .unwrap_or(UserRole::User.as_str())
        .parse()
        .map_err(|message| IdentityError::Store { message })?;
    Ok(UserAccount {
        id,
        username,
        role,
        created_at: row.get_text("created_at").map(str::to_string),
    })
}

/// The stored PHC string carries its own salt and work factor, so adapters
/// with different parameters still verify each other's hashes.
fn verify_password(password: &str, stored: &str) -> std::result::Result<bool, IdentityError> {
    let parsed = PasswordHash::new(stored).map_err(|e| IdentityError::Hash {
        message: e.to_string(),
    })?;
    Ok(Pbkdf2
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
