//! User rows and device keys.

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::Storage;
use crate::error::{Error, Result};
use crate::model::User;

/// Lookup and lazy creation of users.
pub trait UserDirectory: Send + Sync {
    /// Find the user a device key was issued to.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn user_for_device_key(&self, device_key: &str) -> Result<Option<String>>;

    /// Create the user if absent and return the stored row.
    ///
    /// Safe to race: concurrent first logins for the same id yield one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn ensure_user(&self, id: &str, email: Option<&str>, name: Option<&str>) -> Result<User>;

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Get the device key issued to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn device_key(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get_user(id)?.map(|user| user.device_key))
    }
}

impl UserDirectory for Storage {
    fn user_for_device_key(&self, device_key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM users WHERE device_key = ?1",
                [device_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn ensure_user(&self, id: &str, email: Option<&str>, name: Option<&str>) -> Result<User> {
        {
            let conn = self.conn()?;
            let device_key = Uuid::new_v4().to_string();
            // The primary key turns a racing second insert into a no-op
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, name, email, device_key) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, email, device_key],
            )?;
            if inserted == 1 {
                info!(user_id = id, "Created user on first login");
            } else {
                debug!(user_id = id, "User already exists");
            }
        }

        self.get_user(id)?
            .ok_or_else(|| Error::internal(format!("user {id} missing after insert")))
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, name, email, device_key FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        device_key: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
