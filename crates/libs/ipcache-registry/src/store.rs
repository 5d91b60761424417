use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;

/// Capabilities an owner can grant over its own record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationType {
    GetIp,
}

impl AuthorizationType {
    pub const ALL: [AuthorizationType; 1] = [Self::GetIp];

    pub fn code(self) -> i64 {
        match self {
            Self::GetIp => 0,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::GetIp => "GetIP",
        }
    }
}

impl TryFrom<i64> for AuthorizationType {
    type Error = StoreError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(StoreError::UnknownAuthorizationType(code))
    }
}

impl fmt::Display for AuthorizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarEntry {
    pub principal_id: String,
    pub last_seen_unix_utc: i64,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub owner: String,
    pub other: String,
    pub capability: AuthorizationType,
}

/// Result of a registrar upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// `false` when the stored row was at least as new and was kept.
    pub applied: bool,
    /// The row as stored once the transaction committed.
    pub stored: RegistrarEntry,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Inserts the row, or overwrites it only when `unix_ts` is strictly
    /// newer than the stored timestamp. Comparison and write share one
    /// transaction.
    pub fn upsert_registrar_entry(
        &mut self,
        principal_id: &str,
        unix_ts: i64,
        ip: IpAddr,
    ) -> Result<UpsertOutcome, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "INSERT INTO Registrar (principalId, lastSeenUnixUtc, ip) VALUES (?1, ?2, ?3)
             ON CONFLICT(principalId) DO UPDATE SET
                lastSeenUnixUtc = excluded.lastSeenUnixUtc,
                ip = excluded.ip
             WHERE excluded.lastSeenUnixUtc > Registrar.lastSeenUnixUtc",
            params![principal_id, unix_ts, ip.to_string()],
        )?;
        let raw = tx.query_row(
            "SELECT principalId, lastSeenUnixUtc, ip FROM Registrar WHERE principalId = ?1",
            params![principal_id],
            raw_entry,
        )?;
        tx.commit()?;
        Ok(UpsertOutcome { applied: changed > 0, stored: entry_from_raw(raw)? })
    }

    pub fn registrar_entry(&self, principal_id: &str) -> Result<Option<RegistrarEntry>, StoreError> {
        self.conn
            .query_row(
                "SELECT principalId, lastSeenUnixUtc, ip FROM Registrar WHERE principalId = ?1",
                params![principal_id],
                raw_entry,
            )
            .optional()?
            .map(entry_from_raw)
            .transpose()
    }

    pub fn load_all_registrar_entries(&self) -> Result<Vec<RegistrarEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT principalId, lastSeenUnixUtc, ip FROM Registrar ORDER BY principalId",
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(entry_from_raw(raw_entry(row)?)?);
        }
        Ok(entries)
    }

    /// Returns `true` when the grant did not exist before.
    pub fn grant_authorization(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO AuthorizationGrants (owner, other, type) VALUES (?1, ?2, ?3)",
            params![owner, other, capability.code()],
        )?;
        Ok(inserted > 0)
    }

    /// Returns `true` when a grant was removed.
    pub fn revoke_authorization(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM AuthorizationGrants WHERE owner = ?1 AND other = ?2 AND type = ?3",
            params![owner, other, capability.code()],
        )?;
        Ok(deleted > 0)
    }

    pub fn is_authorized(
        &self,
        owner: &str,
        other: &str,
        capability: AuthorizationType,
    ) -> Result<bool, StoreError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM AuthorizationGrants WHERE owner = ?1 AND other = ?2 AND type = ?3
             )",
            params![owner, other, capability.code()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn grants_by_owner(&self, owner: &str) -> Result<Vec<AuthorizationGrant>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT owner, other, type FROM AuthorizationGrants WHERE owner = ?1 ORDER BY other, type",
        )?;
        let mut rows = stmt.query(params![owner])?;
        let mut grants = Vec::new();
        while let Some(row) = rows.next()? {
            let code: i64 = row.get(2)?;
            grants.push(AuthorizationGrant {
                owner: row.get(0)?,
                other: row.get(1)?,
                capability: AuthorizationType::try_from(code)?,
            });
        }
        Ok(grants)
    }

    pub fn authorization_types(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let mut stmt =
            self.conn.prepare("SELECT type, description FROM AuthorizationType ORDER BY type")?;
        let types = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS Registrar (
                principalId TEXT NOT NULL COLLATE BINARY,
                lastSeenUnixUtc INTEGER NOT NULL,
                ip TEXT NOT NULL,
                PRIMARY KEY (principalId)
            ) WITHOUT ROWID;
            CREATE TABLE IF NOT EXISTS AuthorizationType (
                type INTEGER NOT NULL,
                description TEXT NOT NULL,
                PRIMARY KEY (type ASC)
            );
            CREATE TABLE IF NOT EXISTS AuthorizationGrants (
                owner TEXT NOT NULL COLLATE BINARY,
                other TEXT NOT NULL COLLATE BINARY,
                type INTEGER NOT NULL,
                FOREIGN KEY (type)
                    REFERENCES AuthorizationType (type)
                    ON UPDATE RESTRICT
                    ON DELETE RESTRICT,
                PRIMARY KEY (owner, other, type)
            ) WITHOUT ROWID;",
        )?;
        for kind in AuthorizationType::ALL {
            self.conn.execute(
                "INSERT OR IGNORE INTO AuthorizationType (type, description) VALUES (?1, ?2)",
                params![kind.code(), kind.description()],
            )?;
        }
        Ok(())
    }
}

type RawEntry = (String, i64, String);

fn raw_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn entry_from_raw((principal_id, last_seen_unix_utc, ip): RawEntry) -> Result<RegistrarEntry, StoreError> {
    let parsed = ip.parse::<IpAddr>().map_err(|_| StoreError::InvalidIp {
        principal_id: principal_id.clone(),
        value: ip.clone(),
    })?;
    Ok(RegistrarEntry { principal_id, last_seen_unix_utc, ip: parsed })
}
