//! SQLite-backed directory record storage.
//!
//! Each node record maps to one durable row-set: a stable surrogate id in
//! `node_records`, its ordered identity/certificate rows, and its ordered
//! address rows. Re-registration of a known identity reuses the surrogate
//! id so relational links survive updates.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

use crate::error::NodemapError;
use crate::types::{NetworkAddress, NodeRecord, PartyAndCertificate, SignedNetworkParameters};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS node_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_hash TEXT NOT NULL UNIQUE,
    platform_version INTEGER NOT NULL,
    serial INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS record_identities (
    record_id INTEGER NOT NULL REFERENCES node_records(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    legal_name TEXT NOT NULL,
    public_key TEXT NOT NULL,
    certificate TEXT NOT NULL,
    is_main INTEGER NOT NULL,
    PRIMARY KEY (record_id, position)
);
CREATE TABLE IF NOT EXISTS record_addresses (
    record_id INTEGER NOT NULL REFERENCES node_records(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    PRIMARY KEY (record_id, position)
);
CREATE INDEX IF NOT EXISTS idx_record_identities_name ON record_identities(legal_name);
CREATE INDEX IF NOT EXISTS idx_record_identities_key ON record_identities(public_key);
CREATE INDEX IF NOT EXISTS idx_record_addresses_endpoint ON record_addresses(host, port);
CREATE TABLE IF NOT EXISTS network_parameters (
    hash TEXT PRIMARY KEY,
    document TEXT NOT NULL
);
"#;

pub struct DirectoryStore {
    pool: SqlitePool,
}

impl DirectoryStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, NodemapError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        Self::connect(options).await
    }

    pub async fn open_in_memory() -> Result<Self, NodemapError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, NodemapError> {
        // A single connection keeps writers to the same identity serialized
        // (and keeps an in-memory database alive for the pool's lifetime).
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, NodemapError> {
        Ok(self.pool.begin().await?)
    }

    // ==================== Write path ====================

    /// Insert or overwrite the row-set for a record, reusing the surrogate
    /// id when the identity is already known.
    pub async fn upsert_record(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        record: &NodeRecord,
    ) -> Result<(), NodemapError> {
        let key_hash = record.main_key_hash()?;
        let existing = sqlx::query("SELECT id FROM node_records WHERE key_hash = ?")
            .bind(&key_hash)
            .fetch_optional(&mut **tx)
            .await?;

        let record_id = match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                sqlx::query("UPDATE node_records SET platform_version = ?, serial = ? WHERE id = ?")
                    .bind(record.platform_version as i64)
                    .bind(record.serial as i64)
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM record_identities WHERE record_id = ?")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM record_addresses WHERE record_id = ?")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO node_records (key_hash, platform_version, serial) VALUES (?, ?, ?)",
                )
                .bind(&key_hash)
                .bind(record.platform_version as i64)
                .bind(record.serial as i64)
                .execute(&mut **tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        for (position, identity) in record.identities.iter().enumerate() {
            sqlx::query(
                "INSERT INTO record_identities \
                 (record_id, position, legal_name, public_key, certificate, is_main) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(record_id)
            .bind(position as i64)
            .bind(&identity.legal_name)
            .bind(&identity.public_key)
            .bind(&identity.certificate)
            .bind(position == 0)
            .execute(&mut **tx)
            .await?;
        }

        for (position, address) in record.addresses.iter().enumerate() {
            sqlx::query(
                "INSERT INTO record_addresses (record_id, position, host, port) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(record_id)
            .bind(position as i64)
            .bind(&address.host)
            .bind(address.port as i64)
            .execute(&mut **tx)
            .await?;
        }

        debug!(key = %key_hash, serial = record.serial, "Stored node record");
        Ok(())
    }

    /// Returns whether a row-set was deleted.
    pub async fn remove_record(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        key_hash: &str,
    ) -> Result<bool, NodemapError> {
        let result = sqlx::query("DELETE FROM node_records WHERE key_hash = ?")
            .bind(key_hash)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_records(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
    ) -> Result<(), NodemapError> {
        sqlx::query("DELETE FROM node_records")
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // ==================== Read path ====================

    pub async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<NodeRecord>, NodemapError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT id FROM node_records WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&mut *tx)
            .await?;
        let record = match row {
            Some(row) => load_record(&mut *tx, row.try_get("id")?).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(record)
    }

    /// All records whose identity set contains the given public key.
    pub async fn get_by_identity_key(
        &self,
        public_key: &str,
    ) -> Result<Vec<NodeRecord>, NodemapError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT DISTINCT record_id FROM record_identities WHERE public_key = ? \
             ORDER BY record_id",
        )
        .bind(public_key)
        .fetch_all(&mut *tx)
        .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(record) = load_record(&mut *tx, row.try_get("record_id")?).await? {
                records.push(record);
            }
        }
        tx.commit().await?;
        Ok(records)
    }

    pub async fn get_by_legal_name(&self, name: &str) -> Result<Vec<NodeRecord>, NodemapError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT DISTINCT record_id FROM record_identities WHERE legal_name = ? \
             ORDER BY record_id",
        )
        .bind(name)
        .fetch_all(&mut *tx)
        .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(record) = load_record(&mut *tx, row.try_get("record_id")?).await? {
                records.push(record);
            }
        }
        tx.commit().await?;
        Ok(records)
    }

    /// Addresses are expected unique; more than one match is a fatal
    /// consistency violation.
    pub async fn get_by_address(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Option<NodeRecord>, NodemapError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT DISTINCT record_id FROM record_addresses WHERE host = ? AND port = ?",
        )
        .bind(host)
        .bind(port as i64)
        .fetch_all(&mut *tx)
        .await?;
        if rows.len() > 1 {
            return Err(NodemapError::DuplicateAddress(format!("{}:{}", host, port)));
        }
        let record = match rows.first() {
            Some(row) => load_record(&mut *tx, row.try_get("record_id")?).await?,
            None => None,
        };
        tx.commit().await?;
        Ok(record)
    }

    pub async fn load_all(&self) -> Result<Vec<NodeRecord>, NodemapError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT id FROM node_records ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(record) = load_record(&mut *tx, row.try_get("id")?).await? {
                records.push(record);
            }
        }
        tx.commit().await?;
        Ok(records)
    }

    // ==================== Network parameters ====================

    pub async fn save_parameters(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        hash: &str,
        signed: &SignedNetworkParameters,
    ) -> Result<(), NodemapError> {
        let document = serde_json::to_string(signed)?;
        sqlx::query("DELETE FROM network_parameters")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO network_parameters (hash, document) VALUES (?, ?)")
            .bind(hash)
            .bind(document)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn load_parameters(&self) -> Result<Option<SignedNetworkParameters>, NodemapError> {
        let row = sqlx::query("SELECT document FROM network_parameters LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) async fn record_row_id(&self, key_hash: &str) -> Result<Option<i64>, NodemapError> {
        let row = sqlx::query("SELECT id FROM node_records WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }
}

async fn load_record(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<NodeRecord>, NodemapError> {
    let header = sqlx::query("SELECT platform_version, serial FROM node_records WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let header = match header {
        Some(row) => row,
        None => return Ok(None),
    };

    let identity_rows = sqlx::query(
        "SELECT legal_name, public_key, certificate FROM record_identities \
         WHERE record_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    let mut identities = Vec::with_capacity(identity_rows.len());
    for row in identity_rows {
        identities.push(PartyAndCertificate {
            legal_name: row.try_get("legal_name")?,
            public_key: row.try_get("public_key")?,
            certificate: row.try_get("certificate")?,
        });
    }

    let address_rows = sqlx::query(
        "SELECT host, port FROM record_addresses WHERE record_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    let mut addresses = Vec::with_capacity(address_rows.len());
    for row in address_rows {
        let port: i64 = row.try_get("port")?;
        addresses.push(NetworkAddress {
            host: row.try_get("host")?,
            port: port as u16,
        });
    }

    let platform_version: i64 = header.try_get("platform_version")?;
    let serial: i64 = header.try_get("serial")?;
    Ok(Some(NodeRecord {
        addresses,
        identities,
        platform_version: platform_version as u32,
        serial: serial as u64,
    }))
}
