//! Gravity database fixtures for integration tests.

#![allow(dead_code)]

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Tables every fixture carries unless explicitly skipped.
const SCHEMA: &[(&str, &str)] = &[
    (
        "vw_gravity",
        "CREATE TABLE vw_gravity (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);",
    ),
    (
        "vw_blacklist",
        "CREATE TABLE vw_blacklist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);",
    ),
    (
        "vw_whitelist",
        "CREATE TABLE vw_whitelist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);",
    ),
    (
        "vw_regex_blacklist",
        "CREATE TABLE vw_regex_blacklist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);",
    ),
    (
        "vw_regex_whitelist",
        "CREATE TABLE vw_regex_whitelist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);",
    ),
    (
        "domain_audit",
        "CREATE TABLE domain_audit (id INTEGER PRIMARY KEY AUTOINCREMENT, domain TEXT UNIQUE NOT NULL);",
    ),
    (
        "client",
        "CREATE TABLE client (id INTEGER PRIMARY KEY AUTOINCREMENT, ip TEXT NOT NULL UNIQUE);",
    ),
    (
        "client_by_group",
        "CREATE TABLE client_by_group (client_id INTEGER NOT NULL, group_id INTEGER NOT NULL, PRIMARY KEY (client_id, group_id));",
    ),
    (
        "info",
        "CREATE TABLE info (property TEXT PRIMARY KEY, value TEXT NOT NULL);",
    ),
];

/// Builder for a gravity database file in a temporary directory.
pub struct Fixture {
    dir: TempDir,
    conn: Connection,
}

impl Fixture {
    /// Create a database with the full schema.
    pub fn new() -> Self {
        Self::without(&[])
    }

    /// Create a database with the full schema minus the named tables.
    pub fn without(skip: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("gravity.db")).unwrap();
        for (table, sql) in SCHEMA {
            if !skip.contains(table) {
                conn.execute_batch(sql).unwrap();
            }
        }
        Self { dir, conn }
    }

    fn insert(&self, table: &str, domain: &str, group_id: i64, id: i64) {
        let sql = format!("INSERT INTO {} (domain, group_id, id) VALUES (?1, ?2, ?3);", table);
        self.conn.execute(&sql, params![domain, group_id, id]).unwrap();
    }

    pub fn gravity(self, domain: &str, group_id: i64, id: i64) -> Self {
        self.insert("vw_gravity", domain, group_id, id);
        self
    }

    pub fn blacklist(self, domain: &str, group_id: i64, id: i64) -> Self {
        self.insert("vw_blacklist", domain, group_id, id);
        self
    }

    pub fn whitelist(self, domain: &str, group_id: i64, id: i64) -> Self {
        self.insert("vw_whitelist", domain, group_id, id);
        self
    }

    pub fn regex_blacklist(self, pattern: &str, group_id: i64, id: i64) -> Self {
        self.insert("vw_regex_blacklist", pattern, group_id, id);
        self
    }

    pub fn regex_whitelist(self, pattern: &str, group_id: i64, id: i64) -> Self {
        self.insert("vw_regex_whitelist", pattern, group_id, id);
        self
    }

    pub fn audit(self, domain: &str) -> Self {
        self.conn
            .execute("INSERT INTO domain_audit (domain) VALUES (?1);", [domain])
            .unwrap();
        self
    }

    /// Add a client record for `ip` (address or subnet) in `groups`.
    pub fn client(self, ip: &str, groups: &[i64]) -> Self {
        self.conn
            .execute("INSERT INTO client (ip) VALUES (?1);", [ip])
            .unwrap();
        let id = self.conn.last_insert_rowid();
        for group in groups {
            self.conn
                .execute(
                    "INSERT INTO client_by_group (client_id, group_id) VALUES (?1, ?2);",
                    params![id, group],
                )
                .unwrap();
        }
        self
    }

    pub fn info(self, property: &str, value: &str) -> Self {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO info (property, value) VALUES (?1, ?2);",
                [property, value],
            )
            .unwrap();
        self
    }

    /// Close the writer and hand out the database location.
    pub fn build(self) -> Gravity {
        let Fixture { dir, conn } = self;
        conn.close().map_err(|(_, e)| e).unwrap();
        Gravity { dir }
    }
}

/// A finished gravity database file. Removed when dropped.
pub struct Gravity {
    dir: TempDir,
}

impl Gravity {
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("gravity.db")
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
