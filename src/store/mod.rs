//! Gravity database handle: connection lifecycle and fork recovery.
//!
//! The handle is opened lazily on the first policy query and reopened from
//! scratch whenever a store error forces a reset or the hosting process has
//! forked. Every externally visible operation starts with
//! [`GravityDb::check_fork_and_recover`].

mod subnet;

use rusqlite::{Connection, OpenFlags};
use std::fmt;
use std::time::Duration;

use crate::client::{ClientRegistry, GroupFilter};
use crate::config::{DebugFlags, GravityConfig};
use crate::error::{Error, Result};
use crate::plan::{ClientSlots, PlanCache};

/// Process-wide audit query.
///
/// A stored pattern starting with `*` is compared against the input cropped
/// to the pattern's length with `*` prepended, so `*.example.com` matches
/// every subdomain of `example.com` but not `example.com` itself, while
/// `*example.com` also matches `example.com` and `abcexample.com`. Other
/// patterns must equal the input. The named parameter is bound once.
pub(crate) const AUDIT_SQL: &str = "SELECT EXISTS(\
    SELECT domain, \
    CASE WHEN substr(domain, 1, 1) = '*' \
    THEN '*' || substr(:input, - length(domain) + 1) \
    ELSE :input \
    END matcher \
    FROM domain_audit WHERE matcher = domain);";

/// Source of the identity the handle compares against to detect forks.
pub type ProcessIdSource = Box<dyn Fn() -> u32 + Send>;

/// Handle to the gravity database plus every piece of state derived from it.
///
/// A handle is usable only while it is open and owned by the calling
/// process. The per-client group cache and plan cache share the handle's
/// lifetime and are dropped together on close or fork recovery.
pub struct GravityDb {
    pub(crate) config: GravityConfig,
    pub(crate) conn: Option<Connection>,
    /// Process that performed the last successful open
    owner_pid: Option<u32>,
    pid_source: ProcessIdSource,
    pub(crate) groups: ClientSlots<GroupFilter>,
    pub(crate) plans: PlanCache,
    /// Number of clients the statement cache is currently sized for
    client_capacity: usize,
    /// Incremented on every successful open
    generation: u64,
}

impl GravityDb {
    /// Create a closed handle. Nothing touches the database until the first
    /// query or an explicit [`open`](Self::open).
    pub fn new(config: GravityConfig) -> Self {
        Self::with_pid_source(config, Box::new(std::process::id))
    }

    /// Create a closed handle with a custom process identity source.
    ///
    /// Hosts that hand connections to threads instead of forked workers can
    /// return a per-thread identity here to get the same rebuild protocol.
    pub fn with_pid_source(config: GravityConfig, pid_source: ProcessIdSource) -> Self {
        Self {
            config,
            conn: None,
            owner_pid: None,
            pid_source,
            groups: ClientSlots::new(0),
            plans: PlanCache::new(0),
            client_capacity: 0,
            generation: 0,
        }
    }

    /// Create a closed handle whose caches are sized for the clients in `registry`.
    pub fn for_registry<R: ClientRegistry + ?Sized>(config: GravityConfig, registry: &R) -> Self {
        let mut db = Self::new(config);
        db.client_capacity = registry.client_count();
        db
    }

    /// Configuration of this handle.
    pub fn config(&self) -> &GravityConfig {
        &self.config
    }

    /// Whether a connection is currently open.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of successful opens so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open the gravity database in read-only mode.
    ///
    /// Returns immediately if the handle is already open in this process.
    pub fn open(&mut self) -> Result<()> {
        let pid = (self.pid_source)();
        if self.conn.is_some() && self.owner_pid == Some(pid) {
            if self.config.debug(DebugFlags::DATABASE) {
                log::debug!("open(): Database already connected");
            }
            return Ok(());
        }
        if self.conn.is_some() {
            log::info!("Note: process forked, reopening gravity database");
            self.abandon();
        }

        let path = &self.config.database;
        if !path.exists() {
            log::warn!("open(): {} does not exist", path.display());
            return Err(Error::NotFound(path.clone()));
        }

        if self.config.debug(DebugFlags::DATABASE) {
            log::debug!("open(): Trying to open {} in read-only mode", path.display());
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            log::error!("open() - SQL error: {}", e);
            Error::OpenFailed(e)
        })?;

        if let Err(e) = self.configure(&conn) {
            log::error!("open() - {}", e);
            drop(conn);
            return Err(e);
        }

        let clients = self.client_capacity;
        self.groups = ClientSlots::new(clients);
        self.plans.reset(clients);
        self.conn = Some(conn);
        self.owner_pid = Some(pid);
        self.generation += 1;

        if self.config.debug(DebugFlags::DATABASE) {
            log::debug!("open(): Successfully opened gravity database");
        }
        Ok(())
    }

    /// Apply connection settings and prepare the process-wide audit plan.
    fn configure(&self, conn: &Connection) -> Result<()> {
        let debug = self.config.debug(DebugFlags::DATABASE);

        // The loader may still be writing, allow a grace period while opening
        let timeout = self.config.busy_timeout();
        if debug {
            log::debug!("open(): Setting busy timeout to {:?}", timeout);
        }
        conn.busy_timeout(timeout).map_err(Error::OpenFailed)?;

        if debug {
            log::debug!("open(): Setting location for temporary objects to MEMORY");
        }
        conn.pragma_update(None, "temp_store", "MEMORY")
            .map_err(Error::OpenFailed)?;

        subnet::register(conn).map_err(Error::OpenFailed)?;
        conn.set_prepared_statement_cache_capacity(
            self.config.statement_cache_capacity(self.client_capacity),
        );

        if debug {
            log::debug!("open(): Preparing audit query");
        }
        conn.prepare_cached(AUDIT_SQL)
            .map_err(|source| Error::PrepareFailed {
                sql: AUDIT_SQL.to_string(),
                source,
            })?;

        // Steady-state lookups must never wait for a writer
        if debug {
            log::debug!("open(): Setting busy timeout to zero");
        }
        if let Err(e) = conn.busy_timeout(Duration::ZERO) {
            log::warn!("open() - Cannot set busy handler: {}", e);
        }
        Ok(())
    }

    /// Release every cached plan, then the connection.
    ///
    /// Does nothing when the handle is already closed.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        self.groups.clear();
        self.plans.clear();
        conn.flush_prepared_statement_cache();
        if let Err((_, e)) = conn.close() {
            log::warn!("close() - SQL error: {}", e);
        }
        self.owner_pid = None;
    }

    /// Detect a fork since the last open and rebuild all state if so.
    ///
    /// Called at the start of every policy and bulk operation before any
    /// cached state is touched.
    pub fn check_fork_and_recover(&mut self) {
        let pid = (self.pid_source)();
        match self.owner_pid {
            Some(owner) if owner != pid => {}
            _ => return,
        }

        if let Err(e) = self.open() {
            log::error!("Gravity database not available after fork: {}", e);
        }
    }

    /// Forget the connection and every derived cache without closing it.
    ///
    /// A connection inherited across `fork()` must not be finalized or closed
    /// by the child.
    fn abandon(&mut self) {
        if let Some(conn) = self.conn.take() {
            std::mem::forget(conn);
        }
        self.groups.clear();
        self.plans.clear();
        self.owner_pid = None;
    }

    /// Whether the connection is open and was opened by the calling process.
    fn is_usable(&self) -> bool {
        self.conn.is_some() && self.owner_pid == Some((self.pid_source)())
    }

    /// Open the database unless it is already usable.
    ///
    /// A connection inherited from another process is abandoned and
    /// replaced, see [`open`](Self::open).
    pub(crate) fn ensure_open(&mut self) -> Result<()> {
        if self.is_usable() {
            return Ok(());
        }
        self.open()
    }

    /// Connection of an open handle owned by the calling process.
    pub(crate) fn connection(&self) -> Result<&Connection> {
        if !self.is_usable() {
            return Err(Error::Unavailable);
        }
        self.conn.as_ref().ok_or(Error::Unavailable)
    }

    /// Make sure caches and the statement cache can hold `clients` entries.
    pub(crate) fn reserve_clients(&mut self, clients: usize) {
        if clients <= self.client_capacity {
            return;
        }
        if self.config.debug(DebugFlags::VECTORS) {
            log::debug!(
                "Resizing client caches from {} to {}",
                self.client_capacity,
                clients
            );
        }
        self.client_capacity = clients;
        if let Some(conn) = self.conn.as_ref() {
            conn.set_prepared_statement_cache_capacity(
                self.config.statement_cache_capacity(clients),
            );
        }
    }
}

impl Drop for GravityDb {
    fn drop(&mut self) {
        if self.owner_pid.is_some() && self.owner_pid != Some((self.pid_source)()) {
            self.abandon();
        } else {
            self.close();
        }
    }
}

impl fmt::Debug for GravityDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GravityDb")
            .field("database", &self.config.database)
            .field("open", &self.is_open())
            .field("owner_pid", &self.owner_pid)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_open_missing_file() {
        let config = GravityConfig::with_database("/nonexistent/k2gravity/gravity.db");
        let mut db = GravityDb::new(config);

        let err = db.open().unwrap_err();
        assert!(matches!(err, Error::NotFound(p) if p == PathBuf::from("/nonexistent/k2gravity/gravity.db")));
        assert!(!db.is_open());
        assert_eq!(db.generation(), 0);
    }

    #[test]
    fn test_close_when_closed() {
        let mut db = GravityDb::new(GravityConfig::default());
        db.close();
        db.close();
        assert!(!db.is_open());
    }

    #[test]
    fn test_fork_check_without_open() {
        let mut db = GravityDb::with_pid_source(GravityConfig::default(), Box::new(|| 42));
        db.check_fork_and_recover();
        assert!(!db.is_open());
        assert_eq!(db.generation(), 0);
    }

    #[test]
    fn test_audit_sql_wildcards() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE domain_audit (id INTEGER PRIMARY KEY, domain TEXT);
             INSERT INTO domain_audit (domain) VALUES ('*.example.com'), ('exact.org'), ('*wild.net');",
        )
        .unwrap();

        let audited = |domain: &str| -> bool {
            conn.query_row(AUDIT_SQL, [domain], |row| row.get::<_, i64>(0))
                .unwrap()
                == 1
        };

        assert!(audited("a.example.com"));
        assert!(audited("b.c.example.com"));
        assert!(!audited("example.com"));
        assert!(audited("exact.org"));
        assert!(!audited("sub.exact.org"));
        assert!(audited("wild.net"));
        assert!(audited("abcwild.net"));
        assert!(!audited("ild.net"));
    }
}
