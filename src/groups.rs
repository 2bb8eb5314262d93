//! Client group resolution.

use rusqlite::OptionalExtension;

use crate::client::{Client, GroupFilter};
use crate::config::DebugFlags;
use crate::error::{Error, Result};
use crate::store::GravityDb;

/// Most specific client record whose address or subnet contains the client.
const CLIENT_SQL: &str = "SELECT id FROM client \
    WHERE subnet_match(ip, ?1) IS NOT NULL \
    ORDER BY subnet_match(ip, ?1) DESC, id ASC LIMIT 1;";

/// Groups associated with a client record.
const CLIENT_GROUPS_SQL: &str = "SELECT group_id FROM client_by_group WHERE client_id = ?1;";

impl GravityDb {
    /// Resolve the groups `client` belongs to.
    ///
    /// Clients without an explicit record fall into the default group `0`.
    /// A record without any group association yields an empty filter. The
    /// result is cached for the lifetime of the open handle; errors are not
    /// cached and not retried.
    pub fn resolve_groups(&mut self, client: &Client) -> Result<GroupFilter> {
        self.check_fork_and_recover();
        if let Some(groups) = self.groups.get(client.id) {
            return Ok(groups.clone());
        }
        self.ensure_open()?;

        let groups = self.query_groups(client)?;
        if self.config.debug(DebugFlags::DATABASE) {
            log::debug!("Client {} belongs to groups {}", client.ip, groups);
        }
        if self.groups.set(client.id, groups.clone()) {
            self.reserve_clients(self.groups.capacity());
        }
        Ok(groups)
    }

    fn query_groups(&self, client: &Client) -> Result<GroupFilter> {
        let conn = self.connection()?;
        let debug = self.config.debug(DebugFlags::DATABASE);

        if debug {
            log::debug!("Querying gravity database for client {}", client.ip);
        }
        let mut stmt = conn.prepare(CLIENT_SQL).map_err(|source| {
            log::error!("query_groups({}) - SQL error prepare: {}", CLIENT_SQL, source);
            Error::PrepareFailed {
                sql: CLIENT_SQL.to_string(),
                source,
            }
        })?;
        let record: Option<i64> = stmt
            .query_row([client.ip.as_str()], |row| row.get(0))
            .optional()
            .map_err(|e| {
                log::error!("query_groups({}) - SQL error step: {}", CLIENT_SQL, e);
                Error::from_step(e)
            })?;

        let Some(record) = record else {
            // Not configured through the client table
            return Ok(GroupFilter::default_group());
        };

        if debug {
            log::debug!(
                "Querying gravity database for client {} (getting groups of record {})",
                client.ip,
                record
            );
        }
        let mut stmt = conn.prepare(CLIENT_GROUPS_SQL).map_err(|source| {
            log::error!(
                "query_groups({}) - SQL error prepare: {}",
                CLIENT_GROUPS_SQL,
                source
            );
            Error::PrepareFailed {
                sql: CLIENT_GROUPS_SQL.to_string(),
                source,
            }
        })?;
        let rows = stmt
            .query_map([record], |row| row.get::<_, i64>(0))
            .map_err(Error::from_bind)?;

        let groups = rows
            .collect::<rusqlite::Result<GroupFilter>>()
            .map_err(|e| {
                log::error!("query_groups({}) - SQL error step: {}", CLIENT_GROUPS_SQL, e);
                Error::from_step(e)
            })?;
        Ok(groups)
    }
}
