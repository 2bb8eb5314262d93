//! Regex filter capability and its per-client group scoping.

use ahash::{AHashMap, AHashSet};
use regex::Regex;
use rusqlite::Connection;

use crate::category::ListCategory;
use crate::client::{Client, ClientId};
use crate::config::DebugFlags;
use crate::error::{Error, Result};
use crate::store::GravityDb;

/// Regex matching capability consulted by [`GravityDb::in_whitelist`].
pub trait RegexMatcher {
    /// Return the database id of the first regex filter of `category` that
    /// is enabled for `client` and matches `domain`.
    fn match_regex(&self, domain: &str, client: &Client, category: ListCategory) -> Option<i64>;
}

/// A matcher without any filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegex;

impl RegexMatcher for NoRegex {
    fn match_regex(&self, _domain: &str, _client: &Client, _category: ListCategory) -> Option<i64> {
        None
    }
}

impl<F> RegexMatcher for F
where
    F: Fn(&str, &Client, ListCategory) -> Option<i64>,
{
    fn match_regex(&self, domain: &str, client: &Client, category: ListCategory) -> Option<i64> {
        self(domain, client, category)
    }
}

impl GravityDb {
    /// Ids of the regex filters of `category` enabled for `client`'s groups.
    pub fn regex_ids_for_client(
        &mut self,
        client: &Client,
        category: ListCategory,
    ) -> Result<Vec<i64>> {
        self.check_fork_and_recover();
        if !category.is_regex() {
            return Err(Error::UnsupportedCategory(category));
        }
        let groups = self.resolve_groups(client)?;

        let sql = format!(
            "SELECT id FROM {} WHERE group_id IN ({});",
            category.table(),
            groups.sql_list()
        );
        if self.config.debug(DebugFlags::REGEX) {
            log::debug!(
                "Regex {}: Querying groups for client {}: \"{}\"",
                category,
                client.ip,
                sql
            );
        }

        let ids = self.connection().and_then(|conn| query_ids(conn, &sql));
        if let Err(Error::PrepareFailed { source, .. }) = &ids {
            log::error!("regex_ids_for_client(): {} - SQL error prepare: {}", sql, source);
            self.close();
        }
        ids
    }
}

fn query_ids(conn: &Connection, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql).map_err(|source| Error::PrepareFailed {
        sql: sql.to_string(),
        source,
    })?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .map_err(Error::from_bind)?;
    let ids = rows
        .collect::<rusqlite::Result<Vec<i64>>>()
        .map_err(Error::from_step)?;
    Ok(ids)
}

/// A compiled regex filter.
#[derive(Debug, Clone)]
struct CompiledFilter {
    id: i64,
    regex: Regex,
}

/// Filters enabled for one client.
#[derive(Debug, Clone, Default)]
struct EnabledFilters {
    blacklist: AHashSet<i64>,
    whitelist: AHashSet<i64>,
}

impl EnabledFilters {
    fn get(&self, category: ListCategory) -> Option<&AHashSet<i64>> {
        match category {
            ListCategory::RegexBlack => Some(&self.blacklist),
            ListCategory::RegexWhite => Some(&self.whitelist),
            _ => None,
        }
    }

    fn get_mut(&mut self, category: ListCategory) -> Option<&mut AHashSet<i64>> {
        match category {
            ListCategory::RegexBlack => Some(&mut self.blacklist),
            ListCategory::RegexWhite => Some(&mut self.whitelist),
            _ => None,
        }
    }
}

/// Regex filters loaded from the gravity database, scoped per client.
///
/// # Example
/// ```ignore
/// use k2gravity::{Client, GravityConfig, GravityDb, RegexFilters};
///
/// let mut db = GravityDb::new(GravityConfig::default());
/// let mut filters = RegexFilters::load(&mut db)?;
///
/// let client = Client::new(0, "192.168.1.10");
/// filters.enable_client(&mut db, &client)?;
/// let allowed = db.in_whitelist("cdn.example.com", &client, &filters);
/// ```
#[derive(Debug, Default)]
pub struct RegexFilters {
    blacklist: Vec<CompiledFilter>,
    whitelist: Vec<CompiledFilter>,
    enabled: AHashMap<ClientId, EnabledFilters>,
    debug: bool,
}

impl RegexFilters {
    /// Create an empty filter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and compile both regex lists.
    ///
    /// Filters that fail to compile are logged and skipped. No filter is
    /// enabled for any client until [`enable_client`](Self::enable_client).
    pub fn load(db: &mut GravityDb) -> Result<Self> {
        let mut filters = Self::new();
        filters.debug = db.config().debug(DebugFlags::REGEX);

        for category in [ListCategory::RegexBlack, ListCategory::RegexWhite] {
            let mut scan = db.open_scan(category)?;
            for record in scan.records() {
                filters.add_pattern(category, record.row_id, &record.domain);
            }
        }

        log::info!(
            "Compiled {} blacklist and {} whitelist regex filters",
            filters.blacklist.len(),
            filters.whitelist.len()
        );
        Ok(filters)
    }

    fn list(&self, category: ListCategory) -> Option<&Vec<CompiledFilter>> {
        match category {
            ListCategory::RegexBlack => Some(&self.blacklist),
            ListCategory::RegexWhite => Some(&self.whitelist),
            _ => None,
        }
    }

    /// Compile and add one filter.
    ///
    /// Returns `false` if the category is not a regex list or the pattern
    /// does not compile.
    pub fn add_pattern(&mut self, category: ListCategory, id: i64, pattern: &str) -> bool {
        let list = match category {
            ListCategory::RegexBlack => &mut self.blacklist,
            ListCategory::RegexWhite => &mut self.whitelist,
            _ => return false,
        };

        match Regex::new(pattern) {
            Ok(regex) => {
                list.push(CompiledFilter { id, regex });
                true
            }
            Err(e) => {
                log::warn!("Invalid {} filter {} \"{}\": {}", category, id, pattern, e);
                false
            }
        }
    }

    /// Number of compiled filters in `category`.
    pub fn filter_count(&self, category: ListCategory) -> usize {
        self.list(category).map_or(0, Vec::len)
    }

    /// Enable the filters of `category` with the given ids for a client.
    pub fn set_enabled(
        &mut self,
        client: ClientId,
        category: ListCategory,
        ids: impl IntoIterator<Item = i64>,
    ) {
        if let Some(set) = self.enabled.entry(client).or_default().get_mut(category) {
            set.clear();
            set.extend(ids);
        }
    }

    /// Enable the filters of both regex lists according to `client`'s groups.
    pub fn enable_client(&mut self, db: &mut GravityDb, client: &Client) -> Result<()> {
        for category in [ListCategory::RegexBlack, ListCategory::RegexWhite] {
            let ids = db.regex_ids_for_client(client, category)?;
            if self.debug {
                log::debug!(
                    "Regex {}: Enabling {} filters for client {}",
                    category,
                    ids.len(),
                    client.ip
                );
            }
            self.set_enabled(client.id, category, ids);
        }
        Ok(())
    }

    /// Forget all per-client enablement, e.g. after the database was reopened.
    pub fn reset_clients(&mut self) {
        self.enabled.clear();
    }
}

impl RegexMatcher for RegexFilters {
    fn match_regex(&self, domain: &str, client: &Client, category: ListCategory) -> Option<i64> {
        let enabled = self.enabled.get(&client.id)?.get(category)?;
        let matched = self
            .list(category)?
            .iter()
            .find(|filter| enabled.contains(&filter.id) && filter.regex.is_match(domain))
            .map(|filter| filter.id);

        if self.debug {
            if let Some(id) = matched {
                log::debug!(
                    "Regex {} (DB ID {}) >> MATCH: \"{}\" for client {}",
                    category,
                    id,
                    domain,
                    client.ip
                );
            }
        }
        matched
    }
}
