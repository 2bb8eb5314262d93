//! Domain match evaluation.
//!
//! Every lookup here answers a yes/no question on the DNS hot path and must
//! never fail the response: when the database cannot be consulted the
//! answer is "not on list", which means not whitelisted and not blocked.

use rusqlite::Connection;

use crate::category::ListCategory;
use crate::client::Client;
use crate::config::DebugFlags;
use crate::error::{is_busy, Error, Result};
use crate::plan::QueryPlan;
use crate::regex_filter::RegexMatcher;
use crate::store::{GravityDb, AUDIT_SQL};

/// Run an existence query with `domain` bound as its only parameter.
///
/// Lock contention and execution errors are logged and reported as "not
/// found". Dropping the rows resets the statement and returning it to the
/// statement cache clears its bindings, so the next lookup reuses it as is.
fn domain_in_list(
    conn: &Connection,
    sql: &str,
    domain: &str,
    listname: &str,
    debug: bool,
) -> Result<bool> {
    let mut stmt = conn.prepare_cached(sql).map_err(|source| Error::PrepareFailed {
        sql: sql.to_string(),
        source,
    })?;

    stmt.raw_bind_parameter(1, domain).map_err(|e| {
        log::error!(
            "domain_in_list(\"{}\", {}): Failed to bind domain: {}",
            domain,
            listname,
            e
        );
        Error::from_bind(e)
    })?;

    let mut rows = stmt.raw_query();
    let result = match rows.next() {
        Ok(Some(row)) => row.get::<_, i64>(0),
        Ok(None) => Ok(0),
        Err(e) => Err(e),
    };

    match result {
        Ok(found) => {
            if debug {
                log::debug!("domain_in_list(\"{}\", {}): {}", domain, listname, found);
            }
            Ok(found == 1)
        }
        Err(e) if is_busy(&e) => {
            log::warn!(
                "domain_in_list(\"{}\", {}): Database is busy, assuming domain is NOT on list",
                domain,
                listname
            );
            Ok(false)
        }
        Err(e) => {
            log::error!(
                "domain_in_list(\"{}\", {}): Failed to perform step: {}",
                domain,
                listname,
                e
            );
            Ok(false)
        }
    }
}

impl GravityDb {
    /// Execute `plan` for `domain`.
    ///
    /// Busy and execution errors count as "not found". Errors are returned
    /// only when the statement cannot be prepared or bound, or the handle
    /// is closed.
    pub fn domain_in_category(&self, domain: &str, plan: &QueryPlan) -> Result<bool> {
        domain_in_list(
            self.connection()?,
            plan.sql(),
            domain,
            plan.category().as_str(),
            self.config.debug(DebugFlags::DATABASE),
        )
    }

    /// Look up `domain` with the cached plan of `(category, client)`.
    ///
    /// A plan that cannot be compiled again closes the handle.
    fn lookup(&mut self, domain: &str, category: ListCategory, client: &Client) -> bool {
        let result = match self.plans.get(category, client.id) {
            Some(plan) => self.domain_in_category(domain, plan),
            None => return false,
        };
        self.settle(result, category, domain)
    }

    /// Turn a lookup result into an answer, closing the handle on a prepare failure.
    fn settle(&mut self, result: Result<bool>, category: ListCategory, domain: &str) -> bool {
        match result {
            Ok(found) => found,
            Err(e) => {
                log::error!("{} lookup of \"{}\" failed: {}", category, domain, e);
                if matches!(e, Error::PrepareFailed { .. }) {
                    self.close();
                }
                false
            }
        }
    }

    /// Make sure the plan of `(category, client)` exists.
    fn ensure_plan(&mut self, category: ListCategory, client: &Client) -> Result<()> {
        self.check_fork_and_recover();
        self.get_or_build(category, client).map(|_| ())
    }

    /// Whether `domain` is whitelisted for `client`.
    ///
    /// The exact whitelist is consulted first; the regex whitelist only if
    /// the exact lookup did not match.
    pub fn in_whitelist<R: RegexMatcher + ?Sized>(
        &mut self,
        domain: &str,
        client: &Client,
        regex: &R,
    ) -> bool {
        if let Err(e) = self.ensure_plan(ListCategory::ExactWhite, client) {
            log::error!(
                "Gravity database not available, assuming domain is not whitelisted: {}",
                e
            );
            return false;
        }

        self.lookup(domain, ListCategory::ExactWhite, client)
            || regex
                .match_regex(domain, client, ListCategory::RegexWhite)
                .is_some()
    }

    /// Whether `domain` is on the gravity blocklist for `client`.
    pub fn in_gravity(&mut self, domain: &str, client: &Client) -> bool {
        if let Err(e) = self.ensure_plan(ListCategory::Gravity, client) {
            log::error!(
                "Gravity database not available, assuming domain is not gravity blocked: {}",
                e
            );
            return false;
        }
        self.lookup(domain, ListCategory::Gravity, client)
    }

    /// Whether `domain` is on the exact blacklist for `client`.
    pub fn in_blacklist(&mut self, domain: &str, client: &Client) -> bool {
        if let Err(e) = self.ensure_plan(ListCategory::ExactBlack, client) {
            log::error!(
                "Gravity database not available, assuming domain is not blacklisted: {}",
                e
            );
            return false;
        }
        self.lookup(domain, ListCategory::ExactBlack, client)
    }

    /// Whether `domain` has been audited.
    ///
    /// Audit entries are not group scoped and may start with a `*`
    /// wildcard, see [`GravityDb::open`].
    pub fn in_auditlist(&mut self, domain: &str) -> bool {
        self.check_fork_and_recover();
        if let Err(e) = self.ensure_open() {
            log::error!(
                "Gravity database not available, assuming domain is not audited: {}",
                e
            );
            return false;
        }

        let debug = self.config.debug(DebugFlags::DATABASE);
        let result = self.connection().and_then(|conn| {
            domain_in_list(conn, AUDIT_SQL, domain, ListCategory::Audit.as_str(), debug)
        });
        self.settle(result, ListCategory::Audit, domain)
    }
}
