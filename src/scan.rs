//! Bulk list reading for materializing lists in memory.

use rusqlite::types::Value;
use rusqlite::{CachedStatement, Rows};

use crate::category::ListCategory;
use crate::error::{Error, Result};
use crate::store::GravityDb;

/// Summary value maintained by the list loader.
const GRAVITY_COUNT_SQL: &str = "SELECT value FROM info WHERE property = 'gravity_count';";

/// One row of a list scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    /// Domain or pattern text
    pub domain: String,
    /// Row id of the entry
    pub row_id: i64,
}

/// Statement text for a full scan of `category`.
///
/// The views include the group id, so a domain present in several groups
/// shows up once per group unless grouped by row id.
fn scan_sql(category: ListCategory) -> String {
    match category {
        ListCategory::Audit => "SELECT domain, rowid FROM domain_audit;".to_string(),
        other => format!("SELECT domain, id FROM {} GROUP BY id;", other.table()),
    }
}

/// Statement text counting the entries of `category`.
///
/// Counting distinct gravity domains can take minutes on small devices, the
/// loader stores the number instead.
fn count_sql(category: ListCategory) -> String {
    match category {
        ListCategory::Gravity => GRAVITY_COUNT_SQL.to_string(),
        other => format!("SELECT COUNT(DISTINCT domain) FROM {};", other.table()),
    }
}

/// An open scan over one list.
///
/// Dropping the scan releases its statement, whether or not it was read to
/// the end.
pub struct ListScan<'db> {
    category: ListCategory,
    stmt: CachedStatement<'db>,
    started: bool,
}

impl<'db> ListScan<'db> {
    /// List being scanned.
    pub fn category(&self) -> ListCategory {
        self.category
    }

    /// Start reading records.
    ///
    /// A scan is forward-only: a second call yields nothing.
    pub fn records(&mut self) -> DomainRecords<'_> {
        let rows = if self.started {
            None
        } else {
            self.started = true;
            Some(self.stmt.raw_query())
        };
        DomainRecords {
            category: self.category,
            rows,
        }
    }
}

/// Lazy sequence of [`DomainRecord`]s from a [`ListScan`].
///
/// A read error ends the sequence early and is logged.
pub struct DomainRecords<'s> {
    category: ListCategory,
    rows: Option<Rows<'s>>,
}

impl Iterator for DomainRecords<'_> {
    type Item = DomainRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.rows.as_mut()?;
        let step = match rows.next() {
            Ok(Some(row)) => Some(
                row.get::<_, String>(0)
                    .and_then(|domain| row.get(1).map(|row_id| DomainRecord { domain, row_id })),
            ),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        };

        match step {
            Some(Ok(record)) => Some(record),
            Some(Err(e)) => {
                log::error!("{} scan - SQL error step: {}", self.category, e);
                self.rows = None;
                None
            }
            None => {
                self.rows = None;
                None
            }
        }
    }
}

impl GravityDb {
    /// Open a scan over every entry of `category`, deduplicated by row id.
    ///
    /// A failure to prepare the scan closes the handle.
    pub fn open_scan(&mut self, category: ListCategory) -> Result<ListScan<'_>> {
        self.check_fork_and_recover();
        if let Err(e) = self.ensure_open() {
            log::error!("open_scan({}): Gravity database not available", category);
            return Err(e);
        }

        let sql = scan_sql(category);
        let prepared = self.connection()?.prepare_cached(&sql).map(|_| ());
        if let Err(source) = prepared {
            log::error!("open_scan({}) - SQL error prepare: {}", sql, source);
            self.close();
            return Err(Error::PrepareFailed { sql, source });
        }

        let stmt = self
            .connection()?
            .prepare_cached(&sql)
            .map_err(|source| Error::PrepareFailed {
                sql: sql.clone(),
                source,
            })?;
        Ok(ListScan {
            category,
            stmt,
            started: false,
        })
    }

    /// Read every entry of `category` into memory.
    pub fn read_list(&mut self, category: ListCategory) -> Result<Vec<DomainRecord>> {
        let mut scan = self.open_scan(category)?;
        let records = scan.records().collect();
        Ok(records)
    }

    /// Number of distinct domains in `category`.
    ///
    /// For gravity this is the count stored by the list loader. Returns
    /// `None` when the number is unavailable; a query failure also closes
    /// the handle.
    pub fn count(&mut self, category: ListCategory) -> Option<usize> {
        self.check_fork_and_recover();
        if self.ensure_open().is_err() {
            log::error!("count({}): Gravity database not available", category);
            return None;
        }

        let sql = count_sql(category);
        let result = self
            .connection()
            .and_then(|conn| {
                conn.query_row(&sql, [], |row| row.get::<_, Value>(0))
                    .map_err(Error::from_step)
            })
            .and_then(|value| value_to_count(value).ok_or(Error::Unavailable));

        match result {
            Ok(count) => Some(count),
            Err(e) => {
                log::error!("count({}) - SQL error: {}", sql, e);
                if category == ListCategory::Gravity {
                    log::error!("Count of gravity domains not available. Please rebuild gravity");
                }
                self.close();
                None
            }
        }
    }
}

/// Interpret a count column, which the loader may store as text.
fn value_to_count(value: Value) -> Option<usize> {
    match value {
        Value::Integer(n) => usize::try_from(n).ok(),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Real(f) if f >= 0.0 => Some(f as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_sql() {
        assert_eq!(
            scan_sql(ListCategory::ExactBlack),
            "SELECT domain, id FROM vw_blacklist GROUP BY id;"
        );
        assert_eq!(
            scan_sql(ListCategory::Audit),
            "SELECT domain, rowid FROM domain_audit;"
        );
    }

    #[test]
    fn test_count_sql() {
        assert_eq!(count_sql(ListCategory::Gravity), GRAVITY_COUNT_SQL);
        assert_eq!(
            count_sql(ListCategory::RegexWhite),
            "SELECT COUNT(DISTINCT domain) FROM vw_regex_whitelist;"
        );
    }

    #[test]
    fn test_value_to_count() {
        assert_eq!(value_to_count(Value::Integer(12)), Some(12));
        assert_eq!(value_to_count(Value::Text("340 ".to_string())), Some(340));
        assert_eq!(value_to_count(Value::Integer(-2)), None);
        assert_eq!(value_to_count(Value::Null), None);
        assert_eq!(value_to_count(Value::Text("n/a".to_string())), None);
    }
}
