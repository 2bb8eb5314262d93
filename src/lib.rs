//! K2Gravity - per-client domain policy lookups for DNS filtering.
//!
//! This crate answers, for every resolved name and every querying client,
//! whether the name is whitelisted, blacklisted, on the gravity blocklist or
//! audited. The lists live in a SQLite "gravity" database maintained by an
//! external loader; this crate only ever reads it.
//!
//! # Features
//!
//! - **Group scoping**: list entries belong to groups, clients are mapped to
//!   groups by address or subnet, unconfigured clients use group `0`
//! - **Prepared plans per client**: lookups reuse a compiled statement bound
//!   to the client's groups
//! - **Fork safety**: a handle detects that its process forked and rebuilds
//!   the connection and every cache before the next lookup
//! - **Never blocks, never fails the response**: lock contention and store
//!   errors turn into "not on list"
//! - **Bulk reading**: scan or count a whole list to build in-memory indexes
//!
//! # Quick Start
//!
//! ```ignore
//! use k2gravity::{Client, GravityConfig, GravityDb, NoRegex};
//!
//! let mut db = GravityDb::new(GravityConfig::with_database("/etc/pihole/gravity.db"));
//! let client = Client::new(0, "192.168.1.10");
//!
//! if db.in_whitelist("example.com", &client, &NoRegex) {
//!     // allowed
//! } else if db.in_blacklist("example.com", &client) || db.in_gravity("example.com", &client) {
//!     // blocked
//! }
//! ```
//!
//! # Bulk Reading
//!
//! ```ignore
//! use k2gravity::ListCategory;
//!
//! let mut scan = db.open_scan(ListCategory::ExactBlack)?;
//! for record in scan.records() {
//!     println!("{} {}", record.row_id, record.domain);
//! }
//! drop(scan);
//!
//! let total = db.count(ListCategory::Gravity);
//! ```
//!
//! # Decision Order
//!
//! Callers evaluate lists in this order:
//! 1. Whitelist (exact, then regex)
//! 2. Blacklist
//! 3. Gravity
//!
//! The audit list is independent of groups and only marks domains that were
//! already reviewed.

mod category;
mod client;
mod config;
mod error;
mod groups;
mod matcher;
mod plan;
mod regex_filter;
mod scan;
mod store;

// Re-export core types
pub use category::ListCategory;
pub use client::{Client, ClientId, ClientRegistry, GroupFilter, DEFAULT_GROUP};
pub use config::{DebugFlags, GravityConfig, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_PATH};
pub use error::{Error, Result};

// Re-export the database handle and its products
pub use plan::{PlanStats, QueryPlan};
pub use scan::{DomainRecord, DomainRecords, ListScan};
pub use store::{GravityDb, ProcessIdSource};

// Re-export regex capability
pub use regex_filter::{NoRegex, RegexFilters, RegexMatcher};
