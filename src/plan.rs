//! Per-client query plans.
//!
//! Plans are kept in flat arenas indexed by client id, one arena per
//! client-scoped list. The compiled statements themselves live in the
//! connection's prepared statement cache, keyed by the plan's SQL text, so
//! a plan is prepared once and reused for every later lookup until the
//! handle is closed or recovered after a fork.

use crate::category::ListCategory;
use crate::client::{Client, ClientId, ClientRegistry, GroupFilter};
use crate::config::DebugFlags;
use crate::error::{Error, Result};
use crate::store::GravityDb;

/// Number of extra slots allocated when an arena has to grow.
const ALLOC_STEP: usize = 10;

/// Growable arena of optional per-client entries.
#[derive(Debug)]
pub(crate) struct ClientSlots<T> {
    slots: Vec<Option<T>>,
}

impl<T> ClientSlots<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub(crate) fn get(&self, id: ClientId) -> Option<&T> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Store an entry, growing the arena when `id` is beyond its end.
    ///
    /// Returns `true` if the arena had to grow.
    pub(crate) fn set(&mut self, id: ClientId, item: T) -> bool {
        let grew = id >= self.slots.len();
        if grew {
            self.slots.resize_with(id + ALLOC_STEP, || None);
        }
        self.slots[id] = Some(item);
        grew
    }

    /// Drop every entry.
    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// A lookup statement bound to one list, one client and that client's groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    category: ListCategory,
    client: ClientId,
    groups: GroupFilter,
    sql: String,
}

impl QueryPlan {
    pub(crate) fn new(category: ListCategory, client: ClientId, groups: GroupFilter) -> Self {
        // EXISTS stops at the first matching row. An empty IN () list is
        // valid SQLite and never matches.
        let sql = format!(
            "SELECT EXISTS(SELECT domain FROM {} WHERE domain = ? AND group_id IN ({}));",
            category.table(),
            groups.sql_list()
        );
        Self {
            category,
            client,
            groups,
            sql,
        }
    }

    /// List this plan looks up.
    pub fn category(&self) -> ListCategory {
        self.category
    }

    /// Client this plan was built for.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Groups the plan is restricted to.
    pub fn groups(&self) -> &GroupFilter {
        &self.groups
    }

    /// Statement text of the plan.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Plan counters, mostly useful for tests and diagnostics.
///
/// `built` counts plans entering the arenas. Whether the statement behind a
/// cached plan stays compiled depends on the connection's statement cache,
/// which is sized to hold three plans per known client plus
/// `plan_cache_slack` and grows with the arenas, so a plan counted once is
/// also compiled once for as long as the handle stays open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Plans built since the handle was created
    pub built: u64,
    /// Plans currently cached
    pub cached: usize,
}

/// Plan arenas for the client-scoped lists.
#[derive(Debug)]
pub(crate) struct PlanCache {
    whitelist: ClientSlots<QueryPlan>,
    blacklist: ClientSlots<QueryPlan>,
    gravity: ClientSlots<QueryPlan>,
    built: u64,
}

impl PlanCache {
    pub(crate) fn new(clients: usize) -> Self {
        Self {
            whitelist: ClientSlots::new(clients),
            blacklist: ClientSlots::new(clients),
            gravity: ClientSlots::new(clients),
            built: 0,
        }
    }

    fn arena(&self, category: ListCategory) -> Option<&ClientSlots<QueryPlan>> {
        match category {
            ListCategory::ExactWhite => Some(&self.whitelist),
            ListCategory::ExactBlack => Some(&self.blacklist),
            ListCategory::Gravity => Some(&self.gravity),
            _ => None,
        }
    }

    fn arena_mut(&mut self, category: ListCategory) -> Option<&mut ClientSlots<QueryPlan>> {
        match category {
            ListCategory::ExactWhite => Some(&mut self.whitelist),
            ListCategory::ExactBlack => Some(&mut self.blacklist),
            ListCategory::Gravity => Some(&mut self.gravity),
            _ => None,
        }
    }

    pub(crate) fn get(&self, category: ListCategory, client: ClientId) -> Option<&QueryPlan> {
        self.arena(category)?.get(client)
    }

    /// Store a freshly built plan. Returns `true` if its arena had to grow.
    pub(crate) fn insert(&mut self, plan: QueryPlan) -> bool {
        let client = plan.client;
        let Some(arena) = self.arena_mut(plan.category) else {
            return false;
        };
        let grew = arena.set(client, plan);
        self.built += 1;
        grew
    }

    /// Replace every arena with an empty one sized for `clients`.
    pub(crate) fn reset(&mut self, clients: usize) {
        self.whitelist = ClientSlots::new(clients);
        self.blacklist = ClientSlots::new(clients);
        self.gravity = ClientSlots::new(clients);
    }

    /// Release every plan. The build counter is kept.
    pub(crate) fn clear(&mut self) {
        self.whitelist.clear();
        self.blacklist.clear();
        self.gravity.clear();
    }

    pub(crate) fn stats(&self) -> PlanStats {
        PlanStats {
            built: self.built,
            cached: self.whitelist.occupied() + self.blacklist.occupied() + self.gravity.occupied(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.gravity.capacity()
    }
}

impl GravityDb {
    /// Return the plan for `(category, client)`, building it on first use.
    ///
    /// Only the client-scoped lists (gravity, exact blacklist, exact
    /// whitelist) have per-client plans. A failure to prepare the statement
    /// closes the handle; the next call reopens it from scratch.
    pub fn get_or_build(&mut self, category: ListCategory, client: &Client) -> Result<&QueryPlan> {
        if !category.is_client_scoped() {
            return Err(Error::UnsupportedCategory(category));
        }
        self.check_fork_and_recover();
        self.ensure_open()?;

        if self.plans.get(category, client.id).is_none() {
            let groups = self.resolve_groups(client)?;
            let plan = QueryPlan::new(category, client.id, groups);

            if self.config.debug(DebugFlags::DATABASE) {
                log::debug!(
                    "Preparing {} statement for client {}: {}",
                    category,
                    client.ip,
                    plan.sql()
                );
            }

            let prepared = self
                .connection()?
                .prepare_cached(plan.sql())
                .map(|_| ());
            if let Err(source) = prepared {
                log::error!(
                    "get_or_build(\"SELECT EXISTS(... {} ...)\") - SQL error prepare: {}",
                    category.table(),
                    source
                );
                let sql = plan.sql().to_string();
                self.close();
                return Err(Error::PrepareFailed { sql, source });
            }

            if self.plans.insert(plan) {
                self.reserve_clients(self.plans.capacity());
            }
        }

        self.plans
            .get(category, client.id)
            .ok_or(Error::Unavailable)
    }

    /// Build the plans of every client-scoped list for `client` ahead of time.
    ///
    /// Optional: lookups build missing plans lazily.
    pub fn prepare_client(&mut self, client: &Client) -> Result<()> {
        self.check_fork_and_recover();

        if self.config.debug(DebugFlags::DATABASE) {
            log::debug!("Initializing gravity statements for {}", client.ip);
        }
        for category in [
            ListCategory::ExactWhite,
            ListCategory::Gravity,
            ListCategory::ExactBlack,
        ] {
            self.get_or_build(category, client)?;
        }
        Ok(())
    }

    /// Build plans for every client in `registry`.
    ///
    /// Returns the number of clients prepared; stops at the first failure.
    pub fn prepare_clients<R: ClientRegistry + ?Sized>(&mut self, registry: &R) -> Result<usize> {
        let count = registry.client_count();
        self.reserve_clients(count);

        let mut prepared = 0;
        for id in 0..count {
            if let Some(client) = registry.client(id) {
                self.prepare_client(&client)?;
                prepared += 1;
            }
        }
        Ok(prepared)
    }

    /// Plan counters for this handle.
    pub fn plan_stats(&self) -> PlanStats {
        self.plans.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_grow() {
        let mut slots: ClientSlots<u32> = ClientSlots::new(2);
        assert!(!slots.set(1, 7));
        assert!(slots.set(5, 9));
        assert_eq!(slots.capacity(), 15);
        assert_eq!(slots.get(1), Some(&7));
        assert_eq!(slots.get(5), Some(&9));
        assert_eq!(slots.get(4), None);
        assert_eq!(slots.get(100), None);
        assert_eq!(slots.occupied(), 2);

        slots.clear();
        assert_eq!(slots.occupied(), 0);
        assert_eq!(slots.capacity(), 15);
    }

    #[test]
    fn test_plan_sql() {
        let groups: GroupFilter = [0, 3].into_iter().collect();
        let plan = QueryPlan::new(ListCategory::Gravity, 4, groups);
        assert_eq!(
            plan.sql(),
            "SELECT EXISTS(SELECT domain FROM vw_gravity WHERE domain = ? AND group_id IN (0,3));"
        );
        assert_eq!(plan.client(), 4);
        assert_eq!(plan.category(), ListCategory::Gravity);
    }

    #[test]
    fn test_empty_group_plan() {
        let plan = QueryPlan::new(ListCategory::ExactWhite, 0, GroupFilter::empty());
        assert!(plan.sql().ends_with("group_id IN ());"));
    }

    #[test]
    fn test_plan_cache_per_category() {
        let mut cache = PlanCache::new(1);
        cache.insert(QueryPlan::new(ListCategory::Gravity, 0, GroupFilter::default_group()));

        assert!(cache.get(ListCategory::Gravity, 0).is_some());
        assert!(cache.get(ListCategory::ExactWhite, 0).is_none());
        assert!(cache.get(ListCategory::ExactBlack, 0).is_none());
        assert!(cache.get(ListCategory::Audit, 0).is_none());
        assert_eq!(cache.stats(), PlanStats { built: 1, cached: 1 });

        cache.clear();
        assert_eq!(cache.stats(), PlanStats { built: 1, cached: 0 });
    }
}
