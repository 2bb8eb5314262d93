//! List category definitions.

use std::fmt;

/// ListCategory identifies one of the domain lists stored in the gravity database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ListCategory {
    /// Domains collected from adlists
    Gravity = 0,
    /// Exact blacklist entries
    ExactBlack = 1,
    /// Exact whitelist entries
    ExactWhite = 2,
    /// Regex blacklist filters
    RegexBlack = 3,
    /// Regex whitelist filters
    RegexWhite = 4,
    /// Audited domains (wildcard patterns allowed)
    Audit = 5,
}

impl ListCategory {
    /// All categories in storage order.
    pub const ALL: [ListCategory; 6] = [
        ListCategory::Gravity,
        ListCategory::ExactBlack,
        ListCategory::ExactWhite,
        ListCategory::RegexBlack,
        ListCategory::RegexWhite,
        ListCategory::Audit,
    ];

    /// Name of the relation backing this category.
    pub fn table(&self) -> &'static str {
        match self {
            ListCategory::Gravity => "vw_gravity",
            ListCategory::ExactBlack => "vw_blacklist",
            ListCategory::ExactWhite => "vw_whitelist",
            ListCategory::RegexBlack => "vw_regex_blacklist",
            ListCategory::RegexWhite => "vw_regex_whitelist",
            ListCategory::Audit => "domain_audit",
        }
    }

    /// Short list name used in log messages and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListCategory::Gravity => "gravity",
            ListCategory::ExactBlack => "blacklist",
            ListCategory::ExactWhite => "whitelist",
            ListCategory::RegexBlack => "regex_blacklist",
            ListCategory::RegexWhite => "regex_whitelist",
            ListCategory::Audit => "auditlist",
        }
    }

    /// Parse a category from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "gravity" => Some(ListCategory::Gravity),
            "blacklist" | "black" => Some(ListCategory::ExactBlack),
            "whitelist" | "white" => Some(ListCategory::ExactWhite),
            "regex_blacklist" | "regex_black" => Some(ListCategory::RegexBlack),
            "regex_whitelist" | "regex_white" => Some(ListCategory::RegexWhite),
            "audit" | "auditlist" => Some(ListCategory::Audit),
            _ => None,
        }
    }

    /// Convert from a u8 value.
    ///
    /// Returns `None` for unknown lists.
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Convert to a u8 value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether entries of this category are regular expressions.
    pub fn is_regex(&self) -> bool {
        matches!(self, ListCategory::RegexBlack | ListCategory::RegexWhite)
    }

    /// Whether lookups in this category go through a per-client plan.
    pub fn is_client_scoped(&self) -> bool {
        matches!(
            self,
            ListCategory::Gravity | ListCategory::ExactBlack | ListCategory::ExactWhite
        )
    }
}

impl fmt::Display for ListCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}
