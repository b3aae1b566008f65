//! Module: tabcol
//! Responsibility: `TabCol`, a fully qualified column reference. Every
//! `TabCol` reachable from a post-analysis `Query` or `Plan` is qualified:
//! the analyzer is the only place an unqualified name may appear.

use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TabCol {
    pub tab_name: String,
    pub col_name: String,
}

impl TabCol {
    #[must_use]
    pub fn new(tab_name: impl Into<String>, col_name: impl Into<String>) -> Self {
        Self {
            tab_name: tab_name.into(),
            col_name: col_name.into(),
        }
    }

    /// The `COUNT(*)` sentinel: an empty `TabCol` that bypasses column
    /// resolution and always accepts.
    #[must_use]
    pub fn star() -> Self {
        Self {
            tab_name: String::new(),
            col_name: String::new(),
        }
    }

    #[must_use]
    pub fn is_star(&self) -> bool {
        self.tab_name.is_empty() && self.col_name.is_empty()
    }
}

impl fmt::Display for TabCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_star() {
            write!(f, "*")
        } else {
            write!(f, "{}.{}", self.tab_name, self.col_name)
        }
    }
}
