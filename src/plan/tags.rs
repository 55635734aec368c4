// src/plan/tags.rs

//! Tag-based selection of assertions and checks.
//!
//! Selection rules, applied to an assertion's effective tags (group tags
//! plus its own):
//! - anything matching `--skip-tags` is excluded
//! - `never` is excluded unless one of its tags is selected explicitly
//! - with no `--tags`, everything else is selected
//! - with `--tags`, an intersection is required; `always` is always selected

use std::collections::BTreeSet;

/// Tag that is selected regardless of `--tags`
pub const ALWAYS_TAG: &str = "always";

/// Tag that makes an assertion opt-in
pub const NEVER_TAG: &str = "never";

/// Run-time tag selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    only: BTreeSet<String>,
    skip: BTreeSet<String>,
}

impl TagFilter {
    /// Select everything not tagged `never`
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from `--tags` and `--skip-tags` values
    pub fn new<I, J, S, T>(only: I, skip: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            only: normalize(only),
            skip: normalize(skip),
        }
    }

    /// Parse a comma-separated tag list (`"base,docker"`)
    pub fn parse_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether any `--tags` were given
    pub fn is_restricted(&self) -> bool {
        !self.only.is_empty()
    }

    /// Decide whether an item with these effective tags runs
    pub fn selects(&self, tags: &BTreeSet<String>) -> bool {
        if tags.iter().any(|t| self.skip.contains(t)) {
            return false;
        }

        let explicitly_selected = tags.iter().any(|t| self.only.contains(t));

        if tags.contains(NEVER_TAG) {
            return explicitly_selected;
        }

        if self.only.is_empty() {
            return true;
        }

        explicitly_selected || tags.contains(ALWAYS_TAG)
    }
}

fn normalize<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter()
        .map(Into::into)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
