//! File listing queries (spec §3, §4.6).

use serde::{Deserialize, Serialize};

/// A point-in-time file listing query.
///
/// `filename`/`owner`/`group` are case-insensitive substring matches;
/// `before_mtime`/`after_mtime` are Unix-second bounds; `latest_only`
/// reduces the result to one record per `(path, file_type)` (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub host: String,
    pub filename: Option<String>,
    pub before_mtime: Option<i64>,
    pub after_mtime: Option<i64>,
    pub owner: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub latest_only: bool,
}

impl Query {
    pub fn new(host: impl Into<String>) -> Self {
        Query {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_latest_only(mut self, latest_only: bool) -> Self {
        self.latest_only = latest_only;
        self
    }

    pub fn with_before_mtime(mut self, t: i64) -> Self {
        self.before_mtime = Some(t);
        self
    }

    pub fn with_after_mtime(mut self, t: i64) -> Self {
        self.after_mtime = Some(t);
        self
    }

    pub fn with_filename(mut self, f: impl Into<String>) -> Self {
        self.filename = Some(f.into());
        self
    }
}

/// Case-insensitive substring match, used uniformly for `filename`,
/// `owner`, and `group` predicates (spec §4.6).
pub fn substring_match_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_is_case_insensitive() {
        assert!(substring_match_ci("Report.PDF", "report"));
        assert!(!substring_match_ci("Report.PDF", "invoice"));
    }

    #[test]
    fn builder_sets_fields() {
        let q = Query::new("hostA")
            .with_filename("a.txt")
            .with_before_mtime(100)
            .with_latest_only(true);
        assert_eq!(q.host, "hostA");
        assert_eq!(q.filename.as_deref(), Some("a.txt"));
        assert_eq!(q.before_mtime, Some(100));
        assert!(q.latest_only);
    }
}
