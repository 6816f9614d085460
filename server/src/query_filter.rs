//! Query compilation and reduction shared by every backend's `list_files`
//! (spec §4.6, §8 E4). Each backend fetches its own candidate set (a full
//! per-host scan for the file backend, a compiled Mongo filter document for
//! the document-store backend) and then runs it through the same predicate
//! and latest-only reduction here, so the "keep the newest version per
//! (path, file_type)" rule can't drift between backends.

use cdp_proto::{FileMeta, Query};

fn matches(record: &FileMeta, query: &Query) -> bool {
    if record.host != query.host {
        return false;
    }
    if let Some(ref filename) = query.filename {
        if !cdp_proto::query::substring_match_ci(&record.name, filename) {
            return false;
        }
    }
    if let Some(before) = query.before_mtime {
        if record.mtime > before {
            return false;
        }
    }
    if let Some(after) = query.after_mtime {
        if record.mtime < after {
            return false;
        }
    }
    if let Some(ref owner) = query.owner {
        if !cdp_proto::query::substring_match_ci(&record.owner, owner) {
            return false;
        }
    }
    if let Some(ref group) = query.group {
        if !cdp_proto::query::substring_match_ci(&record.group, group) {
            return false;
        }
    }
    true
}

/// Apply a query's predicates to an already-fetched candidate set, then
/// reduce to latest-only if requested.
pub fn apply(records: Vec<FileMeta>, query: &Query) -> Vec<FileMeta> {
    let mut matched: Vec<FileMeta> = records.into_iter().filter(|r| matches(r, query)).collect();

    if !query.latest_only {
        return matched;
    }

    matched.sort_by(|a, b| b.latest_cmp(a));

    let mut seen = std::collections::HashSet::new();
    matched
        .into_iter()
        .filter(|r| seen.insert((r.path.clone(), r.file_type)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_proto::FileType;

    fn meta(path: &str, mtime: i64, ctime: i64) -> FileMeta {
        FileMeta {
            host: "hostA".into(),
            path: path.into(),
            name: path.trim_start_matches('/').into(),
            file_type: FileType::Regular,
            mode: 0o644,
            uid: 0,
            gid: 0,
            owner: "root".into(),
            group: "root".into(),
            inode: 1,
            size: 0,
            atime: mtime,
            ctime,
            mtime,
            link: None,
            hashes: vec![],
        }
    }

    #[test]
    fn latest_only_keeps_newest_per_path() {
        let records = vec![meta("/a.txt", 100, 100), meta("/a.txt", 200, 200), meta("/b.txt", 50, 50)];
        let query = Query::new("hostA").with_latest_only(true);
        let out = apply(records, &query);
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|r| r.path == "/a.txt" && r.mtime == 200));
        assert!(out.iter().any(|r| r.path == "/b.txt" && r.mtime == 50));
    }

    #[test]
    fn tie_breaks_on_ctime_when_mtime_equal() {
        let records = vec![meta("/a.txt", 100, 1), meta("/a.txt", 100, 2)];
        let query = Query::new("hostA").with_latest_only(true);
        let out = apply(records, &query);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ctime, 2);
    }

    #[test]
    fn filename_filter_is_case_insensitive_substring() {
        let records = vec![meta("/Reports/Q1.PDF", 1, 1), meta("/other.txt", 1, 1)];
        let query = Query::new("hostA").with_filename("report");
        let out = apply(records, &query);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "/Reports/Q1.PDF");
    }

    #[test]
    fn wrong_host_never_matches() {
        let mut records = vec![meta("/a.txt", 1, 1)];
        records[0].host = "hostB".into();
        let query = Query::new("hostA");
        assert!(apply(records, &query).is_empty());
    }
}
