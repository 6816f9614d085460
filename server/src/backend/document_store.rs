//! The MongoDB-backed backend (spec §4.6).
//!
//! One collection per host, named `"<host>_meta"`. A `FileMeta` record is
//! stored field-wise (not as an opaque blob) so that `filename`/`owner`/
//! `group` substring queries and `mtime` range queries compile down to a
//! native Mongo filter document instead of a full collection scan.
//!
//! Implements `store_filemeta` and `list_files` only; block storage is the
//! object-store backend's job (spec §4.7 routing table).

use super::{Backend, BackendCapabilities, BackendError};
use async_trait::async_trait;
use cdp_proto::{Block, FileMeta, FileType, Hash, HashEncoding, Query};
use futures_util::stream::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::Client;

pub struct DocumentStoreBackend {
    client: Client,
    database: String,
    hash_encoding: HashEncoding,
}

impl DocumentStoreBackend {
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        user: Option<&str>,
        key: Option<&str>,
        hash_base64: bool,
    ) -> Result<Self, BackendError> {
        let uri = match (user, key) {
            (Some(user), Some(key)) => format!("mongodb://{user}:{key}@{host}:{port}"),
            _ => format!("mongodb://{host}:{port}"),
        };
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| BackendError::Config(format!("mongodb connect: {e}")))?;

        Ok(DocumentStoreBackend {
            client,
            database: database.to_string(),
            hash_encoding: if hash_base64 {
                HashEncoding::Base64
            } else {
                HashEncoding::Hex
            },
        })
    }

    fn collection(&self, host: &str) -> mongodb::Collection<Document> {
        self.client
            .database(&self.database)
            .collection(&format!("{host}_meta"))
    }

    fn file_type_to_str(ft: FileType) -> &'static str {
        match ft {
            FileType::Regular => "regular",
            FileType::Directory => "directory",
            FileType::Symlink => "symlink",
            FileType::Other => "other",
        }
    }

    fn file_type_from_str(s: &str) -> FileType {
        match s {
            "directory" => FileType::Directory,
            "symlink" => FileType::Symlink,
            "regular" => FileType::Regular,
            _ => FileType::Other,
        }
    }

    fn to_document(&self, record: &FileMeta) -> Document {
        let hashlist: Vec<Bson> = record
            .hashes
            .iter()
            .map(|h| Bson::String(self.hash_encoding.encode(h)))
            .collect();

        doc! {
            "host": &record.host,
            "path": &record.path,
            "name": &record.name,
            "file_type": Self::file_type_to_str(record.file_type),
            "mode": record.mode,
            "uid": record.uid,
            "gid": record.gid,
            "owner": &record.owner,
            "group": &record.group,
            "inode": record.inode,
            "size": record.size,
            "atime": record.atime,
            "ctime": record.ctime,
            "mtime": record.mtime,
            "link": record.link.clone(),
            "hashlist": hashlist,
        }
    }

    fn from_document(&self, doc: &Document) -> Option<FileMeta> {
        let hashlist = doc.get_array("hashlist").ok()?;
        let mut hashes = Vec::with_capacity(hashlist.len());
        for entry in hashlist {
            let s = entry.as_str()?;
            hashes.push(self.hash_encoding.decode(s).ok()?);
        }

        Some(FileMeta {
            host: doc.get_str("host").ok()?.to_string(),
            path: doc.get_str("path").ok()?.to_string(),
            name: doc.get_str("name").ok()?.to_string(),
            file_type: Self::file_type_from_str(doc.get_str("file_type").unwrap_or("other")),
            mode: doc.get_i64("mode").ok()?,
            uid: doc.get_i64("uid").ok()?,
            gid: doc.get_i64("gid").ok()?,
            owner: doc.get_str("owner").ok()?.to_string(),
            group: doc.get_str("group").ok()?.to_string(),
            inode: doc.get_i64("inode").ok()?,
            size: doc.get_i64("size").ok()?,
            atime: doc.get_i64("atime").ok()?,
            ctime: doc.get_i64("ctime").ok()?,
            mtime: doc.get_i64("mtime").ok()?,
            link: doc.get_str("link").ok().map(|s| s.to_string()),
            hashes,
        })
    }

    /// Compile a `Query` into a Mongo filter document: case-insensitive
    /// substring regex on `filename`/`owner`/`group`, inclusive `$lte`/`$gte`
    /// bounds on `mtime`, AND-combined (spec §4.6). This is purely a
    /// narrowing prefilter run server-side by Mongo; `query_filter::apply`
    /// re-applies the same predicates afterward, so the two must agree — an
    /// anchored `^...$` regex here (exact match) would silently diverge from
    /// the substring semantics `query_filter` applies.
    fn compile_filter(query: &Query) -> Document {
        let mut filter = Document::new();
        if let Some(ref filename) = query.filename {
            filter.insert("name", doc! { "$regex": filename, "$options": "i" });
        }
        if let Some(ref owner) = query.owner {
            filter.insert("owner", doc! { "$regex": owner, "$options": "i" });
        }
        if let Some(ref group) = query.group {
            filter.insert("group", doc! { "$regex": group, "$options": "i" });
        }
        let mut mtime_range = Document::new();
        if let Some(before) = query.before_mtime {
            mtime_range.insert("$lte", before);
        }
        if let Some(after) = query.after_mtime {
            mtime_range.insert("$gte", after);
        }
        if !mtime_range.is_empty() {
            filter.insert("mtime", mtime_range);
        }
        filter
    }
}

#[async_trait]
impl Backend for DocumentStoreBackend {
    async fn store_filemeta(&self, record: FileMeta) -> Result<(), BackendError> {
        let collection = self.collection(&record.host);
        let document = self.to_document(&record);
        collection
            .insert_one(document, None)
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        Ok(())
    }

    async fn list_files(&self, query: &Query) -> Result<Vec<FileMeta>, BackendError> {
        let collection = self.collection(&query.host);
        let filter = Self::compile_filter(query);
        let options = FindOptions::builder().sort(doc! { "mtime": -1 }).build();

        let mut cursor = collection
            .find(filter, options)
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(raw) = cursor
            .try_next()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?
        {
            if let Some(meta) = self.from_document(&raw) {
                records.push(meta);
            }
        }

        Ok(crate::query_filter::apply(records, query))
    }

    async fn store_block(&self, _block: Block) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("store_block"))
    }

    async fn needed_hashes(&self, _candidates: &[Hash]) -> Result<Vec<Hash>, BackendError> {
        Err(BackendError::Unsupported("needed_hashes"))
    }

    async fn retrieve_block(&self, _hash: &Hash) -> Result<Block, BackendError> {
        Err(BackendError::Unsupported("retrieve_block"))
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            store_filemeta: true,
            list_files: true,
            store_block: false,
            needed_hashes: false,
            retrieve_block: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_filter_and_combines_all_predicates() {
        let query = Query::new("hostA")
            .with_filename("report")
            .with_before_mtime(200)
            .with_after_mtime(100);
        let filter = DocumentStoreBackend::compile_filter(&query);
        assert!(filter.contains_key("name"));
        let mtime = filter.get_document("mtime").unwrap();
        assert_eq!(mtime.get_i64("$lte").unwrap(), 200);
        assert_eq!(mtime.get_i64("$gte").unwrap(), 100);
    }

    #[test]
    fn compile_filter_empty_query_has_no_predicates() {
        let query = Query::new("hostA");
        let filter = DocumentStoreBackend::compile_filter(&query);
        assert!(filter.is_empty());
    }

    #[test]
    fn file_type_round_trips_through_strings() {
        for ft in [FileType::Regular, FileType::Directory, FileType::Symlink, FileType::Other] {
            let s = DocumentStoreBackend::file_type_to_str(ft);
            assert_eq!(DocumentStoreBackend::file_type_from_str(s), ft);
        }
    }
}
