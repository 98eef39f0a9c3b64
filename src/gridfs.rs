//! File Store
//!
//! Stores binary files as fixed-size chunks in two collections:
//!
//! ```text
//! <prefix>.files    { _id, filename, length, chunkSize, uploadDate }
//! <prefix>.chunks   { _id, files_id, n, data }
//! ```
//!
//! Storing a filename again adds a new version; reads return the most
//! recent one.

use crate::collection::Collection;
use crate::database::{Database, Deferred};
use crate::error::{Error, Result};
use crate::doc;
use crate::protocol::{binary, Bson, Document, DocumentExt, ObjectId};
use bson::DateTime;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::debug;

/// Collection prefix used by [`Database::gridfs`].
pub const DEFAULT_PREFIX: &str = "fs";

/// Chunk size for new files (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// A chunked file store bound to one database.
#[derive(Debug, Clone)]
pub struct FileStore {
    database: Arc<Database>,
    prefix: String,
    chunk_size: usize,
}

impl FileStore {
    pub fn new(database: Arc<Database>, prefix: impl Into<String>) -> Self {
        Self {
            database,
            prefix: prefix.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Uses `chunk_size` bytes per chunk for files stored from now on.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The `<prefix>.files` collection.
    pub fn files(&self) -> Collection {
        self.database.collection(&format!("{}.files", self.prefix))
    }

    /// The `<prefix>.chunks` collection.
    pub fn chunks(&self) -> Collection {
        self.database.collection(&format!("{}.chunks", self.prefix))
    }

    /// Stores `data` under `filename` and returns the new file's id.
    pub fn put(&self, filename: &str, data: Bytes) -> Result<Bson> {
        self.database.wait(self.put_async(filename, data))
    }

    pub fn put_with<F>(&self, filename: &str, data: Bytes, callback: F)
    where
        F: FnOnce(Result<Bson>) + Send + 'static,
    {
        self.database.notify(self.put_async(filename, data), callback)
    }

    pub fn put_async(&self, filename: &str, data: Bytes) -> Deferred<Bson> {
        let id = Bson::ObjectId(ObjectId::new());
        let chunks: Vec<Document> = (0..data.len())
            .step_by(self.chunk_size)
            .enumerate()
            .map(|(n, start)| {
                let end = (start + self.chunk_size).min(data.len());
                doc! {
                    "files_id": id.clone(),
                    "n": n as i64,
                    "data": binary(&data[start..end]),
                }
            })
            .collect();
        let entry = doc! {
            "_id": id.clone(),
            "filename": filename,
            "length": data.len() as i64,
            "chunkSize": self.chunk_size as i64,
            "uploadDate": DateTime::now(),
        };

        debug!(
            db = %self.database.name(),
            prefix = %self.prefix,
            filename,
            length = data.len(),
            chunks = chunks.len(),
            "Storing file"
        );

        // Chunks first, so a visible files entry always has its data.
        let chunk_collection = self.chunks();
        let files = self.files();
        Box::pin(async move {
            if !chunks.is_empty() {
                chunk_collection.insert_many_async(chunks).await?;
            }
            files.insert_one_async(entry).await?;
            Ok(id)
        })
    }

    /// The contents of the latest version of `filename`, if stored.
    pub fn get(&self, filename: &str) -> Result<Option<Bytes>> {
        self.database.wait(self.get_async(filename))
    }

    pub fn get_with<F>(&self, filename: &str, callback: F)
    where
        F: FnOnce(Result<Option<Bytes>>) + Send + 'static,
    {
        self.database.notify(self.get_async(filename), callback)
    }

    pub fn get_async(&self, filename: &str) -> Deferred<Option<Bytes>> {
        let versions = self
            .files()
            .find_async(doc! { "filename": filename }, 0, 0);
        let chunk_collection = self.chunks();
        let filename = filename.to_string();

        Box::pin(async move {
            let Some(entry) = versions.await?.pop() else {
                return Ok(None);
            };
            let id = entry
                .get("_id")
                .cloned()
                .ok_or_else(|| Error::UnexpectedReply(format!("file '{}' has no _id", filename)))?;
            let length = entry.get_integer("length").unwrap_or(0).max(0) as usize;

            let mut chunks = chunk_collection
                .find_async(doc! { "files_id": id }, 0, 0)
                .await?;
            chunks.sort_by_key(|chunk| chunk.get_integer("n").unwrap_or(i64::MAX));

            let mut contents = BytesMut::with_capacity(length);
            for chunk in &chunks {
                let data = chunk.get_bytes("data").ok_or_else(|| {
                    Error::UnexpectedReply(format!("chunk of '{}' holds no binary data", filename))
                })?;
                contents.extend_from_slice(data);
            }
            if contents.len() != length {
                return Err(Error::UnexpectedReply(format!(
                    "file '{}' is {} bytes, chunks hold {}",
                    filename,
                    length,
                    contents.len()
                )));
            }
            Ok(Some(contents.freeze()))
        })
    }

    /// Distinct stored filenames, in order of first upload.
    pub fn list(&self) -> Result<Vec<String>> {
        self.database.wait(self.list_async())
    }

    pub fn list_with<F>(&self, callback: F)
    where
        F: FnOnce(Result<Vec<String>>) + Send + 'static,
    {
        self.database.notify(self.list_async(), callback)
    }

    pub fn list_async(&self) -> Deferred<Vec<String>> {
        let entries = self.files().find_async(Document::new(), 0, 0);
        Box::pin(async move {
            let mut names: Vec<String> = Vec::new();
            for entry in entries.await? {
                if let Ok(name) = entry.get_str("filename") {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
            Ok(names)
        })
    }
}
