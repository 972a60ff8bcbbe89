//! The bucket index: summarizes a collection's contents for sync without
//! transmitting every document.
//!
//! Documents are partitioned into a fixed number of buckets by
//! `stable_hash_to_u32(id) mod BUCKET_COUNT`. Each non-empty bucket carries
//! a hash of its member document hashes; the root hash summarizes the
//! bucket hash map. Equal roots imply identical contents.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::hash::stable_hash_to_u32;

/// Fixed bucket count.
/// Must match on both sides of a sync (see `crate::sync`).
pub const BUCKET_COUNT: u32 = 256;

/// `{root, buckets}` as returned by `getHashes()` (§4.5, §6.4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hashes {
    pub root: String,
    pub buckets: BTreeMap<u32, String>,
}

/// Computes the bucket a document id is assigned to. Pure and stable
/// across runs and processes, which is what makes it safe to use for
/// property.
#[must_use]
pub fn bucket_of(id: &str) -> u32 {
    stable_hash_to_u32(id) % BUCKET_COUNT
}

/// In-memory bucket index: id → (bucket, content hash), bucket → member
/// hashes, and the derived bucket/root hashes.
#[derive(Debug, Default)]
pub struct BucketIndex {
    doc_buckets: BTreeMap<String, (u32, String)>,
    bucket_members: BTreeMap<u32, BTreeMap<String, String>>,
    bucket_hashes: BTreeMap<u32, String>,
    root: String,
}

impl BucketIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a document's content hash, recomputing its
    /// bucket hash and the root hash.
    pub fn upsert(&mut self, id: &str, content_hash: &str) {
        let bucket = bucket_of(id);
        self.doc_buckets
            .insert(id.to_string(), (bucket, content_hash.to_string()));
        self.bucket_members
            .entry(bucket)
            .or_default()
            .insert(id.to_string(), content_hash.to_string());
        self.recompute_bucket(bucket);
        self.recompute_root();
    }

    /// Removes a document from the index (used for hard deletion, which
    /// lifecycle leaves optional).
    pub fn remove(&mut self, id: &str) {
        if let Some((bucket, _)) = self.doc_buckets.remove(id) {
            if let Some(members) = self.bucket_members.get_mut(&bucket) {
                members.remove(id);
                if members.is_empty() {
                    self.bucket_members.remove(&bucket);
                    self.bucket_hashes.remove(&bucket);
                } else {
                    self.recompute_bucket(bucket);
                }
            }
            self.recompute_root();
        }
    }

    fn recompute_bucket(&mut self, bucket: u32) {
        let Some(members) = self.bucket_members.get(&bucket) else {
            self.bucket_hashes.remove(&bucket);
            return;
        };
        if members.is_empty() {
            self.bucket_hashes.remove(&bucket);
            return;
        }
        // Sorted-concatenation hash: order-independent because the
        // BTreeMap already yields hashes in sorted doc-id order, and the
        // set of hashes (not ids) is what determines the bucket hash.
        let mut sorted_hashes: Vec<&str> = members.values().map(String::as_str).collect();
        sorted_hashes.sort_unstable();
        let mut hasher = Sha256::new();
        for h in sorted_hashes {
            hasher.update(h.as_bytes());
            hasher.update(b"|");
        }
        self.bucket_hashes
            .insert(bucket, hex::encode(hasher.finalize()));
    }

    fn recompute_root(&mut self) {
        let mut hasher = Sha256::new();
        for (bucket, hash) in &self.bucket_hashes {
            hasher.update(bucket.to_be_bytes());
            hasher.update(hash.as_bytes());
            hasher.update(b"|");
        }
        self.root = hex::encode(hasher.finalize());
    }

    /// Current `{root, buckets}` snapshot.
    #[must_use]
    pub fn hashes(&self) -> Hashes {
        Hashes {
            root: self.root.clone(),
            buckets: self.bucket_hashes.clone(),
        }
    }

    /// All document ids currently assigned to any of `indexes`.
    #[must_use]
    pub fn ids_in_buckets(&self, indexes: &[u32]) -> Vec<String> {
        indexes
            .iter()
            .filter_map(|b| self.bucket_members.get(b))
            .flat_map(|members| members.keys().cloned())
            .collect()
    }

    #[must_use]
    pub fn content_hash_of(&self, id: &str) -> Option<&str> {
        self.doc_buckets.get(id).map(|(_, h)| h.as_str())
    }

    /// Every document id's content hash, for persisting a cold-start
    /// cache (`_index.json`).
    #[must_use]
    pub fn all_content_hashes(&self) -> BTreeMap<String, String> {
        self.doc_buckets
            .iter()
            .map(|(id, (_, hash))| (id.clone(), hash.clone()))
            .collect()
    }
}
