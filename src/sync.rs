//! The sync client: pull/push reconciliation against a remote peer
//! speaking an HTTP-shaped, hash-bucket-diff wire protocol.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::blob::BlobAdapter;
use crate::bucket::{Hashes, BUCKET_COUNT};
use crate::crdt::CrdtDocument;
use crate::error::{StoreError, SyncError};
use crate::hlc::TimeSource;
use crate::store::Store;
use crate::validator::Validator;

/// Per-cycle sync tuning. Only `timeout` is read by [`SyncClient`] itself
/// (applied to its `reqwest::Client`); `max_concurrent_syncs` and
/// `heartbeat` are surface for a caller orchestrating multiple
/// `SyncClient`s (how many to run at once, how often to schedule a
/// reconcile) rather than something this single-peer client enforces on
/// its own.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    pub timeout: Duration,
    pub max_concurrent_syncs: usize,
    pub heartbeat: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrent_syncs: 4,
            heartbeat: Some(Duration::from_secs(60)),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }
}

/// Backoff policy an external retry loop can use after a `SyncFailed`
/// error. Not consulted by this client directly.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// Result of a single `pull`/`push`/`reconcile` call: which buckets
/// differed and whether any network call was actually made, useful for
/// asserting the short-circuit property in tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub changed_buckets: Vec<u32>,
    pub short_circuited: bool,
}

#[derive(Serialize, Deserialize)]
struct HashesWire {
    root: String,
    buckets: BTreeMap<String, String>,
}

impl From<&Hashes> for HashesWire {
    fn from(hashes: &Hashes) -> Self {
        Self {
            root: hashes.root.clone(),
            buckets: hashes
                .buckets
                .iter()
                .map(|(index, hash)| (index.to_string(), hash.clone()))
                .collect(),
        }
    }
}

impl HashesWire {
    fn into_indexed(self) -> Result<(String, BTreeMap<u32, String>), SyncError> {
        let mut buckets = BTreeMap::new();
        for (key, hash) in self.buckets {
            let index: u32 = key
                .parse()
                .map_err(|_| SyncError::ProtocolMismatch(format!("non-numeric bucket index: {key}")))?;
            if index >= BUCKET_COUNT {
                return Err(SyncError::ProtocolMismatch(format!(
                    "bucket index {index} out of range for bucket count {BUCKET_COUNT}"
                )));
            }
            buckets.insert(index, hash);
        }
        Ok((self.root, buckets))
    }
}

/// Fetches a remote peer's `{collection}/hashes` and diffs them against a
/// local `Hashes` snapshot, returning the sorted set of bucket indexes
/// that differ (§4.7 step 4: missing on either side counts as a diff).
fn diff_buckets(local: &Hashes, remote_buckets: &BTreeMap<u32, String>) -> Vec<u32> {
    let mut changed: Vec<u32> = Vec::new();
    for (bucket, local_hash) in &local.buckets {
        if remote_buckets.get(bucket) != Some(local_hash) {
            changed.push(*bucket);
        }
    }
    for bucket in remote_buckets.keys() {
        if !local.buckets.contains_key(bucket) && !changed.contains(bucket) {
            changed.push(*bucket);
        }
    }
    changed.sort_unstable();
    changed
}

/// Joins `segments` onto `base`, treating `base`'s path as a directory
/// (appending a trailing slash first if it doesn't have one) so the join
/// always appends rather than replacing the last path segment the way
/// `Url::join`'s RFC 3986 relative-resolution normally would. `base`'s
/// query string (e.g. an auth token some peers route on) is preserved,
/// since a path-only relative reference does not carry it over on its own.
fn join_url(base: &Url, segments: &str) -> Result<Url, SyncError> {
    let mut with_dir = base.clone();
    if !with_dir.path().ends_with('/') {
        let path = format!("{}/", with_dir.path());
        with_dir.set_path(&path);
    }
    let mut joined = with_dir
        .join(segments)
        .map_err(|err| SyncError::InvalidUrl(err.to_string()))?;
    if joined.query().is_none() {
        joined.set_query(base.query());
    }
    Ok(joined)
}

/// Talks HTTP to a single remote peer on behalf of one collection's
/// [`Store`]. One `SyncClient` per (store, peer) pair.
pub struct SyncClient<B: BlobAdapter, V: Validator, T: TimeSource> {
    hashes_url: Url,
    docs_url: Url,
    http: reqwest::Client,
    config: SyncConfig,
    store: std::sync::Arc<Store<B, V, T>>,
}

impl<B: BlobAdapter, V: Validator, T: TimeSource> SyncClient<B, V, T> {
    /// Builds a client for `store` against `base_url`. Fails if `base_url`
    /// doesn't parse as a URL.
    pub fn new(
        base_url: impl AsRef<str>,
        store: std::sync::Arc<Store<B, V, T>>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let base = Url::parse(base_url.as_ref()).map_err(|err| SyncError::InvalidUrl(err.to_string()))?;
        let collection = store.collection();
        let hashes_url = join_url(&base, &format!("{collection}/hashes"))?;
        let docs_url = join_url(&base, collection)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            hashes_url,
            docs_url,
            http,
            config,
            store,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn fetch_remote_hashes(&self) -> Result<(String, BTreeMap<u32, String>), SyncError> {
        let response = self
            .http
            .get(self.hashes_url.clone())
            .send()
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::SyncFailed { status, message });
        }

        let wire: HashesWire = response
            .json()
            .await
            .map_err(|err| SyncError::ProtocolMismatch(err.to_string()))?;
        wire.into_indexed()
    }

    async fn fetch_remote_docs(&self, buckets: &[u32]) -> Result<HashMap<String, CrdtDocument>, SyncError> {
        let csv = buckets
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .http
            .get(self.docs_url.clone())
            .query(&[("buckets", csv)])
            .send()
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::SyncFailed { status, message });
        }

        response
            .json()
            .await
            .map_err(|err| SyncError::ProtocolMismatch(err.to_string()))
    }

    async fn push_docs(&self, docs: &HashMap<String, CrdtDocument>) -> Result<(), SyncError> {
        let response = self
            .http
            .post(self.docs_url.clone())
            .json::<HashMap<String, CrdtDocument>>(docs)
            .send()
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::SyncFailed { status, message });
        }
        Ok(())
    }

    /// Fetches changed remote documents and merges them locally. Issues
    /// exactly one HTTP call (the hashes fetch) when roots already match.
    pub async fn pull(&self) -> Result<SyncOutcome, SyncError> {
        let (remote_root, remote_buckets) = self.fetch_remote_hashes().await?;
        let local = self.store.get_hashes().await;

        if local.root == remote_root {
            return Ok(SyncOutcome {
                changed_buckets: Vec::new(),
                short_circuited: true,
            });
        }

        let changed = diff_buckets(&local, &remote_buckets);
        if changed.is_empty() {
            return Ok(SyncOutcome {
                changed_buckets: Vec::new(),
                short_circuited: false,
            });
        }

        let remote_docs = self.fetch_remote_docs(&changed).await?;
        let report = self.store.merge_data(remote_docs).await;
        if !report.errors.is_empty() {
            let (id, err) = &report.errors[0];
            return Err(SyncError::Store(StoreError::OperationFailed {
                message: format!("merging {id} during pull: {err}"),
            }));
        }

        Ok(SyncOutcome {
            changed_buckets: changed,
            short_circuited: false,
        })
    }

    /// Mirror of [`pull`](Self::pull): sends locally-changed buckets to
    /// the remote peer instead of merging them in.
    pub async fn push(&self) -> Result<SyncOutcome, SyncError> {
        let (remote_root, remote_buckets) = self.fetch_remote_hashes().await?;
        let local = self.store.get_hashes().await;

        if local.root == remote_root {
            return Ok(SyncOutcome {
                changed_buckets: Vec::new(),
                short_circuited: true,
            });
        }

        let changed = diff_buckets(&local, &remote_buckets);
        if changed.is_empty() {
            return Ok(SyncOutcome {
                changed_buckets: Vec::new(),
                short_circuited: false,
            });
        }

        let local_docs = self
            .store
            .get_buckets(&changed)
            .await
            .map_err(SyncError::Store)?;
        self.push_docs(&local_docs).await?;

        Ok(SyncOutcome {
            changed_buckets: changed,
            short_circuited: false,
        })
    }

    /// `pull()` then `push()`. CRDT merge is commutative, so the order
    /// doesn't affect the converged result, only which peer learns about
    /// the other's changes first.
    pub async fn reconcile(&self) -> Result<(SyncOutcome, SyncOutcome), SyncError> {
        let pulled = self.pull().await?;
        let pushed = self.push().await?;
        Ok((pulled, pushed))
    }
}

/// Parses a `GET /{collection}?buckets=i1,i2,...` query string's `buckets`
/// parameter into bucket indexes, as a server implementation built on top
/// of [`Store`] would need to. Exposed here since this crate doesn't ship
/// a server, only the client and the shapes it speaks.
pub fn parse_bucket_query(csv: &str) -> Result<Vec<u32>, SyncError> {
    csv.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| SyncError::ProtocolMismatch(format!("non-numeric bucket index: {s}")))
        })
        .collect()
}

/// Renders a [`Hashes`] snapshot as the `GET /{collection}/hashes`
/// response body.
#[must_use]
pub fn hashes_to_json(hashes: &Hashes) -> Value {
    serde_json::to_value(HashesWire::from(hashes)).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_buckets_is_empty_when_all_present_hashes_match() {
        let local = Hashes {
            root: "r".to_string(),
            buckets: BTreeMap::from([(1, "a".to_string()), (2, "b".to_string())]),
        };
        let remote = BTreeMap::from([(1, "a".to_string()), (2, "b".to_string())]);
        assert!(diff_buckets(&local, &remote).is_empty());
    }

    #[test]
    fn diff_buckets_flags_mismatches_in_both_directions() {
        let local = Hashes {
            root: "r".to_string(),
            buckets: BTreeMap::from([(1, "a".to_string())]),
        };
        let remote = BTreeMap::from([(1, "different".to_string()), (2, "only-remote".to_string())]);
        let changed = diff_buckets(&local, &remote);
        assert_eq!(changed, vec![1, 2]);
    }

    #[test]
    fn hashes_wire_round_trips_bucket_indexes_as_decimal_strings() {
        let hashes = Hashes {
            root: "root-hash".to_string(),
            buckets: BTreeMap::from([(7, "seven".to_string())]),
        };
        let wire = HashesWire::from(&hashes);
        assert_eq!(wire.buckets.get("7"), Some(&"seven".to_string()));

        let (root, buckets) = wire.into_indexed().unwrap();
        assert_eq!(root, "root-hash");
        assert_eq!(buckets.get(&7), Some(&"seven".to_string()));
    }

    #[test]
    fn bucket_index_out_of_range_is_a_protocol_mismatch() {
        let wire = HashesWire {
            root: "r".to_string(),
            buckets: BTreeMap::from([(BUCKET_COUNT.to_string(), "x".to_string())]),
        };
        assert!(matches!(wire.into_indexed(), Err(SyncError::ProtocolMismatch(_))));
    }

    #[test]
    fn parse_bucket_query_parses_csv() {
        assert_eq!(parse_bucket_query("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_bucket_query("").unwrap(), Vec::<u32>::new());
        assert!(parse_bucket_query("1,x").is_err());
    }

    #[test]
    fn sync_config_builders_adjust_fields() {
        let config = SyncConfig::default()
            .with_timeout(Duration::from_secs(5))
            .without_heartbeat();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat, None);
    }

    #[test]
    fn join_url_appends_rather_than_replacing_last_segment() {
        let base = Url::parse("http://peer.example/api").unwrap();
        let joined = claims::assert_ok!(join_url(&base, "docs/hashes"));
        assert_eq!(joined.as_str(), "http://peer.example/api/docs/hashes");
    }

    #[test]
    fn join_url_preserves_the_base_query_string() {
        let base = Url::parse("http://peer.example/api?token=secret").unwrap();
        let joined = claims::assert_ok!(join_url(&base, "docs/hashes"));
        assert_eq!(joined.path(), "/api/docs/hashes");
        assert_eq!(joined.query(), Some("token=secret"));
    }

    #[test]
    fn join_url_rejects_an_unparseable_base() {
        let bogus = "not a url";
        claims::assert_err!(Url::parse(bogus));
    }
}

