//! `driftstore`: a local-first, CRDT-backed document store with
//! field-level last-writer-wins merge, a pluggable blob storage backend,
//! and a hash-bucket sync protocol for reconciling two replicas without
//! transmitting documents that already match.
//!
//! The pieces, leaf to root:
//!
//! - [`hlc`] — the Hybrid Logical Clock used to timestamp every field write.
//! - [`hash`] — canonical JSON serialization and the content hash it feeds.
//! - [`crdt`] — the per-field LWW document representation and merge.
//! - [`bucket`] — the bucket/root hash index used to summarize a collection.
//! - [`blob`] — the storage backend contract plus in-memory/filesystem
//!   reference implementations.
//! - [`validator`] — the external schema validation seam.
//! - [`listener`] — mutation notification.
//! - [`store`] — the engine tying the above into CRUD + sync hashes.
//! - [`sync`] — the client-driven reconciliation protocol.
//! - [`error`] — the error taxonomy shared across all of the above.

pub mod blob;
pub mod bucket;
pub mod crdt;
pub mod error;
pub mod hash;
pub mod hlc;
pub mod listener;
pub mod store;
pub mod sync;
pub mod validator;

pub use blob::{BlobAdapter, FilesystemBlobAdapter, MemoryBlobAdapter};
pub use bucket::{BucketIndex, Hashes, BUCKET_COUNT};
pub use crdt::CrdtDocument;
pub use error::{BlobError, StoreError, SyncError};
pub use hlc::{Clock, Hlc, SystemTimeSource, TimeSource};
pub use listener::{Listener, ListenerRegistry, MutationKind};
pub use store::{generate_id, MergeReport, Predicate, Store, UpdateManyReport};
pub use sync::{RetryConfig, SyncClient, SyncConfig, SyncOutcome};
pub use validator::{NoopValidator, ValidationError, Validator};
