//! # xdb_coll - Collection tree for xdb / xdb 集合树
//!
//! Collections, their persisted metadata and the two phase document store,
//! guarded by the hierarchical locks of `xdb_lock`.
//! 集合及其持久化元数据与两阶段文档存储，由 `xdb_lock` 的层级锁保护。
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod coll;
pub mod conf;
pub mod db;
pub mod doc;
pub mod entry;
pub mod error;
pub mod perm;
pub mod store;
pub mod trigger;
pub mod txn;
pub mod vbyte;

pub use cache::CollectionCache;
pub use coll::{Collection, IndexInfo, UNKNOWN_COLLECTION_ID};
pub use conf::DbConf;
pub use db::{Broker, Db, LockedCollection};
pub use doc::{
  BINARY_MIME, Document, LockedDocument, ResourceKind, StoreOptions, Utf8Reader, XML_MIME,
  XmlReader,
};
pub use entry::CollectionEntry;
pub use error::{Error, Result};
pub use perm::{AceAccess, AceTarget, Permission, Subject};
pub use store::{CollectionStore, InternalAccess, MemStore, Stored};
pub use trigger::{Trigger, TriggerEvent, Triggers};
pub use txn::{Txn, TxnState};
pub use xdb_lock::{LockMode, ManagedLock};
pub use xdb_path::XmldbUri;

/// Epoch ms / 毫秒时间戳
pub(crate) fn now_ms() -> i64 {
  coarsetime::Clock::now_since_epoch().as_millis() as i64
}
