//! # xdb_lock - Hierarchical locking for xdb / xdb 层级锁
//!
//! Reentrant read / write locks keyed by collection path or document path,
//! acquired root to leaf and released through RAII guards.
//! 以集合路径或文档路径为键的可重入读写锁，从根到叶获取，通过 RAII 守卫释放。
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod conf;
pub mod error;
pub mod managed;
pub mod manager;
pub mod mode;
pub mod rw;
pub mod table;

pub use conf::LockConf;
pub use error::{Error, Result};
pub use managed::{ManagedLock, ManagedLocks, close_all};
pub use manager::LockManager;
pub use mode::{LockMode, LockType};
pub use rw::RwLock;
pub use table::{Hold, LockEvent, LockEventListener, LockEventType, LockTable, LogListener};
