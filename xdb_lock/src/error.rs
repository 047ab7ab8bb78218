use hipstr::HipStr;
use thiserror::Error;

use crate::{LockMode, LockType};

#[derive(Debug, Error)]
pub enum Error {
  #[error("lock timeout / 锁超时: {lock_type:?} {id} {mode:?} after {waited_ms}ms")]
  Timeout {
    id: HipStr<'static>,
    lock_type: LockType,
    mode: LockMode,
    waited_ms: u64,
  },

  #[error("lock busy / 锁被占用: {lock_type:?} {id} {mode:?}")]
  Busy {
    id: HipStr<'static>,
    lock_type: LockType,
    mode: LockMode,
  },

  #[error("read to write upgrade rejected / 拒绝读锁升级: {0}")]
  Upgrade(HipStr<'static>),

  #[error("lock not held / 未持有锁: {id} {mode:?}")]
  NotHeld { id: HipStr<'static>, mode: LockMode },

  #[error("collection {collection} must be locked before document {document}")]
  ContainerNotLocked {
    collection: HipStr<'static>,
    document: HipStr<'static>,
  },

  #[error("lock contention / 锁争用: {0}")]
  Contention(HipStr<'static>),

  /// Entry left its registry while being acquired, retried inside [`crate::LockManager`]
  /// 获取时条目已离开注册表，由 [`crate::LockManager`] 内部重试
  #[error("lock entry retired / 锁条目已回收: {0}")]
  Retired(HipStr<'static>),

  #[error("release failed / 释放失败: {0}")]
  Release(HipStr<'static>),

  #[error("path: {0}")]
  Path(#[from] xdb_path::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
