use hipstr::HipStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("lock: {0}")]
  Lock(#[from] xdb_lock::Error),

  #[error("path: {0}")]
  Path(#[from] xdb_path::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("permission denied / 权限不足: {0}")]
  PermissionDenied(HipStr<'static>),

  #[error("trigger / 触发器: {0}")]
  Trigger(HipStr<'static>),

  #[error("transaction {0} is not active / 事务已结束")]
  TxnClosed(u64),

  #[error("not found / 不存在: {0}")]
  NotFound(HipStr<'static>),

  #[error("already exists / 已存在: {0}")]
  Exists(HipStr<'static>),

  #[error("invalid / 无效: {0}")]
  Invalid(HipStr<'static>),

  #[error("corrupt metadata / 元数据损坏: {0}")]
  Codec(&'static str),

  #[error("database is shut down / 数据库已关闭")]
  Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
