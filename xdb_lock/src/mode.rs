use serde::{Deserialize, Serialize};

/// Lock mode / 锁模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockMode {
  NoLock,
  /// Shared / 共享
  Read,
  /// Exclusive / 排他
  Write,
}

impl LockMode {
  /// True when holding `self` satisfies a request for `want`
  /// 持有 `self` 时是否满足 `want` 的请求
  #[inline]
  pub fn covers(self, want: LockMode) -> bool {
    self >= want
  }
}

/// What is being locked / 加锁对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockType {
  Collection,
  Document,
}
