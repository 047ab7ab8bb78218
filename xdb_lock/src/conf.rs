use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Lock manager config / 锁管理器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConf {
  /// Bound on one acquisition, None waits forever
  /// 单次获取的等待上限，None 表示一直等待
  pub timeout_ms: Option<u64>,
  /// Track holders for diagnostics / 跟踪持有者用于诊断
  pub table: bool,
}

impl Default for LockConf {
  fn default() -> Self {
    Self {
      timeout_ms: Some(DEFAULT_TIMEOUT_MS),
      table: true,
    }
  }
}

impl LockConf {
  #[inline]
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }

  /// Deadline of an acquisition starting now / 从现在开始计算的截止时间
  #[inline]
  pub fn deadline(&self) -> Option<Instant> {
    self.timeout().map(|t| Instant::now() + t)
  }
}
