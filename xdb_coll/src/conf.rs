use serde::{Deserialize, Serialize};
use xdb_lock::LockConf;

pub const DEFAULT_ROOT: &str = "/db";
pub const DEFAULT_CACHE_SIZE: usize = 64;
pub const DEFAULT_COLLECTION_MODE: u16 = 0o755;
pub const DEFAULT_RESOURCE_MODE: u16 = 0o644;

/// Database config / 数据库配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConf {
  /// Root collection, one segment / 根集合，单段路径
  pub root: String,
  /// Loaded collections kept in memory / 内存中保留的已加载集合数
  pub cache_size: usize,
  pub lock: LockConf,
  /// Mode of new collections / 新集合的权限
  pub collection_mode: u16,
  /// Mode of new resources / 新资源的权限
  pub resource_mode: u16,
}

impl Default for DbConf {
  fn default() -> Self {
    Self {
      root: DEFAULT_ROOT.into(),
      cache_size: DEFAULT_CACHE_SIZE,
      lock: LockConf::default(),
      collection_mode: DEFAULT_COLLECTION_MODE,
      resource_mode: DEFAULT_RESOURCE_MODE,
    }
  }
}
