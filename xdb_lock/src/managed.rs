//! Lock guards / 锁守卫
//!
//! [`ManagedLock`] holds one lock and releases it once, on [`ManagedLock::release`]
//! or on drop. [`ManagedLocks`] keeps guards in acquisition order and releases
//! them last to first.
//!
//! [`ManagedLock`] 持有一把锁，在 [`ManagedLock::release`] 或 drop 时只释放一次。
//! [`ManagedLocks`] 按获取顺序保存守卫，并从后往前释放。

use std::fmt;

use hipstr::HipStr;
use log::error;

use crate::{LockMode, LockType, Result};

type Closer = Box<dyn FnOnce() -> Result<()> + Send>;

/// One held lock / 单把已持有的锁
pub struct ManagedLock {
  id: HipStr<'static>,
  lock_type: LockType,
  mode: LockMode,
  closer: Option<Closer>,
}

impl ManagedLock {
  pub fn new(
    id: impl Into<HipStr<'static>>,
    lock_type: LockType,
    mode: LockMode,
    closer: impl FnOnce() -> Result<()> + Send + 'static,
  ) -> Self {
    Self {
      id: id.into(),
      lock_type,
      mode,
      closer: Some(Box::new(closer)),
    }
  }

  /// Guard for a `NoLock` request, release does nothing
  /// `NoLock` 请求的守卫，释放时无操作
  pub fn not_locked(id: impl Into<HipStr<'static>>, lock_type: LockType) -> Self {
    Self {
      id: id.into(),
      lock_type,
      mode: LockMode::NoLock,
      closer: None,
    }
  }

  #[inline]
  pub fn id(&self) -> &HipStr<'static> {
    &self.id
  }

  #[inline]
  pub fn lock_type(&self) -> LockType {
    self.lock_type
  }

  #[inline]
  pub fn mode(&self) -> LockMode {
    self.mode
  }

  #[inline]
  pub fn is_released(&self) -> bool {
    self.closer.is_none()
  }

  /// Release once; later calls are no-ops
  /// 只释放一次，之后的调用无操作
  pub fn release(&mut self) -> Result<()> {
    match self.closer.take() {
      Some(close) => close(),
      None => Ok(()),
    }
  }
}

impl Drop for ManagedLock {
  fn drop(&mut self) {
    if let Err(e) = self.release() {
      error!("release {:?} {} {:?}: {e}", self.lock_type, self.id, self.mode);
    }
  }
}

impl fmt::Debug for ManagedLock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedLock")
      .field("id", &self.id.as_str())
      .field("lock_type", &self.lock_type)
      .field("mode", &self.mode)
      .field("released", &self.is_released())
      .finish()
  }
}

/// Release `locks` last to first. Every guard is attempted, each fault is
/// logged and the first one is returned.
///
/// 从后往前释放 `locks`。每个守卫都会尝试释放，每个错误都记录日志，返回第一个错误。
pub fn close_all(locks: &mut [ManagedLock]) -> Result<()> {
  let mut first = None;
  for lock in locks.iter_mut().rev() {
    if let Err(e) = lock.release() {
      error!("release {:?} {} {:?}: {e}", lock.lock_type, lock.id, lock.mode);
      if first.is_none() {
        first = Some(e);
      }
    }
  }
  match first {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

/// Guards of one logical operation, in acquisition order
/// 一次逻辑操作中获取的守卫，按获取顺序排列
#[derive(Debug, Default)]
pub struct ManagedLocks {
  locks: Vec<ManagedLock>,
}

impl ManagedLocks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(n: usize) -> Self {
    Self {
      locks: Vec::with_capacity(n),
    }
  }

  pub fn push(&mut self, lock: ManagedLock) {
    self.locks.push(lock);
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.locks.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.locks.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ManagedLock> {
    self.locks.iter()
  }

  pub fn release(&mut self) -> Result<()> {
    close_all(&mut self.locks)
  }
}

impl From<Vec<ManagedLock>> for ManagedLocks {
  fn from(locks: Vec<ManagedLock>) -> Self {
    Self { locks }
  }
}

impl Drop for ManagedLocks {
  fn drop(&mut self) {
    // faults were logged by close_all
    let _ = self.release();
  }
}
