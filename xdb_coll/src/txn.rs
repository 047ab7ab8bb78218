//! Transaction handle / 事务句柄
//!
//! Groups mutations of one unit of work. Storage level undo belongs to the
//! store; this handle only tracks state so closed transactions are refused.
//! 将一次工作单元中的修改归组。存储层回滚由存储负责；此句柄只跟踪状态，拒绝已结束的事务。

use log::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
  Active,
  Committed,
  Aborted,
}

#[derive(Debug)]
pub struct Txn {
  id: u64,
  state: TxnState,
}

impl Txn {
  pub fn new(id: u64) -> Self {
    Self {
      id,
      state: TxnState::Active,
    }
  }

  #[inline]
  pub fn id(&self) -> u64 {
    self.id
  }

  #[inline]
  pub fn state(&self) -> TxnState {
    self.state
  }

  #[inline]
  pub fn is_active(&self) -> bool {
    self.state == TxnState::Active
  }

  /// Err unless active / 非活动状态时报错
  pub fn check(&self) -> Result<()> {
    if self.is_active() {
      return Ok(());
    }
    Err(Error::TxnClosed(self.id))
  }

  pub fn commit(&mut self) -> Result<()> {
    self.check()?;
    self.state = TxnState::Committed;
    debug!("txn {} committed", self.id);
    Ok(())
  }

  /// No-op once closed / 已结束时无操作
  pub fn abort(&mut self) {
    if self.is_active() {
      self.state = TxnState::Aborted;
      debug!("txn {} aborted", self.id);
    }
  }
}

impl Drop for Txn {
  fn drop(&mut self) {
    if self.is_active() {
      warn!("txn {} dropped while active, aborting", self.id);
      self.abort();
    }
  }
}
