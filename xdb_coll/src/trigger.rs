//! Triggers / 触发器
//!
//! `prepare` runs before a mutation and may veto it. `finish` runs after the
//! mutation is visible; its faults are logged because the change already happened.
//! `prepare` 在修改前运行，可以否决。`finish` 在修改可见后运行，错误只记录日志。

use std::sync::Arc;

use log::error;
use parking_lot::RwLock;
use xdb_path::XmldbUri;

use crate::{Result, Txn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
  CreateCollection,
  UpdateCollection,
  CopyCollection,
  MoveCollection,
  DeleteCollection,
  CreateDocument,
  UpdateDocument,
  CopyDocument,
  MoveDocument,
  DeleteDocument,
}

impl TriggerEvent {
  pub fn is_collection(self) -> bool {
    matches!(
      self,
      Self::CreateCollection
        | Self::UpdateCollection
        | Self::CopyCollection
        | Self::MoveCollection
        | Self::DeleteCollection
    )
  }
}

pub trait Trigger: Send + Sync {
  /// Err vetoes the operation / 返回错误即否决操作
  fn prepare(&self, _txn: &Txn, _event: TriggerEvent, _uri: &XmldbUri) -> Result<()> {
    Ok(())
  }

  fn finish(&self, _txn: &Txn, _event: TriggerEvent, _uri: &XmldbUri) -> Result<()> {
    Ok(())
  }
}

#[derive(Default)]
pub struct Triggers(RwLock<Vec<Arc<dyn Trigger>>>);

impl Triggers {
  pub fn register(&self, trigger: Arc<dyn Trigger>) {
    self.0.write().push(trigger);
  }

  pub fn clear(&self) {
    self.0.write().clear();
  }

  fn snapshot(&self) -> Vec<Arc<dyn Trigger>> {
    self.0.read().clone()
  }

  /// First veto wins / 第一个否决生效
  pub fn prepare(&self, txn: &Txn, event: TriggerEvent, uri: &XmldbUri) -> Result<()> {
    for t in self.snapshot() {
      t.prepare(txn, event, uri)?;
    }
    Ok(())
  }

  pub fn finish(&self, txn: &Txn, event: TriggerEvent, uri: &XmldbUri) {
    for t in self.snapshot() {
      if let Err(e) = t.finish(txn, event, uri) {
        error!("finish trigger {event:?} {uri}: {e}");
      }
    }
  }
}
