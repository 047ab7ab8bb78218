//! Lock manager / 锁管理器
//!
//! Collection locks are taken root to leaf: `Read` on every proper ancestor,
//! the requested mode on the target. Document locks come after the collection
//! lock of their container. Several subtrees are locked in [`XmldbUri`] order.
//! Guards release in reverse, so the wait-for graph has no cycle.
//!
//! 集合锁从根到叶获取：每个真祖先加 `Read`，目标加请求的模式。
//! 文档锁在其所属集合锁之后获取。多个子树按 [`XmldbUri`] 顺序加锁。
//! 守卫逆序释放，因此等待图不会成环。

use std::{sync::Arc, thread, time::Instant};

use hipstr::HipStr;
use log::warn;
use xdb_path::XmldbUri;

use crate::{
  Error, LockConf, LockMode, LockTable, LockType, ManagedLock, ManagedLocks, Result, RwLock,
  table::LogListener,
};

type Registry = papaya::HashMap<HipStr<'static>, Arc<RwLock>>;

/// Entries live while held or awaited; the last release drops them
/// 条目在被持有或等待时存在，最后一次释放时移除
pub struct LockManager {
  conf: LockConf,
  collections: Arc<Registry>,
  documents: Arc<Registry>,
  table: Arc<LockTable>,
}

/// True when `key` lies strictly below `prefix` / `key` 严格位于 `prefix` 之下
fn below(key: &str, prefix: &str) -> bool {
  key.len() > prefix.len() && key.starts_with(prefix) && key.as_bytes()[prefix.len()] == b'/'
}

impl LockManager {
  pub fn new(conf: LockConf) -> Self {
    let table = Arc::new(LockTable::new(conf.table));
    table.register(Arc::new(LogListener));
    Self {
      conf,
      collections: Arc::new(Registry::new()),
      documents: Arc::new(Registry::new()),
      table,
    }
  }

  #[inline]
  pub fn conf(&self) -> &LockConf {
    &self.conf
  }

  #[inline]
  pub fn table(&self) -> &Arc<LockTable> {
    &self.table
  }

  /// Live collection lock entries / 当前存在的集合锁条目数
  pub fn collection_entries(&self) -> usize {
    self.collections.len()
  }

  /// Live document lock entries / 当前存在的文档锁条目数
  pub fn document_entries(&self) -> usize {
    self.documents.len()
  }

  fn entry(map: &Registry, key: &HipStr<'static>, lock_type: LockType) -> Arc<RwLock> {
    let map = map.pin();
    loop {
      let lock =
        map.get_or_insert_with(key.clone(), || Arc::new(RwLock::new(key.clone(), lock_type)));
      if !lock.is_retired() {
        return lock.clone();
      }
      let _ = map.remove_if(key, |_, v| Arc::ptr_eq(v, lock));
    }
  }

  fn query(map: &Registry, key: &str, f: impl FnOnce(&RwLock) -> bool) -> bool {
    map.pin().get(key).is_some_and(|l| f(l))
  }

  /// Drop `lock` from `map` once nobody holds, awaits or references it
  /// 无人持有、等待或引用时将 `lock` 从 `map` 移除
  fn evict(map: &Registry, lock: &Arc<RwLock>) {
    if lock.retire() {
      let _ = map.pin().remove_if(lock.id(), |_, v| Arc::ptr_eq(v, lock));
    }
  }

  fn doc_key(collection: &XmldbUri, name: &str) -> Result<XmldbUri> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
      return Err(Error::Path(xdb_path::Error::InvalidSegment(HipStr::from(name))));
    }
    Ok(collection.append(name)?)
  }

  fn registry(&self, lock_type: LockType) -> &Arc<Registry> {
    match lock_type {
      LockType::Collection => &self.collections,
      LockType::Document => &self.documents,
    }
  }

  /// The guard records the acquiring thread, so dropping it elsewhere
  /// still releases the right hold.
  ///
  /// 守卫记录获取锁的线程，在其他线程 drop 时仍释放正确的持有。
  fn managed(&self, lock: Arc<RwLock>, mode: LockMode) -> ManagedLock {
    let table = self.table.clone();
    let map = self.registry(lock.lock_type()).clone();
    let owner = thread::current().id();
    let id = lock.id().clone();
    let lock_type = lock.lock_type();
    ManagedLock::new(id, lock_type, mode, move || {
      lock.release_for(owner, mode)?;
      table.released_by(lock.id(), lock.lock_type(), mode, owner);
      Self::evict(&map, &lock);
      Ok(())
    })
  }

  fn lock_one(
    &self,
    key: &HipStr<'static>,
    lock_type: LockType,
    mode: LockMode,
    deadline: Option<Instant>,
  ) -> Result<ManagedLock> {
    let map = self.registry(lock_type);
    self.table.attempt(key, lock_type, mode);
    loop {
      let lock = Self::entry(map, key, lock_type);
      match lock.acquire(mode, deadline) {
        Ok(()) => {
          self.table.acquired(key, lock_type, mode);
          return Ok(self.managed(lock, mode));
        }
        Err(Error::Retired(_)) => continue,
        Err(e) => {
          self.table.attempt_failed(key, lock_type, mode);
          Self::evict(map, &lock);
          warn!("{e}");
          return Err(e);
        }
      }
    }
  }

  /// Lock `uri` in `mode` with `Read` on each ancestor. The guard releases the
  /// whole chain leaf first. One deadline covers the whole walk; on failure
  /// every lock taken so far is released.
  ///
  /// 以 `mode` 锁定 `uri`，并对每个祖先加 `Read`。守卫从叶开始释放整条链。
  /// 整个过程共用一个截止时间；失败时已获取的锁全部释放。
  pub fn acquire_collection_lock(&self, uri: &XmldbUri, mode: LockMode) -> Result<ManagedLock> {
    let id = uri.as_hip().clone();
    if mode == LockMode::NoLock {
      return Ok(ManagedLock::not_locked(id, LockType::Collection));
    }
    let deadline = self.conf.deadline();
    let chain = uri.ancestors();
    let last = chain.len() - 1;
    let mut group = ManagedLocks::with_capacity(chain.len());
    for (i, u) in chain.iter().enumerate() {
      let m = if i == last { mode } else { LockMode::Read };
      group.push(self.lock_one(u.as_hip(), LockType::Collection, m, deadline)?);
    }
    Ok(ManagedLock::new(id, LockType::Collection, mode, move || {
      let mut group = group;
      group.release()
    }))
  }

  /// Lock several subtrees in global path order / 按全局路径顺序锁定多个子树
  pub fn acquire_collection_locks(
    &self,
    uris: &[XmldbUri],
    mode: LockMode,
  ) -> Result<ManagedLocks> {
    let mut sorted = uris.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut out = ManagedLocks::with_capacity(sorted.len());
    for u in &sorted {
      out.push(self.acquire_collection_lock(u, mode)?);
    }
    Ok(out)
  }

  fn check_container(&self, collection: &XmldbUri, name: &str) -> Result<()> {
    if self.holds_collection_lock(collection, LockMode::Read) {
      return Ok(());
    }
    Err(Error::ContainerNotLocked {
      collection: collection.as_hip().clone(),
      document: HipStr::from(name),
    })
  }

  /// Lock document `name` of `collection`. The calling thread must already hold
  /// at least `Read` on the collection.
  ///
  /// 锁定 `collection` 中的文档 `name`。调用线程必须已持有该集合的 `Read` 或更强的锁。
  pub fn acquire_document_lock(
    &self,
    collection: &XmldbUri,
    name: &str,
    mode: LockMode,
  ) -> Result<ManagedLock> {
    let key = Self::doc_key(collection, name)?;
    if mode == LockMode::NoLock {
      return Ok(ManagedLock::not_locked(key.as_hip().clone(), LockType::Document));
    }
    self.check_container(collection, name)?;
    self.lock_one(key.as_hip(), LockType::Document, mode, self.conf.deadline())
  }

  /// Like [`Self::acquire_document_lock`] without waiting, [`Error::Busy`] if taken
  /// 与 [`Self::acquire_document_lock`] 相同但不等待，被占用时返回 [`Error::Busy`]
  pub fn attempt_document_lock(
    &self,
    collection: &XmldbUri,
    name: &str,
    mode: LockMode,
  ) -> Result<ManagedLock> {
    let key = Self::doc_key(collection, name)?;
    if mode == LockMode::NoLock {
      return Ok(ManagedLock::not_locked(key.as_hip().clone(), LockType::Document));
    }
    self.check_container(collection, name)?;
    let id = key.as_hip();
    self.table.attempt(id, LockType::Document, mode);
    loop {
      let lock = Self::entry(&self.documents, id, LockType::Document);
      let err = match lock.try_acquire(mode) {
        Ok(true) => {
          self.table.acquired(id, LockType::Document, mode);
          return Ok(self.managed(lock, mode));
        }
        Err(Error::Retired(_)) => continue,
        Ok(false) => Error::Busy {
          id: id.clone(),
          lock_type: LockType::Document,
          mode,
        },
        Err(e) => e,
      };
      self.table.attempt_failed(id, LockType::Document, mode);
      Self::evict(&self.documents, &lock);
      return Err(err);
    }
  }

  /// Idempotent / 幂等
  #[inline]
  pub fn release_lock(&self, guard: &mut ManagedLock) -> Result<()> {
    guard.release()
  }

  pub fn is_collection_locked_for_read(&self, uri: &XmldbUri) -> bool {
    Self::query(&self.collections, uri.as_str(), RwLock::is_locked_for_read)
  }

  pub fn is_collection_locked_for_write(&self, uri: &XmldbUri) -> bool {
    Self::query(&self.collections, uri.as_str(), RwLock::is_locked_for_write)
  }

  pub fn is_collection_locked(&self, uri: &XmldbUri) -> bool {
    Self::query(&self.collections, uri.as_str(), RwLock::is_locked)
  }

  pub fn is_document_locked_for_read(&self, collection: &XmldbUri, name: &str) -> bool {
    Self::doc_key(collection, name)
      .is_ok_and(|k| Self::query(&self.documents, k.as_str(), RwLock::is_locked_for_read))
  }

  pub fn is_document_locked_for_write(&self, collection: &XmldbUri, name: &str) -> bool {
    Self::doc_key(collection, name)
      .is_ok_and(|k| Self::query(&self.documents, k.as_str(), RwLock::is_locked_for_write))
  }

  /// Whether the calling thread holds at least `mode` on `uri`
  /// 调用线程是否在 `uri` 上至少持有 `mode`
  pub fn holds_collection_lock(&self, uri: &XmldbUri, mode: LockMode) -> bool {
    if mode == LockMode::NoLock {
      return true;
    }
    Self::query(&self.collections, uri.as_str(), |l| l.is_held_by_current(mode))
  }

  pub fn holds_document_lock(&self, collection: &XmldbUri, name: &str, mode: LockMode) -> bool {
    if mode == LockMode::NoLock {
      return true;
    }
    Self::doc_key(collection, name)
      .is_ok_and(|k| Self::query(&self.documents, k.as_str(), |l| l.is_held_by_current(mode)))
  }

  /// Whether another thread holds a document lock anywhere below `subtree`
  /// 是否有其他线程持有 `subtree` 之下的文档锁
  pub fn has_foreign_document_locks(&self, subtree: &XmldbUri) -> bool {
    let prefix = subtree.as_str();
    self
      .documents
      .pin()
      .iter()
      .any(|(k, l)| below(k, prefix) && l.is_held_by_other())
  }

  /// Whether any thread, the caller included, holds a document lock below `subtree`
  /// 是否有任意线程（包括调用线程）持有 `subtree` 之下的文档锁
  pub fn has_document_locks(&self, subtree: &XmldbUri) -> bool {
    let prefix = subtree.as_str();
    self
      .documents
      .pin()
      .iter()
      .any(|(k, l)| below(k, prefix) && l.is_locked())
  }

  /// Diagnostic dump / 诊断输出
  pub fn state_string(&self) -> String {
    self.table.state_string()
  }
}

impl Default for LockManager {
  fn default() -> Self {
    Self::new(LockConf::default())
  }
}
