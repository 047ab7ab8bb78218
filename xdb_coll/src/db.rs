//! Database handle and broker / 数据库句柄与代理
//!
//! [`Db`] owns the shared services: lock manager, store, cache and triggers.
//! [`Broker`] binds them to one acting subject and carries the tree level
//! operations that span several collections.
//! [`Db`] 持有共享服务：锁管理器、存储、缓存与触发器。[`Broker`] 将其绑定到一个操作主体，
//! 并承载跨越多个集合的树级操作。

use std::{
  ops::Deref,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use bytes::Bytes;
use hipstr::HipStr;
use log::{info, warn};
use xdb_lock::{LockManager, LockMode, ManagedLock, ManagedLocks};
use xdb_path::XmldbUri;

use crate::{
  Collection, CollectionCache, CollectionStore, DbConf, Document, Error, Permission, Result,
  Subject, Triggers, Txn, UNKNOWN_COLLECTION_ID, perm::WRITE, trigger::TriggerEvent,
};

pub struct Db {
  conf: DbConf,
  root: XmldbUri,
  locks: Arc<LockManager>,
  store: Arc<dyn CollectionStore>,
  cache: CollectionCache,
  triggers: Triggers,
  next_txn: AtomicU64,
  open: AtomicBool,
}

impl Db {
  /// Open over `store`, creating the root collection when missing
  /// 基于 `store` 打开，根集合不存在时创建
  pub fn open(conf: DbConf, store: Arc<dyn CollectionStore>) -> Result<Arc<Self>> {
    let root = XmldbUri::new(&conf.root)?;
    if !root.is_root() {
      return Err(Error::Invalid(HipStr::from(format!(
        "root must be one segment: {root}"
      ))));
    }
    let db = Arc::new(Self {
      locks: Arc::new(LockManager::new(conf.lock.clone())),
      cache: CollectionCache::new(conf.cache_size),
      triggers: Triggers::default(),
      next_txn: AtomicU64::new(1),
      open: AtomicBool::new(true),
      root,
      store,
      conf,
    });

    let _lock = db.locks.acquire_collection_lock(&db.root, LockMode::Write)?;
    if db.store.load_collection(&db.root)?.is_none() {
      let coll = Collection::new(
        db.locks.clone(),
        db.root.clone(),
        Permission::owned_by(&Subject::system(), db.conf.collection_mode),
        crate::now_ms(),
      );
      let mut txn = Txn::new(0);
      coll.assign_id(db.store.next_collection_id()?);
      db.store
        .save_collection(&txn, &db.root, coll.id(), coll.to_bytes())?;
      txn.commit()?;
      info!("created root collection {}", db.root);
    }
    Ok(db)
  }

  /// Refuse new work and drop cached collections
  /// 拒绝新的操作并清空缓存的集合
  pub fn shutdown(&self) {
    if !self.open.swap(false, Ordering::AcqRel) {
      return;
    }
    let held = self.locks.table().held_count();
    if held > 0 {
      warn!("shutdown with {held} locks held\n{}", self.locks.state_string());
    }
    self.cache.clear();
    info!("db {} shut down", self.root);
  }

  #[inline]
  pub fn is_open(&self) -> bool {
    self.open.load(Ordering::Acquire)
  }

  pub fn check_open(&self) -> Result<()> {
    if self.is_open() {
      return Ok(());
    }
    Err(Error::Closed)
  }

  pub fn broker(self: &Arc<Self>, subject: Subject) -> Broker {
    Broker {
      db: self.clone(),
      subject,
    }
  }

  #[inline]
  pub fn conf(&self) -> &DbConf {
    &self.conf
  }

  #[inline]
  pub fn root_uri(&self) -> &XmldbUri {
    &self.root
  }

  #[inline]
  pub fn locks(&self) -> &Arc<LockManager> {
    &self.locks
  }

  #[inline]
  pub fn store(&self) -> &Arc<dyn CollectionStore> {
    &self.store
  }

  #[inline]
  pub fn cache(&self) -> &CollectionCache {
    &self.cache
  }

  #[inline]
  pub fn triggers(&self) -> &Triggers {
    &self.triggers
  }
}

/// Collection with a lock held on it / 持有锁的集合
pub struct LockedCollection {
  coll: Arc<Collection>,
  lock: ManagedLock,
}

impl LockedCollection {
  #[inline]
  pub fn collection(&self) -> &Arc<Collection> {
    &self.coll
  }

  #[inline]
  pub fn lock(&self) -> &ManagedLock {
    &self.lock
  }

  /// Idempotent / 幂等
  pub fn release(&mut self) -> Result<()> {
    Ok(self.lock.release()?)
  }
}

impl Deref for LockedCollection {
  type Target = Arc<Collection>;

  fn deref(&self) -> &Arc<Collection> {
    &self.coll
  }
}

impl std::fmt::Debug for LockedCollection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LockedCollection")
      .field("coll", &self.coll)
      .field("lock", &self.lock)
      .finish()
  }
}

pub struct Broker {
  db: Arc<Db>,
  subject: Subject,
}

impl Broker {
  #[inline]
  pub fn subject(&self) -> &Subject {
    &self.subject
  }

  #[inline]
  pub fn db(&self) -> &Arc<Db> {
    &self.db
  }

  pub fn begin(&self) -> Result<Txn> {
    self.db.check_open()?;
    Ok(Txn::new(self.db.next_txn.fetch_add(1, Ordering::Relaxed)))
  }

  /// Cached or loaded from the store, no lock taken
  /// 从缓存或存储加载，不加锁
  pub(crate) fn load(&self, uri: &XmldbUri) -> Result<Option<Arc<Collection>>> {
    if let Some(c) = self.db.cache.get(uri) {
      return Ok(Some(c));
    }
    let Some(stored) = self.db.store.load_collection(uri)? else {
      return Ok(None);
    };
    let mut coll = Collection::deserialize(self.db.locks.clone(), uri.clone(), &stored)?;
    self
      .db
      .store
      .load_documents(uri, &mut coll.internal_access())?;
    Ok(Some(self.db.cache.get_or_insert(Arc::new(coll))))
  }

  fn exists(&self, uri: &XmldbUri) -> Result<bool> {
    Ok(self.db.cache.contains(uri) || self.db.store.load_collection(uri)?.is_some())
  }

  fn in_tree(&self, uri: &XmldbUri) -> Result<()> {
    if uri.starts_with(&self.db.root) {
      return Ok(());
    }
    Err(Error::Invalid(HipStr::from(format!(
      "{uri} is outside {}",
      self.db.root
    ))))
  }

  fn must_load(&self, uri: &XmldbUri) -> Result<Arc<Collection>> {
    self
      .load(uri)?
      .ok_or_else(|| Error::NotFound(uri.as_hip().clone()))
  }

  /// Lock `uri` in `mode` and return it, None when absent
  /// 以 `mode` 锁定 `uri` 并返回，不存在时返回 None
  pub fn open_collection(
    &self,
    uri: &XmldbUri,
    mode: LockMode,
  ) -> Result<Option<LockedCollection>> {
    self.db.check_open()?;
    let lock = self.db.locks.acquire_collection_lock(uri, mode)?;
    Ok(self.load(uri)?.map(|coll| LockedCollection { coll, lock }))
  }

  /// Return `uri` write locked, creating missing collections on the way.
  /// Ancestors are write locked only while children are linked.
  ///
  /// 返回写锁定的 `uri`，沿途创建缺失的集合。祖先只在链接子集合期间持有写锁。
  pub fn get_or_create_collection(&self, txn: &Txn, uri: &XmldbUri) -> Result<LockedCollection> {
    self.db.check_open()?;
    txn.check()?;
    self.in_tree(uri)?;
    let chain = uri.ancestors();
    let mut i = chain.len() - 1;
    while i > 0 && !self.exists(&chain[i])? {
      i -= 1;
    }

    let mut lock = self.db.locks.acquire_collection_lock(&chain[i], LockMode::Write)?;
    let mut coll = self.must_load(&chain[i])?;
    let mut held = ManagedLocks::with_capacity(chain.len() - i);
    for child_uri in &chain[i + 1..] {
      let child_lock = self.db.locks.acquire_collection_lock(child_uri, LockMode::Write)?;
      let child = match self.load(child_uri)? {
        Some(c) => c,
        None => self.create_child(txn, &coll, child_uri)?,
      };
      held.push(std::mem::replace(&mut lock, child_lock));
      coll = child;
    }
    held.release()?;
    Ok(LockedCollection { coll, lock })
  }

  fn create_child(
    &self,
    txn: &Txn,
    parent: &Collection,
    uri: &XmldbUri,
  ) -> Result<Arc<Collection>> {
    parent.check_perm(self, WRITE)?;
    let triggers = &self.db.triggers;
    triggers.prepare(txn, TriggerEvent::CreateCollection, uri)?;

    let child = Collection::new(
      self.db.locks.clone(),
      uri.clone(),
      Permission::owned_by(&self.subject, self.db.conf.collection_mode),
      crate::now_ms(),
    );
    self.save_collection(txn, &child)?;
    let linked = parent
      .add_collection(self, &child)
      .and_then(|_| self.save_collection(txn, parent));
    if let Err(e) = linked {
      parent.unlink_child(uri.name());
      if let Err(e) = self.db.store.reclaim_collection(txn, uri) {
        warn!("reclaim {uri}: {e}");
      }
      return Err(e);
    }
    let child = self.db.cache.get_or_insert(Arc::new(child));
    triggers.finish(txn, TriggerEvent::CreateCollection, uri);
    Ok(child)
  }

  /// Persist `coll`, assigning its id on first save. Needs the write lock.
  /// 持久化 `coll`，首次保存时分配 id。需要写锁。
  pub fn save_collection(&self, txn: &Txn, coll: &Collection) -> Result<()> {
    txn.check()?;
    let uri = coll.ensure(LockMode::Write)?;
    if coll.id() == UNKNOWN_COLLECTION_ID {
      coll.assign_id(self.db.store.next_collection_id()?);
    }
    self
      .db
      .store
      .save_collection(txn, &uri, coll.id(), coll.to_bytes())
  }

  /// Delete `uri` and its subtree / 删除 `uri` 及其子树
  pub fn remove_collection(&self, txn: &Txn, uri: &XmldbUri) -> Result<()> {
    self.db.check_open()?;
    txn.check()?;
    self.in_tree(uri)?;
    let Some(parent_uri) = uri.parent() else {
      return Err(Error::Invalid(HipStr::from(format!("cannot remove root {uri}"))));
    };
    let _locks = self
      .db
      .locks
      .acquire_collection_locks(&[parent_uri.clone(), uri.clone()], LockMode::Write)?;
    let parent = self.must_load(&parent_uri)?;
    if !self.exists(uri)? {
      return Err(Error::NotFound(uri.as_hip().clone()));
    }
    let triggers = &self.db.triggers;
    triggers.prepare(txn, TriggerEvent::DeleteCollection, uri)?;
    parent.remove_collection(txn, self, uri.name())?;
    self.save_collection(txn, &parent)?;
    triggers.finish(txn, TriggerEvent::DeleteCollection, uri);
    Ok(())
  }

  /// Move `src` under `dest_parent` as `new_name` / 将 `src` 移到 `dest_parent` 下并命名为 `new_name`
  pub fn move_collection(
    &self,
    txn: &Txn,
    src: &XmldbUri,
    dest_parent: &XmldbUri,
    new_name: &str,
  ) -> Result<XmldbUri> {
    self.db.check_open()?;
    txn.check()?;
    self.in_tree(src)?;
    self.in_tree(dest_parent)?;
    let Some(src_parent) = src.parent() else {
      return Err(Error::Invalid(HipStr::from(format!("cannot move root {src}"))));
    };
    if dest_parent.starts_with(src) {
      return Err(Error::Invalid(HipStr::from(format!("{src} into {dest_parent}"))));
    }
    let dest = dest_parent.append(new_name)?;

    let _locks = self.db.locks.acquire_collection_locks(
      &[src_parent.clone(), dest_parent.clone(), src.clone()],
      LockMode::Write,
    )?;
    let from = self.must_load(&src_parent)?;
    let to = self.must_load(dest_parent)?;
    let coll = self.must_load(src)?;
    if self.exists(&dest)? {
      return Err(Error::Exists(dest.as_hip().clone()));
    }
    // a pending store below src would publish under the old path
    // src 之下未完成的存储会以旧路径发布
    if self.db.locks.has_document_locks(src) {
      return Err(xdb_lock::Error::Contention(src.as_hip().clone()).into());
    }
    from.check_perm(self, WRITE)?;
    to.check_perm(self, WRITE)?;

    let triggers = &self.db.triggers;
    triggers.prepare(txn, TriggerEvent::MoveCollection, src)?;
    self.db.store.move_collection(txn, src, &dest)?;
    coll.set_path(self, dest.clone(), true)?;
    let _dest = self.db.locks.acquire_collection_lock(&dest, LockMode::Write)?;
    from.unlink_child(src.name());
    to.add_collection(self, &coll)?;
    self.save_collection(txn, &from)?;
    if from.uri() != to.uri() {
      self.save_collection(txn, &to)?;
    }
    self.save_collection(txn, &coll)?;
    triggers.finish(txn, TriggerEvent::MoveCollection, &dest);
    Ok(dest)
  }

  /// Stored content of `doc` / `doc` 的已存储内容
  pub fn read_content(&self, doc: &Document) -> Result<Bytes> {
    self.db.check_open()?;
    self
      .db
      .store
      .load_content(doc.id)?
      .ok_or_else(|| Error::NotFound(doc.uri.as_hip().clone()))
  }
}
