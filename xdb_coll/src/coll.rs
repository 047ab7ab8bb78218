//! Collection / 集合
//!
//! One node of the collection tree. Structural changes require the calling
//! thread to hold the collection write lock; reads of id and uri need no lock.
//! 集合树中的一个节点。结构性修改要求调用线程持有集合写锁；读取 id 与 uri 无需加锁。

use std::{
  cell::Cell,
  collections::{BTreeMap, BTreeSet},
  fmt,
  sync::{
    Arc,
    atomic::{AtomicI32, Ordering},
  },
  vec,
};

use bytes::{BufMut, Bytes, BytesMut};
use defer_lite::defer;
use hipstr::HipStr;
use log::{debug, error};
use parking_lot::RwLock;
use xdb_lock::{LockManager, LockMode, ManagedLock};
use xdb_path::XmldbUri;

use crate::{
  Broker, CollectionEntry, Document, Error, LockedDocument, Permission, ResourceKind, Result,
  StoreOptions, Txn, Utf8Reader, XmlReader,
  perm::{READ, WRITE},
  store::{CollectionStore, InternalAccess, Stored},
  trigger::TriggerEvent,
  vbyte::{get_utf, get_vint, get_vlong, put_utf, put_vint, put_vlong, skip},
};

pub const UNKNOWN_COLLECTION_ID: i32 = -1;

struct Meta {
  uri: XmldbUri,
  permissions: Permission,
  created: i64,
  children: BTreeSet<HipStr<'static>>,
  documents: BTreeMap<HipStr<'static>, Arc<Document>>,
  /// Names reserved by an unfinished store / 未完成存储所预留的名称
  pending: BTreeSet<HipStr<'static>>,
}

pub struct Collection {
  id: AtomicI32,
  locks: Arc<LockManager>,
  meta: RwLock<Meta>,
}

fn check_name(name: &str) -> Result<()> {
  if name.is_empty() || name.contains('/') || name == "." || name == ".." {
    return Err(xdb_path::Error::InvalidSegment(HipStr::from(name)).into());
  }
  Ok(())
}

fn not_found(uri: &XmldbUri) -> Error {
  Error::NotFound(uri.as_hip().clone())
}

impl Collection {
  pub(crate) fn new(
    locks: Arc<LockManager>,
    uri: XmldbUri,
    permissions: Permission,
    created: i64,
  ) -> Self {
    Self {
      id: AtomicI32::new(UNKNOWN_COLLECTION_ID),
      locks,
      meta: RwLock::new(Meta {
        uri,
        permissions,
        created,
        children: BTreeSet::new(),
        documents: BTreeMap::new(),
        pending: BTreeSet::new(),
      }),
    }
  }

  /// Rebuild from the record written by [`Self::serialize`]
  /// 从 [`Self::serialize`] 写出的记录重建
  pub(crate) fn deserialize(
    locks: Arc<LockManager>,
    uri: XmldbUri,
    stored: &Stored,
  ) -> Result<Self> {
    let mut buf = stored.meta.clone();
    skip(&mut buf, 1)?;
    let n = get_vint(&mut buf)?;
    let children = (0..n)
      .map(|_| get_utf(&mut buf))
      .collect::<Result<BTreeSet<_>>>()?;
    let permissions = Permission::read(&mut buf)?;
    let created = get_vlong(&mut buf)? as i64;

    let coll = Self::new(locks, uri, permissions, created);
    coll.id.store(stored.id, Ordering::Release);
    coll.meta.write().children = children;
    Ok(coll)
  }

  /// Only reachable while the collection is not yet shared
  /// 仅在集合尚未共享时可用
  pub(crate) fn internal_access(&mut self) -> InternalAccess<'_> {
    let id = self.id();
    InternalAccess::new(id, &mut self.meta.get_mut().documents)
  }

  #[inline]
  pub fn id(&self) -> i32 {
    self.id.load(Ordering::Acquire)
  }

  pub(crate) fn assign_id(&self, id: i32) {
    self.id.store(id, Ordering::Release);
  }

  pub fn uri(&self) -> XmldbUri {
    self.meta.read().uri.clone()
  }

  /// None for the root / 根集合返回 None
  pub fn parent_uri(&self) -> Option<XmldbUri> {
    self.meta.read().uri.parent()
  }

  pub(crate) fn ensure(&self, mode: LockMode) -> Result<XmldbUri> {
    let uri = self.uri();
    if self.locks.holds_collection_lock(&uri, mode) {
      return Ok(uri);
    }
    Err(
      xdb_lock::Error::NotHeld {
        id: uri.as_hip().clone(),
        mode,
      }
      .into(),
    )
  }

  pub(crate) fn check_perm(&self, broker: &Broker, mode: u8) -> Result<()> {
    let m = self.meta.read();
    m.permissions.check(broker.subject(), mode, m.uri.as_str())
  }

  pub(crate) fn unlink_child(&self, name: &str) {
    self.meta.write().children.remove(name);
  }

  pub(crate) fn rebase(&self, from: &XmldbUri, to: &XmldbUri) {
    let mut m = self.meta.write();
    let Some(uri) = m.uri.rebase(from, to) else {
      return;
    };
    m.uri = uri;
    for d in m.documents.values_mut() {
      *d = Arc::new(d.rebased(from, to));
    }
  }

  /// Rewrite this collection's uri and, with `update_children`, the uris of
  /// loaded descendants. Needs the write lock on the current uri.
  ///
  /// 改写本集合的 uri；`update_children` 为真时同时改写已加载后代的 uri。需要持有当前 uri 的写锁。
  pub fn set_path(&self, broker: &Broker, path: XmldbUri, update_children: bool) -> Result<()> {
    let old = self.ensure(LockMode::Write)?;
    if old == path {
      return Ok(());
    }
    if path.is_descendant_of(&old) {
      return Err(Error::Invalid(HipStr::from(format!("{old} into {path}"))));
    }
    self.rebase(&old, &path);
    broker.db().cache().rebase(&old, &path, update_children);
    debug!("collection {old} -> {path}");
    Ok(())
  }

  pub fn permissions(&self) -> Permission {
    self.meta.read().permissions.clone()
  }

  /// Owner or DBA / 所有者或 DBA
  pub fn set_permissions(&self, broker: &Broker, permissions: Permission) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    let mut m = self.meta.write();
    let s = broker.subject();
    if s.id != m.permissions.owner() && !s.is_dba() {
      return Err(Error::PermissionDenied(HipStr::from(format!(
        "{} is not the owner of {uri}",
        s.name
      ))));
    }
    m.permissions = permissions;
    Ok(())
  }

  pub fn created(&self) -> i64 {
    self.meta.read().created
  }

  /// DBA only / 仅限 DBA
  pub fn set_created(&self, broker: &Broker, created: i64) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    if !broker.subject().is_dba() {
      return Err(Error::PermissionDenied(HipStr::from(format!(
        "only dba may set created of {uri}"
      ))));
    }
    self.meta.write().created = created;
    Ok(())
  }

  /// Link `child` under this collection / 将 `child` 挂到本集合下
  pub fn add_collection(&self, broker: &Broker, child: &Collection) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    let child_uri = child.uri();
    if child_uri.parent().as_ref() != Some(&uri) {
      return Err(Error::Invalid(HipStr::from(format!("{child_uri} is not a child of {uri}"))));
    }
    self.check_perm(broker, WRITE)?;
    let name = HipStr::from(child_uri.name());
    let mut m = self.meta.write();
    if m.documents.contains_key(&name) || m.pending.contains(&name) {
      return Err(Error::Exists(child_uri.as_hip().clone()));
    }
    m.children.insert(name);
    Ok(())
  }

  /// Unlink child `name` and let the store reclaim its subtree. Fails with
  /// contention while another thread holds a document lock inside it.
  ///
  /// 解除子集合 `name` 并由存储回收其子树。若其他线程持有其中的文档锁则返回争用错误。
  pub fn remove_collection(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    txn.check()?;
    self.check_perm(broker, WRITE)?;
    let child = uri.append(name)?;
    if !self.meta.read().children.contains(name) {
      return Err(not_found(&child));
    }
    if self.locks.has_foreign_document_locks(&child) {
      return Err(xdb_lock::Error::Contention(child.as_hip().clone()).into());
    }
    broker.db().store().reclaim_collection(txn, &child)?;
    self.meta.write().children.remove(name);
    broker.db().cache().remove_subtree(&child);
    debug!("removed collection {child}");
    Ok(())
  }

  /// Insert `doc` into the document table, content is not touched
  /// 将 `doc` 加入文档表，不涉及内容
  pub fn add_document(&self, txn: &Txn, broker: &Broker, doc: Document) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    txn.check()?;
    self.check_perm(broker, WRITE)?;
    if doc.uri.parent().as_ref() != Some(&uri) {
      return Err(Error::Invalid(HipStr::from(format!("{} is not in {uri}", doc.uri))));
    }
    let name = HipStr::from(doc.name());
    let mut m = self.meta.write();
    if m.children.contains(&name) {
      return Err(Error::Exists(doc.uri.as_hip().clone()));
    }
    m.documents.insert(name, Arc::new(doc));
    Ok(())
  }

  /// Remove `doc` from the document table, content is not touched
  /// 从文档表移除 `doc`，不涉及内容
  pub fn unlink_document(&self, broker: &Broker, doc: &Document) -> Result<Option<Arc<Document>>> {
    self.ensure(LockMode::Write)?;
    self.check_perm(broker, WRITE)?;
    Ok(self.meta.write().documents.remove(doc.name()))
  }

  /// Delete document `name` and its content / 删除文档 `name` 及其内容
  pub fn remove_resource(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
    self.remove_kind(txn, broker, name, None)
  }

  pub fn remove_xml_resource(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
    self.remove_kind(txn, broker, name, Some(ResourceKind::Xml))
  }

  pub fn remove_binary_resource(&self, txn: &Txn, broker: &Broker, name: &str) -> Result<()> {
    self.remove_kind(txn, broker, name, Some(ResourceKind::Binary))
  }

  fn remove_kind(
    &self,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    kind: Option<ResourceKind>,
  ) -> Result<()> {
    let uri = self.ensure(LockMode::Write)?;
    txn.check()?;
    self.check_perm(broker, WRITE)?;
    let doc_uri = uri.append(name)?;
    let mut lock = self.locks.acquire_document_lock(&uri, name, LockMode::Write)?;
    let doc = self
      .meta
      .read()
      .documents
      .get(name)
      .cloned()
      .ok_or_else(|| not_found(&doc_uri))?;
    if let Some(kind) = kind
      && doc.kind != kind
    {
      return Err(Error::Invalid(HipStr::from(format!("{} is {:?}", doc.uri, doc.kind))));
    }

    let db = broker.db();
    db.triggers().prepare(txn, TriggerEvent::DeleteDocument, &doc.uri)?;
    db.store().remove_document(txn, &doc)?;
    self.meta.write().documents.remove(name);
    lock.release()?;
    db.triggers().finish(txn, TriggerEvent::DeleteDocument, &doc.uri);
    Ok(())
  }

  pub(crate) fn reserve_name(&self, name: &HipStr<'static>) -> bool {
    self.meta.write().pending.insert(name.clone())
  }

  pub(crate) fn release_name(&self, name: &str) {
    self.meta.write().pending.remove(name);
  }

  /// Make `doc` visible and drop its reservation in one step
  /// 一步完成：使 `doc` 可见并移除其预留
  pub(crate) fn publish(
    &self,
    name: &HipStr<'static>,
    doc: Arc<Document>,
  ) -> Option<Arc<Document>> {
    let mut m = self.meta.write();
    m.pending.remove(name);
    m.documents.insert(name.clone(), doc)
  }

  /// Common first phase: permission, document write lock, name reservation,
  /// prepare trigger. Caller holds the collection write lock.
  ///
  /// 公共第一阶段：权限、文档写锁、名称预留、prepare 触发器。调用方持有集合写锁。
  fn reserve(
    self: &Arc<Self>,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    opts: &StoreOptions,
    kind: ResourceKind,
  ) -> Result<IndexInfo> {
    let uri = self.ensure(LockMode::Write)?;
    txn.check()?;
    check_name(name)?;
    let doc_uri = uri.append(name)?;

    let lock = self.locks.acquire_document_lock(&uri, name, LockMode::Write)?;
    let (existing, is_child) = {
      let m = self.meta.read();
      (m.documents.get(name).cloned(), m.children.contains(name))
    };
    if is_child {
      return Err(Error::Exists(doc_uri.as_hip().clone()));
    }
    match &existing {
      Some(d) => d.permissions.check(broker.subject(), WRITE, doc_uri.as_str())?,
      None => self.check_perm(broker, WRITE)?,
    }

    let name = HipStr::from(name);
    if !self.reserve_name(&name) {
      return Err(xdb_lock::Error::Contention(doc_uri.as_hip().clone()).into());
    }
    let reservation = Reservation {
      coll: self.clone(),
      name,
      armed: true,
    };

    let event = if existing.is_some() {
      TriggerEvent::UpdateDocument
    } else {
      TriggerEvent::CreateDocument
    };
    let db = broker.db();
    db.triggers().prepare(txn, event, &doc_uri)?;

    let now = crate::now_ms();
    let permissions = opts
      .permission
      .clone()
      .or_else(|| existing.as_ref().map(|d| d.permissions.clone()))
      .unwrap_or_else(|| Permission::owned_by(broker.subject(), db.conf().resource_mode));
    let created = match &existing {
      Some(d) if opts.preserve_metadata_on_copy => d.created,
      _ => opts.created.unwrap_or(now),
    };
    let doc = Document {
      id: db.store().next_document_id()?,
      uri: doc_uri,
      kind,
      mime: opts.mime.clone(),
      permissions,
      created,
      modified: opts.modified.unwrap_or(now),
      doctype: opts.doctype.clone(),
      size: 0,
    };

    Ok(IndexInfo {
      doc,
      event,
      replaced: existing,
      reservation,
      lock,
    })
  }

  /// First phase of an XML store. Caller holds the collection write lock. The
  /// returned [`IndexInfo`] holds the document write lock; pass it to
  /// [`Self::store`] or drop it to abandon.
  ///
  /// XML 存储的第一阶段。调用方持有集合写锁。返回的 [`IndexInfo`] 持有文档写锁；
  /// 交给 [`Self::store`] 完成，或直接丢弃以放弃。
  pub fn validate_xml_resource(
    self: &Arc<Self>,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    source: &[u8],
  ) -> Result<IndexInfo> {
    self.validate_with(txn, broker, name, source, &StoreOptions::default())
  }

  fn validate_with(
    self: &Arc<Self>,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    source: &[u8],
    opts: &StoreOptions,
  ) -> Result<IndexInfo> {
    let mut info = self.reserve(txn, broker, name, opts, ResourceKind::Xml)?;
    match &opts.reader {
      Some(r) => r.validate(&info.doc.uri, source)?,
      None => Utf8Reader.validate(&info.doc.uri, source)?,
    }
    info.doc.size = source.len() as u64;
    Ok(info)
  }

  /// Second phase of an XML store, no collection lock needed. On error the
  /// document stays invisible.
  ///
  /// XML 存储的第二阶段，无需集合锁。出错时文档保持不可见。
  pub fn store(
    &self,
    txn: &Txn,
    broker: &Broker,
    info: IndexInfo,
    source: Bytes,
  ) -> Result<Arc<Document>> {
    self.commit(txn, broker, info, source)
  }

  fn commit(
    &self,
    txn: &Txn,
    broker: &Broker,
    info: IndexInfo,
    source: Bytes,
  ) -> Result<Arc<Document>> {
    txn.check()?;
    if !std::ptr::eq(Arc::as_ptr(&info.reservation.coll), self) {
      return Err(Error::Invalid(HipStr::from(format!(
        "{} was validated by another collection",
        info.doc.uri
      ))));
    }
    let here = self.uri();
    if info.doc.uri.parent().as_ref() != Some(&here) {
      return Err(Error::Invalid(HipStr::from(format!(
        "{} was validated before {here} moved",
        info.doc.uri
      ))));
    }
    let IndexInfo {
      mut doc,
      event,
      replaced,
      reservation,
      lock,
    } = info;
    doc.size = source.len() as u64;

    let db = broker.db();
    let store = db.store();
    if let Err(e) = persist(store.as_ref(), txn, &doc, source) {
      drop(reservation);
      drop(lock);
      return Err(e);
    }

    let doc = Arc::new(doc);
    reservation.publish(doc.clone());
    if let Some(old) = replaced
      && old.id != doc.id
      && let Err(e) = store.remove_content(old.id)
    {
      error!("drop replaced content {}: {e}", old.uri);
    }
    drop(lock);
    db.triggers().finish(txn, event, &doc.uri);
    Ok(doc)
  }

  /// Store a binary resource. The collection write lock is taken only to
  /// reserve the name; the upload runs under the document lock alone. The
  /// caller must not hold a lock on this collection.
  ///
  /// 存储二进制资源。集合写锁只在预留名称时持有；上传仅在文档锁下进行。调用方不得预先锁定本集合。
  pub fn store_binary(
    self: &Arc<Self>,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    source: Bytes,
    opts: &StoreOptions,
  ) -> Result<Arc<Document>> {
    let info = {
      let _coll = self.locks.acquire_collection_lock(&self.uri(), LockMode::Write)?;
      self.reserve(txn, broker, name, opts, ResourceKind::Binary)?
    };
    self.commit(txn, broker, info, source)
  }

  /// Store `source` as `name`, XML or binary by `opts.mime`. Locks
  /// internally; the caller must not hold a lock on this collection.
  ///
  /// 按 `opts.mime` 以 XML 或二进制存储为 `name`。内部加锁；调用方不得预先锁定本集合。
  pub fn store_document(
    self: &Arc<Self>,
    txn: &Txn,
    broker: &Broker,
    name: &str,
    source: Bytes,
    opts: StoreOptions,
  ) -> Result<Arc<Document>> {
    match opts.kind() {
      ResourceKind::Xml => {
        let info = {
          let _coll = self.locks.acquire_collection_lock(&self.uri(), LockMode::Write)?;
          self.validate_with(txn, broker, name, &source, &opts)?
        };
        self.store(txn, broker, info, source)
      }
      ResourceKind::Binary => self.store_binary(txn, broker, name, source, &opts),
    }
  }

  fn snapshot<T>(
    &self,
    broker: &Broker,
    f: impl FnOnce(&Meta) -> Vec<T>,
  ) -> Result<vec::IntoIter<T>> {
    let _lock = self.locks.acquire_collection_lock(&self.uri(), LockMode::Read)?;
    self.check_perm(broker, READ)?;
    Ok(f(&self.meta.read()).into_iter())
  }

  /// Child names copied under a read lock / 在读锁下复制的子集合名称
  pub fn collection_iterator(&self, broker: &Broker) -> Result<vec::IntoIter<HipStr<'static>>> {
    self.snapshot(broker, |m| m.children.iter().cloned().collect())
  }

  /// Documents copied under a read lock / 在读锁下复制的文档
  pub fn iterator(&self, broker: &Broker) -> Result<vec::IntoIter<Arc<Document>>> {
    self.snapshot(broker, |m| m.documents.values().cloned().collect())
  }

  /// Takes no lock, may observe a collection mid-change
  /// 不加锁，可能看到修改中途的状态
  #[deprecated(note = "not atomic, use collection_iterator")]
  pub fn collection_iterator_no_lock(
    &self,
    broker: &Broker,
  ) -> Result<vec::IntoIter<HipStr<'static>>> {
    self.check_perm(broker, READ)?;
    Ok(
      self
        .meta
        .read()
        .children
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .into_iter(),
    )
  }

  /// Takes no lock, may observe a collection mid-change
  /// 不加锁，可能看到修改中途的状态
  #[deprecated(note = "not atomic, use iterator")]
  pub fn iterator_no_lock(&self, broker: &Broker) -> Result<vec::IntoIter<Arc<Document>>> {
    self.check_perm(broker, READ)?;
    Ok(self.meta.read().documents.values().cloned().collect::<Vec<_>>().into_iter())
  }

  fn read_locked(&self, broker: &Broker) -> Result<XmldbUri> {
    let uri = self.ensure(LockMode::Read)?;
    self.check_perm(broker, READ)?;
    Ok(uri)
  }

  pub fn get_document(&self, broker: &Broker, name: &str) -> Result<Option<Arc<Document>>> {
    self.read_locked(broker)?;
    Ok(self.meta.read().documents.get(name).cloned())
  }

  /// Document with a lock of `mode` bound to it; None releases the lock
  /// 附带 `mode` 锁的文档；返回 None 时锁已释放
  pub fn get_document_with_lock(
    &self,
    broker: &Broker,
    name: &str,
    mode: LockMode,
  ) -> Result<Option<LockedDocument>> {
    let uri = self.read_locked(broker)?;
    let lock: ManagedLock = self.locks.acquire_document_lock(&uri, name, mode)?;
    let doc = self.meta.read().documents.get(name).cloned();
    Ok(doc.map(|d| LockedDocument::new(d, lock)))
  }

  pub fn is_empty(&self, broker: &Broker) -> Result<bool> {
    self.read_locked(broker)?;
    let m = self.meta.read();
    Ok(m.children.is_empty() && m.documents.is_empty())
  }

  pub fn document_count(&self, broker: &Broker) -> Result<usize> {
    self.read_locked(broker)?;
    Ok(self.meta.read().documents.len())
  }

  pub fn child_collection_count(&self, broker: &Broker) -> Result<usize> {
    self.read_locked(broker)?;
    Ok(self.meta.read().children.len())
  }

  pub fn has_document(&self, broker: &Broker, name: &str) -> Result<bool> {
    self.read_locked(broker)?;
    Ok(self.meta.read().documents.contains_key(name))
  }

  pub fn has_child_collection(&self, broker: &Broker, name: &str) -> Result<bool> {
    self.read_locked(broker)?;
    Ok(self.meta.read().children.contains(name))
  }

  #[deprecated(note = "not atomic, use has_child_collection")]
  pub fn has_child_collection_no_lock(&self, broker: &Broker, name: &str) -> Result<bool> {
    self.check_perm(broker, READ)?;
    Ok(self.meta.read().children.contains(name))
  }

  /// Listing of child collections then documents / 先子集合后文档的列表
  pub fn entries(&self, broker: &Broker) -> Result<Vec<CollectionEntry>> {
    let uri = self.read_locked(broker)?;
    let (children, docs): (Vec<_>, Vec<_>) = {
      let m = self.meta.read();
      (
        m.children.iter().cloned().collect(),
        m.documents.values().cloned().collect(),
      )
    };
    let mode = broker.db().conf().collection_mode;
    let mut out = Vec::with_capacity(children.len() + docs.len());
    for name in children {
      let mut e = CollectionEntry::sub_collection(uri.append(&name)?, mode);
      e.read_metadata(broker)?;
      out.push(e);
    }
    out.extend(docs.iter().map(|d| CollectionEntry::document(d)));
    Ok(out)
  }

  pub fn child_collection_entry(&self, broker: &Broker, name: &str) -> Result<CollectionEntry> {
    let uri = self.read_locked(broker)?;
    let child = uri.append(name)?;
    if !self.meta.read().children.contains(name) {
      return Err(not_found(&child));
    }
    let mut e = CollectionEntry::sub_collection(child, broker.db().conf().collection_mode);
    e.read_metadata(broker)?;
    Ok(e)
  }

  pub fn resource_entry(&self, broker: &Broker, name: &str) -> Result<CollectionEntry> {
    let uri = self.read_locked(broker)?;
    match self.meta.read().documents.get(name) {
      Some(d) => Ok(CollectionEntry::document(d)),
      None => Err(not_found(&uri.append(name)?)),
    }
  }

  /// Uris of all descendant collections, parents first
  /// 所有后代集合的 uri，父在前
  pub fn descendants(&self, broker: &Broker) -> Result<Vec<XmldbUri>> {
    let uri = self.read_locked(broker)?;
    let names: Vec<_> = self.meta.read().children.iter().cloned().collect();
    let mut out = Vec::new();
    for name in names {
      let child_uri = uri.append(&name)?;
      if let Some(child) = broker.open_collection(&child_uri, LockMode::Read)? {
        out.push(child_uri);
        out.extend(child.descendants(broker)?);
      }
    }
    Ok(out)
  }

  pub fn all_docs(&self, broker: &Broker, recursive: bool) -> Result<Vec<Arc<Document>>> {
    let uri = self.read_locked(broker)?;
    let (names, mut out): (Vec<_>, Vec<_>) = {
      let m = self.meta.read();
      (
        m.children.iter().cloned().collect(),
        m.documents.values().cloned().collect(),
      )
    };
    if recursive {
      for name in names {
        if let Some(child) = broker.open_collection(&uri.append(&name)?, LockMode::Read)? {
          out.extend(child.all_docs(broker, true)?);
        }
      }
    }
    Ok(out)
  }

  /// `[u8 0][vint n][utf child]*n[permission][vlong created]`
  pub fn serialize(&self, buf: &mut impl BufMut) {
    let m = self.meta.read();
    buf.put_u8(0);
    put_vint(buf, m.children.len() as u32);
    for c in &m.children {
      put_utf(buf, c);
    }
    m.permissions.write(buf);
    put_vlong(buf, m.created as u64);
  }

  pub fn to_bytes(&self) -> Bytes {
    let mut b = BytesMut::new();
    self.serialize(&mut b);
    b.freeze()
  }
}

/// Content then metadata; content is dropped again when either fails
/// 先内容后元数据；任一失败时删除已写入的内容
fn persist(store: &dyn CollectionStore, txn: &Txn, doc: &Document, source: Bytes) -> Result<()> {
  let done = Cell::new(false);
  let id = doc.id;
  defer! {
    if !done.get() && let Err(e) = store.remove_content(id) {
      error!("drop partial content {id}: {e}");
    }
  }
  store.store_content(txn, id, source)?;
  store.save_document(txn, doc)?;
  done.set(true);
  Ok(())
}

impl fmt::Debug for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let m = self.meta.read();
    f.debug_struct("Collection")
      .field("id", &self.id())
      .field("uri", &m.uri)
      .field("children", &m.children.len())
      .field("documents", &m.documents.len())
      .finish()
  }
}

/// Name held back from other stores until published or dropped
/// 在发布或丢弃前不允许其他存储使用的名称
struct Reservation {
  coll: Arc<Collection>,
  name: HipStr<'static>,
  armed: bool,
}

impl Reservation {
  fn publish(mut self, doc: Arc<Document>) -> Option<Arc<Document>> {
    self.armed = false;
    self.coll.publish(&self.name, doc)
  }
}

impl Drop for Reservation {
  fn drop(&mut self) {
    if self.armed {
      self.coll.release_name(&self.name);
    }
  }
}

/// Result of the validate phase: prepared metadata, the document write lock and
/// the name reservation. Dropping it releases both.
///
/// 验证阶段的结果：预备好的元数据、文档写锁与名称预留。丢弃时两者都会释放。
pub struct IndexInfo {
  doc: Document,
  event: TriggerEvent,
  replaced: Option<Arc<Document>>,
  reservation: Reservation,
  lock: ManagedLock,
}

impl IndexInfo {
  #[inline]
  pub fn document(&self) -> &Document {
    &self.doc
  }

  #[inline]
  pub fn event(&self) -> TriggerEvent {
    self.event
  }

  #[inline]
  pub fn lock(&self) -> &ManagedLock {
    &self.lock
  }
}

impl fmt::Debug for IndexInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IndexInfo")
      .field("uri", &self.doc.uri)
      .field("event", &self.event)
      .field("lock", &self.lock)
      .finish()
  }
}
