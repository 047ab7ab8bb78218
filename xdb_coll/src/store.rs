//! Collection store contract and in-memory store / 集合存储接口与内存实现

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use bytes::Bytes;
use hipstr::HipStr;
use parking_lot::Mutex;
use xdb_path::XmldbUri;

use crate::{Document, Result, Txn};

/// Persisted collection record / 持久化的集合记录
#[derive(Debug, Clone)]
pub struct Stored {
  pub id: i32,
  /// Output of [`crate::Collection::serialize`]
  pub meta: Bytes,
}

/// Privileged view handed to the store while a collection is loaded. It skips
/// permission and lock checks and cannot be built outside this crate.
///
/// 加载集合时交给存储的特权视图。跳过权限与锁检查，且无法在本 crate 外构造。
pub struct InternalAccess<'a> {
  id: i32,
  docs: &'a mut BTreeMap<HipStr<'static>, Arc<Document>>,
}

impl<'a> InternalAccess<'a> {
  pub(crate) fn new(id: i32, docs: &'a mut BTreeMap<HipStr<'static>, Arc<Document>>) -> Self {
    Self { id, docs }
  }

  #[inline]
  pub fn id(&self) -> i32 {
    self.id
  }

  pub fn add_document(&mut self, doc: Document) {
    self
      .docs
      .insert(HipStr::from(doc.name()), Arc::new(doc));
  }
}

pub trait CollectionStore: Send + Sync {
  fn next_collection_id(&self) -> Result<i32>;

  fn next_document_id(&self) -> Result<u32>;

  fn save_collection(&self, txn: &Txn, uri: &XmldbUri, id: i32, meta: Bytes) -> Result<()>;

  fn load_collection(&self, uri: &XmldbUri) -> Result<Option<Stored>>;

  /// Drop `uri` and everything below it / 删除 `uri` 及其下所有内容
  fn reclaim_collection(&self, txn: &Txn, uri: &XmldbUri) -> Result<()>;

  /// Re-key `from` and its subtree under `to` / 将 `from` 及其子树改到 `to` 之下
  fn move_collection(&self, txn: &Txn, from: &XmldbUri, to: &XmldbUri) -> Result<()>;

  /// Feed stored documents of `uri` through `access` / 通过 `access` 载入 `uri` 的文档
  fn load_documents(&self, uri: &XmldbUri, access: &mut InternalAccess<'_>) -> Result<()>;

  fn save_document(&self, txn: &Txn, doc: &Document) -> Result<()>;

  /// Metadata and content / 元数据与内容
  fn remove_document(&self, txn: &Txn, doc: &Document) -> Result<()>;

  fn store_content(&self, txn: &Txn, doc_id: u32, content: Bytes) -> Result<()>;

  fn load_content(&self, doc_id: u32) -> Result<Option<Bytes>>;

  fn remove_content(&self, doc_id: u32) -> Result<()>;
}

#[derive(Default)]
struct Inner {
  next_collection: i32,
  next_document: u32,
  collections: BTreeMap<XmldbUri, Stored>,
  /// collection uri -> name -> document / 集合 -> 名称 -> 文档
  documents: BTreeMap<XmldbUri, BTreeMap<HipStr<'static>, Document>>,
  content: HashMap<u32, Bytes>,
}

/// In-memory store / 内存存储
#[derive(Default)]
pub struct MemStore(Mutex<Inner>);

impl MemStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn collection_count(&self) -> usize {
    self.0.lock().collections.len()
  }

  pub fn document_count(&self) -> usize {
    self.0.lock().documents.values().map(|m| m.len()).sum()
  }

  pub fn content_count(&self) -> usize {
    self.0.lock().content.len()
  }
}

fn parent_of(doc: &Document) -> Option<XmldbUri> {
  doc.uri.parent()
}

impl CollectionStore for MemStore {
  fn next_collection_id(&self) -> Result<i32> {
    let mut g = self.0.lock();
    let id = g.next_collection;
    g.next_collection += 1;
    Ok(id)
  }

  fn next_document_id(&self) -> Result<u32> {
    let mut g = self.0.lock();
    let id = g.next_document;
    g.next_document += 1;
    Ok(id)
  }

  fn save_collection(&self, _txn: &Txn, uri: &XmldbUri, id: i32, meta: Bytes) -> Result<()> {
    self
      .0
      .lock()
      .collections
      .insert(uri.clone(), Stored { id, meta });
    Ok(())
  }

  fn load_collection(&self, uri: &XmldbUri) -> Result<Option<Stored>> {
    Ok(self.0.lock().collections.get(uri).cloned())
  }

  fn reclaim_collection(&self, _txn: &Txn, uri: &XmldbUri) -> Result<()> {
    let mut g = self.0.lock();
    let inner = &mut *g;
    inner.collections.retain(|k, _| !k.starts_with(uri));
    let mut gone = Vec::new();
    inner.documents.retain(|k, docs| {
      let keep = !k.starts_with(uri);
      if !keep {
        gone.extend(docs.values().map(|d| d.id));
      }
      keep
    });
    for id in gone {
      inner.content.remove(&id);
    }
    Ok(())
  }

  fn move_collection(&self, _txn: &Txn, from: &XmldbUri, to: &XmldbUri) -> Result<()> {
    let mut g = self.0.lock();
    let inner = &mut *g;

    let moved: Vec<XmldbUri> = inner
      .collections
      .keys()
      .filter(|k| k.starts_with(from))
      .cloned()
      .collect();
    for k in moved {
      if let (Some(v), Some(nk)) = (inner.collections.remove(&k), k.rebase(from, to)) {
        inner.collections.insert(nk, v);
      }
    }

    let moved: Vec<XmldbUri> = inner
      .documents
      .keys()
      .filter(|k| k.starts_with(from))
      .cloned()
      .collect();
    for k in moved {
      if let (Some(docs), Some(nk)) = (inner.documents.remove(&k), k.rebase(from, to)) {
        let docs = docs
          .into_iter()
          .map(|(n, d)| (n, d.rebased(from, to)))
          .collect();
        inner.documents.insert(nk, docs);
      }
    }
    Ok(())
  }

  fn load_documents(&self, uri: &XmldbUri, access: &mut InternalAccess<'_>) -> Result<()> {
    let g = self.0.lock();
    if let Some(docs) = g.documents.get(uri) {
      for d in docs.values() {
        access.add_document(d.clone());
      }
    }
    Ok(())
  }

  fn save_document(&self, _txn: &Txn, doc: &Document) -> Result<()> {
    if let Some(parent) = parent_of(doc) {
      self
        .0
        .lock()
        .documents
        .entry(parent)
        .or_default()
        .insert(HipStr::from(doc.name()), doc.clone());
    }
    Ok(())
  }

  fn remove_document(&self, _txn: &Txn, doc: &Document) -> Result<()> {
    let mut g = self.0.lock();
    if let Some(parent) = parent_of(doc) {
      let empty = match g.documents.get_mut(&parent) {
        Some(docs) => {
          docs.remove(doc.name());
          docs.is_empty()
        }
        None => false,
      };
      if empty {
        g.documents.remove(&parent);
      }
    }
    g.content.remove(&doc.id);
    Ok(())
  }

  fn store_content(&self, _txn: &Txn, doc_id: u32, content: Bytes) -> Result<()> {
    self.0.lock().content.insert(doc_id, content);
    Ok(())
  }

  fn load_content(&self, doc_id: u32) -> Result<Option<Bytes>> {
    Ok(self.0.lock().content.get(&doc_id).cloned())
  }

  fn remove_content(&self, doc_id: u32) -> Result<()> {
    self.0.lock().content.remove(&doc_id);
    Ok(())
  }
}
