//! Collection cache / 集合缓存
//!
//! LRU keyed by uri. An entry still referenced outside the cache is never
//! evicted, so the cache may exceed its capacity while many are in use.
//! 以 uri 为键的 LRU。仍被外部引用的条目不会被淘汰，因此使用中的条目多时可能超过容量。

use std::sync::Arc;

use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use xdb_path::XmldbUri;

use crate::Collection;

type Map = LinkedHashMap<XmldbUri, Arc<Collection>>;

pub struct CollectionCache {
  cap: usize,
  map: Mutex<Map>,
}

impl CollectionCache {
  pub fn new(cap: usize) -> Self {
    Self {
      cap: cap.max(1),
      map: Mutex::new(Map::new()),
    }
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.cap
  }

  pub fn len(&self) -> usize {
    self.map.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.lock().is_empty()
  }

  pub fn contains(&self, uri: &XmldbUri) -> bool {
    self.map.lock().contains_key(uri)
  }

  /// Marks the entry as recently used / 标记为最近使用
  pub fn get(&self, uri: &XmldbUri) -> Option<Arc<Collection>> {
    self.map.lock().to_back(uri).map(|c| c.clone())
  }

  /// Insert unless present; returns the cached entry
  /// 不存在时插入；返回缓存中的条目
  pub fn get_or_insert(&self, coll: Arc<Collection>) -> Arc<Collection> {
    let uri = coll.uri();
    let mut m = self.map.lock();
    if let Some(c) = m.to_back(&uri) {
      return c.clone();
    }
    m.insert(uri, coll.clone());
    self.evict(&mut m);
    coll
  }

  pub fn remove(&self, uri: &XmldbUri) -> Option<Arc<Collection>> {
    self.map.lock().remove(uri)
  }

  /// Remove `uri` and its loaded descendants / 删除 `uri` 及其已加载的后代
  pub fn remove_subtree(&self, uri: &XmldbUri) {
    self.map.lock().retain(|k, _| !k.starts_with(uri));
  }

  /// Move entries under `from` to `to`. Descendants are rewritten when
  /// `children` is set, dropped otherwise.
  ///
  /// 将 `from` 之下的条目移到 `to`。`children` 为真时改写后代，否则丢弃。
  pub fn rebase(&self, from: &XmldbUri, to: &XmldbUri, children: bool) {
    let mut m = self.map.lock();
    let keys: Vec<XmldbUri> = m.keys().filter(|k| k.starts_with(from)).cloned().collect();
    for k in keys {
      let Some(c) = m.remove(&k) else {
        continue;
      };
      if &k != from && !children {
        continue;
      }
      c.rebase(from, to);
      if let Some(nk) = k.rebase(from, to) {
        m.insert(nk, c);
      }
    }
  }

  pub fn clear(&self) {
    self.map.lock().clear();
  }

  fn evict(&self, m: &mut Map) {
    while m.len() > self.cap {
      let victim = m
        .iter()
        .find(|(_, c)| Arc::strong_count(c) == 1)
        .map(|(k, _)| k.clone());
      match victim {
        Some(k) => {
          m.remove(&k);
        }
        None => break,
      }
    }
  }
}
