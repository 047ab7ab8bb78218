use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc,
  },
  thread,
};

use aok::{OK, Void};
use bytes::{Bytes, BytesMut};
use log::info;
use parking_lot::Mutex;
use proptest::prelude::*;
use xdb_coll::{
  AceAccess, AceTarget, Broker, CollectionEntry, CollectionStore, Db, DbConf, Document, Error,
  InternalAccess, LockMode, MemStore, Permission, ResourceKind, StoreOptions, Stored, Subject,
  Trigger, TriggerEvent, Txn, XmldbUri,
  perm::{DBA_GROUP_ID, GUEST_GROUP_ID, MAX_ACL_LENGTH},
};
use xdb_lock::LockConf;

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

fn uri(s: &str) -> XmldbUri {
  XmldbUri::new(s).unwrap()
}

fn conf() -> DbConf {
  DbConf {
    lock: LockConf {
      timeout_ms: Some(500),
      table: true,
    },
    ..DbConf::default()
  }
}

fn open(store: Arc<dyn CollectionStore>) -> Arc<Db> {
  Db::open(conf(), store).unwrap()
}

fn mem() -> (Arc<Db>, Arc<MemStore>) {
  let store = Arc::new(MemStore::new());
  (open(store.clone()), store)
}

const XML: &[u8] = b"<doc><a/></doc>";

/// Create `coll` with no lock left held / 创建 `coll` 且不保留锁
fn mkdir(broker: &Broker, txn: &Txn, coll: &str) -> Arc<xdb_coll::Collection> {
  let mut c = broker.get_or_create_collection(txn, &uri(coll)).unwrap();
  c.release().unwrap();
  c.collection().clone()
}

#[test]
fn test_open_creates_root() -> Void {
  let (db, store) = mem();
  assert_eq!(db.root_uri().as_str(), "/db");
  assert_eq!(store.collection_count(), 1);
  // reopening over the same store keeps the root
  let again = open(store.clone());
  assert_eq!(store.collection_count(), 1);
  let broker = again.broker(Subject::system());
  let root = broker.open_collection(&uri("/db"), LockMode::Read)?.unwrap();
  assert_eq!(root.id(), 0);
  assert!(root.parent_uri().is_none());

  let bad = DbConf {
    root: "/db/x".into(),
    ..DbConf::default()
  };
  assert!(matches!(
    Db::open(bad, store),
    Err(Error::Invalid(_))
  ));
  OK
}

#[test]
fn test_get_or_create_collection() -> Void {
  info!("> missing ancestors are created and linked");
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let z = broker.get_or_create_collection(&txn, &uri("/db/x/y/z"))?;
  assert_eq!(z.uri().as_str(), "/db/x/y/z");
  assert!(db.locks().holds_collection_lock(&uri("/db/x/y/z"), LockMode::Write));
  // ancestors are no longer write locked
  assert!(!db.locks().holds_collection_lock(&uri("/db/x/y"), LockMode::Write));
  assert!(db.locks().holds_collection_lock(&uri("/db/x/y"), LockMode::Read));
  let id = z.id();
  assert_ne!(id, xdb_coll::UNKNOWN_COLLECTION_ID);
  drop(z);
  assert_eq!(store.collection_count(), 4);

  let z = broker.get_or_create_collection(&txn, &uri("/db/x/y/z"))?;
  assert_eq!(z.id(), id);
  drop(z);

  let x = broker.open_collection(&uri("/db/x"), LockMode::Read)?.unwrap();
  assert!(x.has_child_collection(&broker, "y")?);
  assert_eq!(x.child_collection_count(&broker)?, 1);
  assert_eq!(x.descendants(&broker)?, [uri("/db/x/y"), uri("/db/x/y/z")]);
  drop(x);

  assert!(matches!(
    broker.get_or_create_collection(&txn, &uri("/other/a")),
    Err(Error::Invalid(_))
  ));
  assert_eq!(db.locks().table().held_count(), 0);
  OK
}

#[test]
fn test_snapshot_iteration() -> Void {
  info!("> iterators are copies taken under a read lock");
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = broker.get_or_create_collection(&txn, &uri("/db/a"))?;
  for name in ["x.xml", "y.xml"] {
    let info = coll.validate_xml_resource(&txn, &broker, name, XML)?;
    coll.store(&txn, &broker, info, Bytes::from_static(XML))?;
  }
  let docs = coll.iterator(&broker)?;
  let names = coll.collection_iterator(&broker)?;

  let info = coll.validate_xml_resource(&txn, &broker, "z.xml", XML)?;
  coll.store(&txn, &broker, info, Bytes::from_static(XML))?;
  broker.get_or_create_collection(&txn, &uri("/db/a/sub"))?;

  let seen: Vec<String> = docs.map(|d| d.name().to_owned()).collect();
  assert_eq!(seen, ["x.xml", "y.xml"]);
  assert_eq!(names.count(), 0);
  assert_eq!(coll.document_count(&broker)?, 3);
  assert_eq!(coll.collection_iterator(&broker)?.count(), 1);

  #[allow(deprecated)]
  let unlocked = coll.iterator_no_lock(&broker)?.count();
  assert_eq!(unlocked, 3);
  OK
}

#[test]
fn test_read_requires_lock() -> Void {
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/a");
  assert!(matches!(
    coll.get_document(&broker, "x.xml"),
    Err(Error::Lock(xdb_lock::Error::NotHeld { .. }))
  ));
  // snapshot iterators lock on their own
  assert_eq!(coll.iterator(&broker)?.count(), 0);
  OK
}

#[test]
fn test_store_document_and_read() -> Void {
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/a");

  let doc = coll.store_document(
    &txn,
    &broker,
    "x.xml",
    Bytes::from_static(XML),
    StoreOptions::default(),
  )?;
  assert!(doc.is_xml());
  assert_eq!(doc.uri.as_str(), "/db/a/x.xml");
  assert_eq!(doc.size, XML.len() as u64);
  assert_eq!(broker.read_content(&doc)?.as_ref(), XML);
  assert_eq!(db.locks().table().held_count(), 0);

  // replace allocates a new id and drops the old content
  let doc2 = coll.store_document(
    &txn,
    &broker,
    "x.xml",
    Bytes::from_static(b"<new/>"),
    StoreOptions::default(),
  )?;
  assert_ne!(doc.id, doc2.id);
  assert_eq!(store.content_count(), 1);

  let c = broker.open_collection(&uri("/db/a"), LockMode::Read)?.unwrap();
  let locked = c
    .get_document_with_lock(&broker, "x.xml", LockMode::Read)?
    .unwrap();
  assert_eq!(locked.id, doc2.id);
  assert!(db.locks().holds_document_lock(&uri("/db/a"), "x.xml", LockMode::Read));
  drop(locked);
  assert!(c.get_document_with_lock(&broker, "nope.xml", LockMode::Read)?.is_none());
  assert!(!db.locks().is_document_locked_for_read(&uri("/db/a"), "nope.xml"));
  drop(c);

  assert!(matches!(
    coll.store_document(
      &txn,
      &broker,
      "bad.xml",
      Bytes::from_static(b"plain"),
      StoreOptions::default()
    ),
    Err(Error::Invalid(_))
  ));
  OK
}

#[test]
fn test_validate_is_invisible_until_store() -> Void {
  info!("> a validated document is hidden and its name reserved");
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = broker.get_or_create_collection(&txn, &uri("/db/a"))?;

  let info = coll.validate_xml_resource(&txn, &broker, "x.xml", XML)?;
  assert_eq!(info.event(), TriggerEvent::CreateDocument);
  assert_eq!(info.lock().mode(), LockMode::Write);
  assert!(!coll.has_document(&broker, "x.xml")?);
  assert!(matches!(
    coll.validate_xml_resource(&txn, &broker, "x.xml", XML),
    Err(Error::Lock(xdb_lock::Error::Contention(_)))
  ));

  // dropping the info abandons the store
  drop(info);
  assert!(!db.locks().is_document_locked_for_write(&uri("/db/a"), "x.xml"));
  let info = coll.validate_xml_resource(&txn, &broker, "x.xml", XML)?;
  let doc = coll.store(&txn, &broker, info, Bytes::from_static(XML))?;
  assert!(coll.has_document(&broker, "x.xml")?);
  assert_eq!(coll.get_document(&broker, "x.xml")?, Some(doc));

  let info = coll.validate_xml_resource(&txn, &broker, "x.xml", XML)?;
  assert_eq!(info.event(), TriggerEvent::UpdateDocument);
  OK
}

type Gate = (mpsc::Sender<()>, mpsc::Receiver<()>);

/// MemStore whose document saves can fail and whose next upload can be held.
/// A held upload signals on the sender, then waits on the receiver.
///
/// 文档保存可失败、下一次上传可被挂起的 MemStore。
/// 被挂起的上传先通过 sender 通知，再等待 receiver。
#[derive(Default)]
struct HookStore {
  inner: MemStore,
  fail: AtomicBool,
  gate: Mutex<Option<Gate>>,
}

impl CollectionStore for HookStore {
  fn next_collection_id(&self) -> xdb_coll::Result<i32> {
    self.inner.next_collection_id()
  }

  fn next_document_id(&self) -> xdb_coll::Result<u32> {
    self.inner.next_document_id()
  }

  fn save_collection(
    &self,
    txn: &Txn,
    uri: &XmldbUri,
    id: i32,
    meta: Bytes,
  ) -> xdb_coll::Result<()> {
    self.inner.save_collection(txn, uri, id, meta)
  }

  fn load_collection(&self, uri: &XmldbUri) -> xdb_coll::Result<Option<Stored>> {
    self.inner.load_collection(uri)
  }

  fn reclaim_collection(&self, txn: &Txn, uri: &XmldbUri) -> xdb_coll::Result<()> {
    self.inner.reclaim_collection(txn, uri)
  }

  fn move_collection(&self, txn: &Txn, from: &XmldbUri, to: &XmldbUri) -> xdb_coll::Result<()> {
    self.inner.move_collection(txn, from, to)
  }

  fn load_documents(
    &self,
    uri: &XmldbUri,
    access: &mut InternalAccess<'_>,
  ) -> xdb_coll::Result<()> {
    self.inner.load_documents(uri, access)
  }

  fn save_document(&self, txn: &Txn, doc: &Document) -> xdb_coll::Result<()> {
    if self.fail.load(Ordering::SeqCst) {
      return Err(Error::Io(std::io::Error::other("disk full")));
    }
    self.inner.save_document(txn, doc)
  }

  fn remove_document(&self, txn: &Txn, doc: &Document) -> xdb_coll::Result<()> {
    self.inner.remove_document(txn, doc)
  }

  fn store_content(&self, txn: &Txn, doc_id: u32, content: Bytes) -> xdb_coll::Result<()> {
    let gate = self.gate.lock().take();
    if let Some((entered, resume)) = gate {
      let _ = entered.send(());
      let _ = resume.recv();
    }
    self.inner.store_content(txn, doc_id, content)
  }

  fn load_content(&self, doc_id: u32) -> xdb_coll::Result<Option<Bytes>> {
    self.inner.load_content(doc_id)
  }

  fn remove_content(&self, doc_id: u32) -> xdb_coll::Result<()> {
    self.inner.remove_content(doc_id)
  }
}

#[test]
fn test_failed_store_leaves_nothing() -> Void {
  info!("> a failing second phase publishes nothing and frees the name");
  let store = Arc::new(HookStore::default());
  let db = open(store.clone());
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/a");

  store.fail.store(true, Ordering::SeqCst);
  let r = coll.store_document(
    &txn,
    &broker,
    "x.xml",
    Bytes::from_static(XML),
    StoreOptions::default(),
  );
  assert!(matches!(r, Err(Error::Io(_))));
  assert_eq!(store.inner.content_count(), 0);
  assert_eq!(store.inner.document_count(), 0);
  assert_eq!(db.locks().table().held_count(), 0);

  let c = broker.open_collection(&uri("/db/a"), LockMode::Read)?.unwrap();
  assert!(!c.has_document(&broker, "x.xml")?);
  drop(c);

  store.fail.store(false, Ordering::SeqCst);
  coll.store_document(&txn, &broker, "x.xml", Bytes::from_static(XML), StoreOptions::default())?;
  assert_eq!(store.inner.document_count(), 1);
  OK
}

#[test]
fn test_binary_store_and_remove() -> Void {
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/bin");
  let png = Bytes::from_static(&[0x89, b'P', b'N', b'G', 0, 1, 2]);
  let doc = coll.store_document(
    &txn,
    &broker,
    "a.png",
    png.clone(),
    StoreOptions::binary("image/png"),
  )?;
  assert_eq!(doc.kind, ResourceKind::Binary);
  assert_eq!(doc.mime.as_str(), "image/png");
  assert_eq!(broker.read_content(&doc)?, png);

  let c = broker.open_collection(&uri("/db/bin"), LockMode::Write)?.unwrap();
  assert!(matches!(
    c.remove_xml_resource(&txn, &broker, "a.png"),
    Err(Error::Invalid(_))
  ));
  c.remove_binary_resource(&txn, &broker, "a.png")?;
  assert!(!c.has_document(&broker, "a.png")?);
  assert!(matches!(
    c.remove_resource(&txn, &broker, "a.png"),
    Err(Error::NotFound(_))
  ));
  assert_eq!(store.content_count(), 0);
  assert_eq!(store.document_count(), 0);
  OK
}

#[test]
fn test_binary_upload_holds_no_collection_lock() -> Void {
  info!("> writers lock the collection while a binary upload is in flight");
  let store = Arc::new(HookStore::default());
  let db = open(store.clone());
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/bin");
  mkdir(&broker, &txn, "/db/side");
  let (entered_tx, entered_rx) = mpsc::channel();
  let (resume_tx, resume_rx) = mpsc::channel();
  *store.gate.lock() = Some((entered_tx, resume_rx));

  let h = {
    let db = db.clone();
    let coll = coll.clone();
    thread::spawn(move || -> xdb_coll::Result<u32> {
      let broker = db.broker(Subject::system());
      let txn = broker.begin()?;
      let png = Bytes::from_static(&[0x89, b'P', b'N', b'G']);
      coll
        .store_document(&txn, &broker, "a.png", png, StoreOptions::binary("image/png"))
        .map(|d| d.id)
    })
  };

  entered_rx.recv()?;
  let bin = uri("/db/bin");
  assert!(db.locks().is_document_locked_for_write(&bin, "a.png"));
  assert!(!db.locks().is_collection_locked(&bin));
  let mut same = db.locks().acquire_collection_lock(&bin, LockMode::Write)?;
  let sibling = db.locks().acquire_collection_lock(&uri("/db/side"), LockMode::Write)?;
  // the document lock stays with the upload
  assert!(matches!(
    db.locks().attempt_document_lock(&bin, "a.png", LockMode::Write),
    Err(xdb_lock::Error::Busy { .. })
  ));
  drop(sibling);
  same.release()?;

  resume_tx.send(())?;
  let id = h.join().unwrap()?;
  let c = broker.open_collection(&bin, LockMode::Read)?.unwrap();
  assert_eq!(c.get_document(&broker, "a.png")?.map(|d| d.id), Some(id));
  drop(c);
  assert_eq!(db.locks().table().held_count(), 0);
  OK
}

#[test]
fn test_permission_denied_no_mutation() -> Void {
  info!("> guest may read but not write a 0o755 collection");
  let (db, store) = mem();
  let system = db.broker(Subject::system());
  let txn = system.begin()?;
  let coll = mkdir(&system, &txn, "/db/a");
  coll.store_document(&txn, &system, "x.xml", Bytes::from_static(XML), StoreOptions::default())?;
  let before = (store.document_count(), store.content_count());

  let guest = db.broker(Subject::guest());
  let gtxn = guest.begin()?;
  assert!(matches!(
    coll.store_document(&gtxn, &guest, "y.xml", Bytes::from_static(XML), StoreOptions::default()),
    Err(Error::PermissionDenied(_))
  ));
  assert!(matches!(
    coll.store_document(
      &gtxn,
      &guest,
      "x.xml",
      Bytes::from_static(b"<x/>"),
      StoreOptions::default()
    ),
    Err(Error::PermissionDenied(_))
  ));
  assert!(matches!(
    guest.get_or_create_collection(&gtxn, &uri("/db/a/g")),
    Err(Error::PermissionDenied(_))
  ));
  assert_eq!((store.document_count(), store.content_count()), before);
  assert_eq!(coll.iterator(&guest)?.count(), 1);

  let c = system.open_collection(&uri("/db/a"), LockMode::Write)?.unwrap();
  assert!(!c.has_child_collection(&system, "g")?);
  assert!(matches!(
    c.set_permissions(&guest, Permission::new(0, 0, 0o777)),
    Err(Error::PermissionDenied(_))
  ));
  assert!(matches!(
    c.set_created(&guest, 1),
    Err(Error::PermissionDenied(_))
  ));

  // an ACL entry grants the guest group write access
  let mut p = c.permissions();
  p.add_ace(AceAccess::Allowed, AceTarget::Group, GUEST_GROUP_ID, 2)?;
  c.set_permissions(&system, p)?;
  drop(c);
  coll.store_document(&gtxn, &guest, "y.xml", Bytes::from_static(XML), StoreOptions::default())?;
  assert_eq!(store.document_count(), 2);
  OK
}

#[test]
fn test_remove_collection_contention() -> Void {
  info!("> a foreign document lock below the subtree blocks removal");
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/a");
  coll.store_document(&txn, &broker, "d.xml", Bytes::from_static(XML), StoreOptions::default())?;

  let (held_tx, held_rx) = mpsc::channel();
  let (done_tx, done_rx) = mpsc::channel::<()>();
  let h = {
    let locks = db.locks().clone();
    thread::spawn(move || {
      let a = uri("/db/a");
      let c = locks.acquire_collection_lock(&a, LockMode::Read).unwrap();
      let d = locks.acquire_document_lock(&a, "d.xml", LockMode::Write).unwrap();
      drop(c);
      held_tx.send(()).unwrap();
      done_rx.recv().unwrap();
      drop(d);
    })
  };

  held_rx.recv()?;
  assert!(matches!(
    broker.remove_collection(&txn, &uri("/db/a")),
    Err(Error::Lock(xdb_lock::Error::Contention(_)))
  ));
  assert_eq!(store.collection_count(), 2);
  done_tx.send(())?;
  h.join().unwrap();

  broker.remove_collection(&txn, &uri("/db/a"))?;
  assert_eq!(store.collection_count(), 1);
  assert_eq!(store.content_count(), 0);
  assert!(broker.open_collection(&uri("/db/a"), LockMode::Read)?.is_none());
  let root = broker.open_collection(&uri("/db"), LockMode::Read)?.unwrap();
  assert!(root.is_empty(&broker)?);
  drop(root);

  assert!(matches!(
    broker.remove_collection(&txn, &uri("/db")),
    Err(Error::Invalid(_))
  ));
  assert!(matches!(
    broker.remove_collection(&txn, &uri("/db/a")),
    Err(Error::NotFound(_))
  ));
  OK
}

#[test]
fn test_move_collection() -> Void {
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let b = mkdir(&broker, &txn, "/db/a/b");
  mkdir(&broker, &txn, "/db/a/b/deep");
  mkdir(&broker, &txn, "/db/c");
  let doc = b.store_document(
    &txn,
    &broker,
    "x.xml",
    Bytes::from_static(XML),
    StoreOptions::default(),
  )?;

  assert!(matches!(
    broker.move_collection(&txn, &uri("/db/a"), &uri("/db/a/b"), "loop"),
    Err(Error::Invalid(_))
  ));
  let dest = broker.move_collection(&txn, &uri("/db/a/b"), &uri("/db/c"), "b2")?;
  assert_eq!(dest.as_str(), "/db/c/b2");
  assert_eq!(b.uri(), dest);
  assert_eq!(db.locks().table().held_count(), 0);

  let moved = broker.open_collection(&dest, LockMode::Read)?.unwrap();
  let d = moved.get_document(&broker, "x.xml")?.unwrap();
  assert_eq!(d.uri.as_str(), "/db/c/b2/x.xml");
  assert_eq!(broker.read_content(&d)?.as_ref(), XML);
  assert_eq!(d.id, doc.id);
  assert!(moved.has_child_collection(&broker, "deep")?);
  drop(moved);
  assert!(broker.open_collection(&uri("/db/c/b2/deep"), LockMode::Read)?.is_some());
  assert!(broker.open_collection(&uri("/db/a/b"), LockMode::Read)?.is_none());

  let a = broker.open_collection(&uri("/db/a"), LockMode::Read)?.unwrap();
  assert!(!a.has_child_collection(&broker, "b")?);
  drop(a);

  assert!(matches!(
    broker.move_collection(&txn, &uri("/db/c/b2"), &uri("/db/c"), "b2"),
    Err(Error::Exists(_))
  ));
  OK
}

#[test]
fn test_move_rejects_pending_store() -> Void {
  info!("> a collection with a validated but unstored document cannot move");
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  mkdir(&broker, &txn, "/db/c");
  let b = broker.get_or_create_collection(&txn, &uri("/db/a/b"))?;
  let coll = b.collection().clone();
  let info = coll.validate_xml_resource(&txn, &broker, "x.xml", XML)?;
  // only the document lock is left
  drop(b);

  assert!(matches!(
    broker.move_collection(&txn, &uri("/db/a/b"), &uri("/db/c"), "b2"),
    Err(Error::Lock(xdb_lock::Error::Contention(_)))
  ));
  assert!(matches!(
    broker.move_collection(&txn, &uri("/db/a"), &uri("/db/c"), "a2"),
    Err(Error::Lock(xdb_lock::Error::Contention(_)))
  ));
  assert_eq!(coll.uri().as_str(), "/db/a/b");

  let doc = coll.store(&txn, &broker, info, Bytes::from_static(XML))?;
  assert_eq!(doc.uri.as_str(), "/db/a/b/x.xml");
  assert_eq!(store.document_count(), 1);

  let dest = broker.move_collection(&txn, &uri("/db/a/b"), &uri("/db/c"), "b2")?;
  let moved = broker.open_collection(&dest, LockMode::Read)?.unwrap();
  let d = moved.get_document(&broker, "x.xml")?.unwrap();
  assert_eq!(d.uri.as_str(), "/db/c/b2/x.xml");
  OK
}

#[test]
fn test_store_after_rename_rejected() -> Void {
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let s = broker.get_or_create_collection(&txn, &uri("/db/s"))?;
  let coll = s.collection().clone();
  let info = coll.validate_xml_resource(&txn, &broker, "x.xml", XML)?;
  s.set_path(&broker, uri("/db/s2"), false)?;
  drop(s);
  assert!(matches!(
    coll.store(&txn, &broker, info, Bytes::from_static(XML)),
    Err(Error::Invalid(_))
  ));
  assert_eq!(store.document_count(), 0);
  assert_eq!(store.content_count(), 0);
  assert!(!db.locks().is_document_locked_for_write(&uri("/db/s"), "x.xml"));
  OK
}

#[test]
fn test_set_path_rejects_own_subtree() -> Void {
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let a = broker.get_or_create_collection(&txn, &uri("/db/a"))?;
  assert!(matches!(
    a.set_path(&broker, uri("/db/a/inner"), true),
    Err(Error::Invalid(_))
  ));
  a.set_path(&broker, uri("/db/a"), true)?;
  drop(a);
  let c = broker.open_collection(&uri("/db/a"), LockMode::Read)?.unwrap();
  assert!(matches!(
    c.set_path(&broker, uri("/db/z"), false),
    Err(Error::Lock(xdb_lock::Error::NotHeld { .. }))
  ));
  OK
}

#[test]
fn test_entries() -> Void {
  let (db, _) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let p = broker.get_or_create_collection(&txn, &uri("/db/p"))?;
  let mut perm = Permission::new(42, 7, 0o750);
  perm.add_ace(AceAccess::Denied, AceTarget::User, 9, 4)?;
  p.set_permissions(&broker, perm.clone())?;
  p.set_created(&broker, 1_700_000_000_000)?;
  broker.save_collection(&txn, &p)?;
  drop(p);
  let root = mkdir(&broker, &txn, "/db");
  root.store_document(&txn, &broker, "r.xml", Bytes::from_static(XML), StoreOptions::default())?;

  let r = broker.open_collection(&uri("/db"), LockMode::Read)?.unwrap();
  let entries = r.entries(&broker)?;
  assert_eq!(entries.len(), 2);
  assert!(entries[0].is_collection());
  assert_eq!(entries[0].name().as_str(), "p");
  assert_eq!(entries[0].permissions(), &perm);
  assert_eq!(entries[0].created(), 1_700_000_000_000);
  assert!(!entries[1].is_collection());
  assert_eq!(entries[1].uri().as_str(), "/db/r.xml");

  assert_eq!(r.child_collection_entry(&broker, "p")?, entries[0]);
  assert_eq!(r.resource_entry(&broker, "r.xml")?, entries[1]);
  assert!(matches!(
    r.resource_entry(&broker, "p"),
    Err(Error::NotFound(_))
  ));
  assert_eq!(r.all_docs(&broker, true)?.len(), 1);
  OK
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn prop_sub_collection_entry_reads_record(
    owner in any::<u32>(),
    group in 0u32..(1 << 20),
    mode in 0u16..0o10000,
    created in any::<i64>(),
    aces in proptest::collection::vec(
      (0u32..(1 << 20), 0u8..8, any::<bool>(), any::<bool>()),
      0..4,
    ),
    children in proptest::collection::btree_set("[a-z]{1,6}", 0..4),
  ) {
    let (db, _) = mem();
    let broker = db.broker(Subject::system());
    let txn = broker.begin().unwrap();
    for c in &children {
      mkdir(&broker, &txn, &format!("/db/p/{c}"));
    }
    let p = broker.get_or_create_collection(&txn, &uri("/db/p")).unwrap();
    let mut perm = Permission::new(owner, group, mode);
    for (id, m, user, allow) in aces {
      let target = if user { AceTarget::User } else { AceTarget::Group };
      let access = if allow { AceAccess::Allowed } else { AceAccess::Denied };
      perm.add_ace(access, target, id, m).unwrap();
    }
    p.set_permissions(&broker, perm.clone()).unwrap();
    p.set_created(&broker, created).unwrap();

    let mut buf = BytesMut::new();
    p.serialize(&mut buf);
    let mut e = CollectionEntry::sub_collection(uri("/db/p"), 0);
    e.read(&mut buf.freeze()).unwrap();
    prop_assert_eq!(e.permissions(), &perm);
    prop_assert_eq!(e.created(), created);

    broker.save_collection(&txn, &p).unwrap();
    let mut e = CollectionEntry::sub_collection(uri("/db/p"), 0);
    e.read_metadata(&broker).unwrap();
    prop_assert_eq!(e.permissions(), &perm);
  }
}

#[test]
fn test_entry_reads_truncated() -> Void {
  let mut e = CollectionEntry::sub_collection(uri("/db/p"), 0o755);
  assert!(matches!(
    e.read(&mut Bytes::from_static(&[0, 2, 1, b'a'])),
    Err(Error::Codec(_))
  ));
  assert_eq!(e.permissions().group(), DBA_GROUP_ID);
  OK
}

#[test]
fn test_acl_length_limit() -> Void {
  info!("> the acl holds at most {MAX_ACL_LENGTH} entries");
  let mut p = Permission::new(7, 3, 0o750);
  for id in 0..MAX_ACL_LENGTH as u32 {
    let access = if id % 2 == 0 { AceAccess::Allowed } else { AceAccess::Denied };
    p.add_ace(access, AceTarget::User, id, (id % 8) as u8)?;
  }
  assert_eq!(p.acl().len(), MAX_ACL_LENGTH);
  assert!(matches!(
    p.add_ace(AceAccess::Allowed, AceTarget::Group, 1, 4),
    Err(Error::PermissionDenied(_))
  ));
  assert_eq!(p.acl().len(), MAX_ACL_LENGTH);

  let mut buf = BytesMut::new();
  p.write(&mut buf);
  buf.extend_from_slice(b"tail");
  let mut bytes = buf.freeze();
  assert_eq!(Permission::read(&mut bytes)?, p);
  assert_eq!(bytes.as_ref(), b"tail");

  p.clear_acl();
  p.add_ace(AceAccess::Allowed, AceTarget::Group, 1, 4)?;
  OK
}

#[derive(Default)]
struct Veto {
  finished: AtomicUsize,
}

impl Trigger for Veto {
  fn prepare(&self, _txn: &Txn, event: TriggerEvent, uri: &XmldbUri) -> xdb_coll::Result<()> {
    if event == TriggerEvent::CreateDocument && uri.name().starts_with("no") {
      return Err(Error::Trigger(format!("vetoed {uri}").into()));
    }
    Ok(())
  }

  fn finish(&self, _txn: &Txn, _event: TriggerEvent, _uri: &XmldbUri) -> xdb_coll::Result<()> {
    self.finished.fetch_add(1, Ordering::SeqCst);
    Err(Error::Trigger("finish faults are only logged".into()))
  }
}

#[test]
fn test_trigger_veto() -> Void {
  let (db, store) = mem();
  let veto = Arc::new(Veto::default());
  db.triggers().register(veto.clone());
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/t");
  let created = veto.finished.load(Ordering::SeqCst);
  assert_eq!(created, 1);

  assert!(matches!(
    coll.store_document(&txn, &broker, "no.xml", Bytes::from_static(XML), StoreOptions::default()),
    Err(Error::Trigger(_))
  ));
  assert_eq!(store.document_count(), 0);
  coll.store_document(&txn, &broker, "yes.xml", Bytes::from_static(XML), StoreOptions::default())?;
  assert_eq!(veto.finished.load(Ordering::SeqCst), created + 1);

  db.triggers().clear();
  coll.store_document(&txn, &broker, "no.xml", Bytes::from_static(XML), StoreOptions::default())?;
  assert_eq!(store.document_count(), 2);
  OK
}

#[test]
fn test_closed_txn_and_db() -> Void {
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let mut txn = broker.begin()?;
  let coll = mkdir(&broker, &txn, "/db/a");
  txn.commit()?;
  assert!(matches!(
    coll.store_document(&txn, &broker, "x.xml", Bytes::from_static(XML), StoreOptions::default()),
    Err(Error::TxnClosed(_))
  ));
  assert!(txn.commit().is_err());
  assert_eq!(store.document_count(), 0);

  db.shutdown();
  assert!(!db.is_open());
  assert!(matches!(broker.begin(), Err(Error::Closed)));
  assert!(matches!(
    broker.open_collection(&uri("/db"), LockMode::Read),
    Err(Error::Closed)
  ));
  OK
}

#[test]
fn test_cache_eviction() -> Void {
  let store = Arc::new(MemStore::new());
  let db = Db::open(
    DbConf {
      cache_size: 2,
      ..conf()
    },
    store,
  )?;
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  for c in ["a", "b", "c", "d"] {
    mkdir(&broker, &txn, &format!("/db/{c}"));
  }
  assert_eq!(db.cache().len(), 2);
  assert!(db.cache().contains(&uri("/db/d")));
  // evicted collections load again from the store
  let a = broker.open_collection(&uri("/db/a"), LockMode::Read)?.unwrap();
  assert_eq!(a.uri().as_str(), "/db/a");
  OK
}

#[test]
fn test_conf_serde() -> Void {
  let c: DbConf = serde_json::from_str(r#"{"cache_size":8,"lock":{"timeout_ms":null}}"#)?;
  assert_eq!(c.cache_size, 8);
  assert_eq!(c.root, "/db");
  assert_eq!(c.collection_mode, 0o755);
  assert_eq!(c.lock.timeout_ms, None);
  assert!(c.lock.table);
  let s = serde_json::to_string(&DbConf::default())?;
  assert_eq!(serde_json::from_str::<DbConf>(&s)?, DbConf::default());
  OK
}

#[test]
fn test_add_and_unlink_document() -> Void {
  let (db, store) = mem();
  let broker = db.broker(Subject::system());
  let txn = broker.begin()?;
  let coll = broker.get_or_create_collection(&txn, &uri("/db/a"))?;
  let doc = Document {
    id: 99,
    uri: uri("/db/a/m.xml"),
    kind: ResourceKind::Xml,
    mime: xdb_coll::XML_MIME.into(),
    permissions: Permission::owned_by(broker.subject(), 0o644),
    created: 1,
    modified: 1,
    doctype: None,
    size: 0,
  };
  coll.add_document(&txn, &broker, doc.clone())?;
  assert!(coll.has_document(&broker, "m.xml")?);
  // table only, nothing persisted
  assert_eq!(store.document_count(), 0);

  let mut elsewhere = doc.clone();
  elsewhere.uri = uri("/db/b/m.xml");
  assert!(matches!(
    coll.add_document(&txn, &broker, elsewhere),
    Err(Error::Invalid(_))
  ));

  let gone = coll.unlink_document(&broker, &doc)?.unwrap();
  assert_eq!(gone.id, 99);
  assert!(!coll.has_document(&broker, "m.xml")?);
  assert!(coll.unlink_document(&broker, &doc)?.is_none());
  OK
}
