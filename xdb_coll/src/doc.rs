//! Documents and store options / 文档与存储选项

use std::{fmt, ops::Deref, sync::Arc};

use hipstr::HipStr;
use xdb_lock::ManagedLock;
use xdb_path::XmldbUri;

use crate::{Error, Permission, Result};

pub const XML_MIME: &str = "application/xml";
pub const BINARY_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
  Xml,
  Binary,
}

impl ResourceKind {
  pub fn of_mime(mime: &str) -> Self {
    let base = mime.split(';').next().unwrap_or(mime).trim();
    if base == "application/xml" || base == "text/xml" || base.ends_with("+xml") {
      Self::Xml
    } else {
      Self::Binary
    }
  }
}

/// Metadata of one stored resource, content lives in the store
/// 单个资源的元数据，内容保存在存储中
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
  pub id: u32,
  pub uri: XmldbUri,
  pub kind: ResourceKind,
  pub mime: HipStr<'static>,
  pub permissions: Permission,
  /// Epoch ms / 毫秒时间戳
  pub created: i64,
  pub modified: i64,
  pub doctype: Option<HipStr<'static>>,
  pub size: u64,
}

impl Document {
  #[inline]
  pub fn name(&self) -> &str {
    self.uri.name()
  }

  #[inline]
  pub fn is_xml(&self) -> bool {
    self.kind == ResourceKind::Xml
  }

  pub(crate) fn rebased(&self, from: &XmldbUri, to: &XmldbUri) -> Self {
    let mut d = self.clone();
    if let Some(u) = self.uri.rebase(from, to) {
      d.uri = u;
    }
    d
  }
}

/// Checks XML content before it is stored / 存储前检查 XML 内容
pub trait XmlReader: Send + Sync {
  fn validate(&self, uri: &XmldbUri, source: &[u8]) -> Result<()>;
}

/// Accepts non empty UTF-8 that starts with `<`
/// 接受以 `<` 开头的非空 UTF-8 内容
pub struct Utf8Reader;

impl XmlReader for Utf8Reader {
  fn validate(&self, uri: &XmldbUri, source: &[u8]) -> Result<()> {
    let invalid = |why: &str| Error::Invalid(HipStr::from(format!("{uri}: {why}")));
    let text = std::str::from_utf8(source).map_err(|_| invalid("not utf-8"))?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.is_empty() {
      return Err(invalid("empty"));
    }
    if !text.starts_with('<') {
      return Err(invalid("no root element"));
    }
    Ok(())
  }
}

/// Options of [`crate::Collection::store_document`]
/// [`crate::Collection::store_document`] 的选项
#[derive(Clone)]
pub struct StoreOptions {
  pub mime: HipStr<'static>,
  pub created: Option<i64>,
  pub modified: Option<i64>,
  /// Overrides default or inherited permission / 覆盖默认或继承的权限
  pub permission: Option<Permission>,
  /// Replacing a document keeps its created time / 替换文档时保留其创建时间
  pub preserve_metadata_on_copy: bool,
  pub doctype: Option<HipStr<'static>>,
  pub reader: Option<Arc<dyn XmlReader>>,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      mime: HipStr::from(XML_MIME),
      created: None,
      modified: None,
      permission: None,
      preserve_metadata_on_copy: false,
      doctype: None,
      reader: None,
    }
  }
}

impl StoreOptions {
  pub fn binary(mime: impl Into<HipStr<'static>>) -> Self {
    Self {
      mime: mime.into(),
      ..Self::default()
    }
  }

  #[inline]
  pub fn kind(&self) -> ResourceKind {
    ResourceKind::of_mime(&self.mime)
  }
}

impl fmt::Debug for StoreOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreOptions")
      .field("mime", &self.mime.as_str())
      .field("created", &self.created)
      .field("modified", &self.modified)
      .field("permission", &self.permission)
      .field("preserve_metadata_on_copy", &self.preserve_metadata_on_copy)
      .field("doctype", &self.doctype)
      .field("reader", &self.reader.is_some())
      .finish()
  }
}

/// Document bound to a lock held on it / 绑定了文档锁的文档
pub struct LockedDocument {
  doc: Arc<Document>,
  lock: ManagedLock,
}

impl LockedDocument {
  pub(crate) fn new(doc: Arc<Document>, lock: ManagedLock) -> Self {
    Self { doc, lock }
  }

  #[inline]
  pub fn document(&self) -> &Arc<Document> {
    &self.doc
  }

  #[inline]
  pub fn lock(&self) -> &ManagedLock {
    &self.lock
  }

  pub fn release(&mut self) -> Result<()> {
    Ok(self.lock.release()?)
  }
}

impl Deref for LockedDocument {
  type Target = Document;

  fn deref(&self) -> &Document {
    &self.doc
  }
}
