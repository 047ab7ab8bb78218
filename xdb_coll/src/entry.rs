//! Directory listing entries / 目录列表条目
//!
//! Cheap projections of a child collection or a document, filled without
//! loading the full subtree.
//! 子集合或文档的轻量投影，无需加载整棵子树。

use bytes::Buf;
use hipstr::HipStr;
use xdb_path::XmldbUri;

use crate::{
  Broker, Document, Error, Permission, Result,
  perm::{DBA_GROUP_ID, SYSTEM_ID},
  vbyte::{get_vint, get_vlong, skip, skip_utf},
};

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEntry {
  SubCollection {
    uri: XmldbUri,
    permissions: Permission,
    created: i64,
  },
  Document {
    uri: XmldbUri,
    permissions: Permission,
    created: i64,
  },
}

impl CollectionEntry {
  /// Placeholder permission until [`Self::read_metadata`] or [`Self::read`]
  /// 在 [`Self::read_metadata`] 或 [`Self::read`] 之前使用的默认权限
  pub fn sub_collection(uri: XmldbUri, mode: u16) -> Self {
    Self::SubCollection {
      uri,
      permissions: Permission::new(SYSTEM_ID, DBA_GROUP_ID, mode),
      created: 0,
    }
  }

  pub fn document(doc: &Document) -> Self {
    Self::Document {
      uri: doc.uri.clone(),
      permissions: doc.permissions.clone(),
      created: doc.created,
    }
  }

  #[inline]
  pub fn is_collection(&self) -> bool {
    matches!(self, Self::SubCollection { .. })
  }

  pub fn uri(&self) -> &XmldbUri {
    match self {
      Self::SubCollection { uri, .. } | Self::Document { uri, .. } => uri,
    }
  }

  pub fn permissions(&self) -> &Permission {
    match self {
      Self::SubCollection { permissions, .. } | Self::Document { permissions, .. } => permissions,
    }
  }

  pub fn created(&self) -> i64 {
    match self {
      Self::SubCollection { created, .. } | Self::Document { created, .. } => *created,
    }
  }

  /// Fill from the persisted record. Documents are filled at construction.
  /// 从持久化记录填充。文档条目在构造时已填充。
  pub fn read_metadata(&mut self, broker: &Broker) -> Result<()> {
    let uri = match self {
      Self::SubCollection { uri, .. } => uri.clone(),
      Self::Document { .. } => return Ok(()),
    };
    match broker.db().store().load_collection(&uri)? {
      Some(stored) => {
        let mut meta = stored.meta;
        self.read(&mut meta)
      }
      None => Err(Error::NotFound(uri.as_hip().clone())),
    }
  }

  /// `[u8 reserved][vint n][utf name]*n[permission][vlong created]`
  pub fn read(&mut self, buf: &mut impl Buf) -> Result<()> {
    let Self::SubCollection {
      permissions,
      created,
      ..
    } = self
    else {
      return Ok(());
    };
    skip(buf, 1)?;
    let n = get_vint(buf)?;
    for _ in 0..n {
      skip_utf(buf)?;
    }
    *permissions = Permission::read(buf)?;
    *created = get_vlong(buf)? as i64;
    Ok(())
  }

  pub fn name(&self) -> HipStr<'static> {
    HipStr::from(self.uri().name())
  }
}
