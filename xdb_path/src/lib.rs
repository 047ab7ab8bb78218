//! Collection path utilities / 集合路径工具
//!
//! Absolute, normalized paths: /db/a/b
//! 绝对、规范化的路径：/db/a/b
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{cmp::Ordering, fmt};

use hipstr::HipStr;
use thiserror::Error;

pub const SEP: char = '/';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
  #[error("empty path / 空路径")]
  Empty,

  #[error("not absolute: {0}")]
  NotAbsolute(HipStr<'static>),

  #[error("invalid segment `{0}`")]
  InvalidSegment(HipStr<'static>),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Absolute collection or document path / 集合或文档的绝对路径
///
/// Ordered segment by segment, so an ancestor always sorts before its descendants.
/// 按段比较，祖先总是排在后代之前。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct XmldbUri(HipStr<'static>);

impl XmldbUri {
  /// Parse and normalize / 解析并规范化
  pub fn new(path: &str) -> Result<Self> {
    if path.is_empty() {
      return Err(Error::Empty);
    }
    if !path.starts_with(SEP) {
      return Err(Error::NotAbsolute(HipStr::from(path)));
    }

    let mut out = String::with_capacity(path.len());
    for seg in path.split(SEP).filter(|s| !s.is_empty()) {
      check_segment(seg)?;
      out.push(SEP);
      out.push_str(seg);
    }
    if out.is_empty() {
      return Err(Error::Empty);
    }
    Ok(Self(HipStr::from(out)))
  }

  #[inline]
  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }

  /// Shared backing string, clone is cheap / 共享底层字符串，克隆开销低
  #[inline]
  pub fn as_hip(&self) -> &HipStr<'static> {
    &self.0
  }

  /// Path segments, root first / 路径段，从根开始
  #[inline]
  pub fn segments(&self) -> impl Iterator<Item = &str> {
    self.as_str()[1..].split(SEP)
  }

  #[inline]
  pub fn segment_count(&self) -> usize {
    self.segments().count()
  }

  /// Last segment / 最后一段
  pub fn name(&self) -> &str {
    match self.0.rfind(SEP) {
      Some(i) => &self.as_str()[i + 1..],
      None => self.as_str(),
    }
  }

  /// Single-segment paths are roots / 单段路径即根
  #[inline]
  pub fn is_root(&self) -> bool {
    self.0.rfind(SEP) == Some(0)
  }

  pub fn parent(&self) -> Option<Self> {
    match self.0.rfind(SEP) {
      Some(0) | None => None,
      Some(i) => Some(Self(self.0.slice(..i))),
    }
  }

  /// Child path / 子路径
  pub fn append(&self, name: &str) -> Result<Self> {
    let name = name.trim_matches(SEP);
    if name.is_empty() {
      return Err(Error::Empty);
    }
    let mut out = String::with_capacity(self.0.len() + name.len() + 1);
    out.push_str(self.as_str());
    for seg in name.split(SEP).filter(|s| !s.is_empty()) {
      check_segment(seg)?;
      out.push(SEP);
      out.push_str(seg);
    }
    Ok(Self(HipStr::from(out)))
  }

  /// Segment-aware prefix test, true for self / 按段前缀判断，自身也为 true
  pub fn starts_with(&self, prefix: &XmldbUri) -> bool {
    let (s, p) = (self.as_str(), prefix.as_str());
    s == p || (s.starts_with(p) && s.as_bytes()[p.len()] == SEP as u8)
  }

  /// Strict descendant / 严格后代
  #[inline]
  pub fn is_descendant_of(&self, ancestor: &XmldbUri) -> bool {
    self != ancestor && self.starts_with(ancestor)
  }

  /// Root to self inclusive / 从根到自身（含自身）
  pub fn ancestors(&self) -> Vec<XmldbUri> {
    let s = self.as_str();
    let mut out: Vec<XmldbUri> = s
      .match_indices(SEP)
      .skip(1)
      .map(|(i, _)| Self(self.0.slice(..i)))
      .collect();
    out.push(self.clone());
    out
  }

  /// Replace prefix `from` with `to`; None when self is outside `from`
  /// 将前缀 `from` 替换为 `to`；不在 `from` 之下时返回 None
  pub fn rebase(&self, from: &XmldbUri, to: &XmldbUri) -> Option<Self> {
    if !self.starts_with(from) {
      return None;
    }
    let rest = &self.as_str()[from.as_str().len()..];
    let mut out = String::with_capacity(to.as_str().len() + rest.len());
    out.push_str(to.as_str());
    out.push_str(rest);
    Some(Self(HipStr::from(out)))
  }
}

fn check_segment(seg: &str) -> Result<()> {
  if seg == "." || seg == ".." {
    return Err(Error::InvalidSegment(HipStr::from(seg)));
  }
  Ok(())
}

impl Ord for XmldbUri {
  fn cmp(&self, other: &Self) -> Ordering {
    self.segments().cmp(other.segments())
  }
}

impl PartialOrd for XmldbUri {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for XmldbUri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl fmt::Debug for XmldbUri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "XmldbUri({})", self.as_str())
  }
}

impl AsRef<str> for XmldbUri {
  fn as_ref(&self) -> &str {
    self.as_str()
  }
}

impl TryFrom<&str> for XmldbUri {
  type Error = Error;

  fn try_from(s: &str) -> Result<Self> {
    Self::new(s)
  }
}

impl std::str::FromStr for XmldbUri {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::new(s)
  }
}
