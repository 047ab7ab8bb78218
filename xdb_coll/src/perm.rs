//! Unix style permission with ACL / 带 ACL 的 Unix 风格权限
//!
//! Persisted as `[vlong vector][u8 acl count][vint ace]*`.
//!
//! vector: `owner(32) setuid(1) user(3) group(20) setgid(1) group_mode(3) sticky(1) other(3)`
//! ace: `target(3) id(20) mode(3) access(3)`
//!
//! ACL entries are checked first, then the unix bits. DBA always passes.
//! 先检查 ACL，再检查 unix 位。DBA 始终通过。

use bytes::{Buf, BufMut};
use hipstr::HipStr;

use crate::{
  Error, Result,
  vbyte::{get_u8, get_vint, get_vlong, put_vint, put_vlong},
};

pub const READ: u8 = 4;
pub const WRITE: u8 = 2;
pub const EXECUTE: u8 = 1;

pub const SYSTEM_ID: u32 = 1_048_575;
pub const ADMIN_ID: u32 = 1_048_574;
pub const GUEST_ID: u32 = 1_048_573;
pub const DBA_GROUP_ID: u32 = 1;
pub const GUEST_GROUP_ID: u32 = 2;

/// ACL entries per permission, the count is stored in one byte
/// 每个权限的 ACL 条目上限，条目数以一个字节存储
pub const MAX_ACL_LENGTH: usize = 255;

const ID_MASK: u32 = 0xF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AceTarget {
  User = 1,
  Group = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AceAccess {
  Denied = 1,
  Allowed = 2,
}

/// Acting user / 当前操作用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
  pub id: u32,
  pub name: HipStr<'static>,
  pub groups: Vec<u32>,
}

impl Subject {
  pub fn new(id: u32, name: impl Into<HipStr<'static>>, groups: Vec<u32>) -> Self {
    Self {
      id,
      name: name.into(),
      groups,
    }
  }

  pub fn system() -> Self {
    Self::new(SYSTEM_ID, "SYSTEM", vec![DBA_GROUP_ID])
  }

  pub fn guest() -> Self {
    Self::new(GUEST_ID, "guest", vec![GUEST_GROUP_ID])
  }

  #[inline]
  pub fn is_dba(&self) -> bool {
    self.groups.contains(&DBA_GROUP_ID)
  }

  #[inline]
  pub fn primary_group(&self) -> u32 {
    self.groups.first().copied().unwrap_or(GUEST_GROUP_ID)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
  owner: u32,
  group: u32,
  /// `special(3) user(3) group(3) other(3)`, e.g. 0o755
  mode: u16,
  acl: Vec<u32>,
}

impl Permission {
  pub fn new(owner: u32, group: u32, mode: u16) -> Self {
    Self {
      owner,
      group: group & ID_MASK,
      mode: mode & 0o7777,
      acl: Vec::new(),
    }
  }

  /// Owned by `subject` and its primary group / 属于 `subject` 及其主组
  pub fn owned_by(subject: &Subject, mode: u16) -> Self {
    Self::new(subject.id, subject.primary_group(), mode)
  }

  #[inline]
  pub fn owner(&self) -> u32 {
    self.owner
  }

  #[inline]
  pub fn group(&self) -> u32 {
    self.group
  }

  #[inline]
  pub fn mode(&self) -> u16 {
    self.mode
  }

  #[inline]
  pub fn acl(&self) -> &[u32] {
    &self.acl
  }

  pub fn set_owner(&mut self, owner: u32) {
    self.owner = owner;
  }

  pub fn set_group(&mut self, group: u32) {
    self.group = group & ID_MASK;
  }

  pub fn set_mode(&mut self, mode: u16) {
    self.mode = mode & 0o7777;
  }

  pub fn add_ace(
    &mut self,
    access: AceAccess,
    target: AceTarget,
    id: u32,
    mode: u8,
  ) -> Result<()> {
    if self.acl.len() >= MAX_ACL_LENGTH {
      return Err(Error::PermissionDenied(HipStr::from(format!(
        "acl is full / ACL 已满: {MAX_ACL_LENGTH}"
      ))));
    }
    self.acl.push(
      (target as u32) << 26 | (id & ID_MASK) << 6 | u32::from(mode & 7) << 3 | access as u32,
    );
    Ok(())
  }

  pub fn clear_acl(&mut self) {
    self.acl.clear();
  }

  pub fn vector(&self) -> u64 {
    let m = u64::from(self.mode);
    let (special, user, group, other) = ((m >> 9) & 7, (m >> 6) & 7, (m >> 3) & 7, m & 7);
    u64::from(self.owner) << 32
      | (special >> 2 & 1) << 31
      | user << 28
      | u64::from(self.group & ID_MASK) << 8
      | (special >> 1 & 1) << 7
      | group << 4
      | (special & 1) << 3
      | other
  }

  pub fn from_vector(v: u64) -> Self {
    let special = (v >> 31 & 1) << 2 | (v >> 7 & 1) << 1 | (v >> 3 & 1);
    let mode = special << 9 | (v >> 28 & 7) << 6 | (v >> 4 & 7) << 3 | (v & 7);
    Self {
      owner: (v >> 32) as u32,
      group: (v >> 8) as u32 & ID_MASK,
      mode: mode as u16,
      acl: Vec::new(),
    }
  }

  /// Whether `subject` has every bit of `mode` / `subject` 是否拥有 `mode` 的全部权限
  pub fn validate(&self, subject: &Subject, mode: u8) -> bool {
    if subject.is_dba() {
      return true;
    }
    let mode = u32::from(mode & 7);

    for &ace in &self.acl {
      let target = ace >> 26;
      let id = (ace >> 6) & ID_MASK;
      let ace_mode = (ace >> 3) & 7;
      let allowed = ace & 7 == AceAccess::Allowed as u32;
      let hit = if target & AceTarget::User as u32 != 0 {
        id == subject.id
      } else if target & AceTarget::Group as u32 != 0 {
        subject.groups.contains(&id)
      } else {
        false
      };
      if hit && ace_mode & mode == mode {
        return allowed;
      }
    }

    let bits = u32::from(self.mode);
    if subject.id == self.owner {
      return (bits >> 6) & mode == mode;
    }
    if subject.groups.contains(&self.group) {
      return (bits >> 3) & mode == mode;
    }
    bits & mode == mode
  }

  pub(crate) fn check(&self, subject: &Subject, mode: u8, target: &str) -> Result<()> {
    if self.validate(subject, mode) {
      return Ok(());
    }
    Err(Error::PermissionDenied(HipStr::from(format!(
      "{} ({}) needs {} on {target}",
      subject.name,
      subject.id,
      mode_str(mode)
    ))))
  }

  pub fn write(&self, buf: &mut impl BufMut) {
    put_vlong(buf, self.vector());
    buf.put_u8(self.acl.len() as u8);
    for &ace in &self.acl {
      put_vint(buf, ace);
    }
  }

  pub fn read(buf: &mut impl Buf) -> Result<Self> {
    let mut p = Self::from_vector(get_vlong(buf)?);
    let n = get_u8(buf)?;
    p.acl = (0..n).map(|_| get_vint(buf)).collect::<Result<_>>()?;
    Ok(p)
  }
}

fn mode_str(mode: u8) -> String {
  [(READ, 'r'), (WRITE, 'w'), (EXECUTE, 'x')]
    .iter()
    .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
    .collect()
}
