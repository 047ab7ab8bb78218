//! Variable-byte codec / 变长字节编码
//!
//! 7 bits per byte, low group first, high bit set on every byte but the last.
//! Strings are a vint byte length followed by UTF-8.
//!
//! 每字节 7 位，低位在前，除最后一个字节外最高位置 1。
//! 字符串为 vint 字节长度加 UTF-8 内容。

use bytes::{Buf, BufMut};
use hipstr::HipStr;

use crate::{Error, Result};

const TRUNCATED: Error = Error::Codec("truncated");

pub fn put_vint(buf: &mut impl BufMut, mut v: u32) {
  while v & !0x7f != 0 {
    buf.put_u8((v & 0x7f) as u8 | 0x80);
    v >>= 7;
  }
  buf.put_u8(v as u8);
}

pub fn put_vlong(buf: &mut impl BufMut, mut v: u64) {
  while v & !0x7f != 0 {
    buf.put_u8((v & 0x7f) as u8 | 0x80);
    v >>= 7;
  }
  buf.put_u8(v as u8);
}

pub fn put_utf(buf: &mut impl BufMut, s: &str) {
  put_vint(buf, s.len() as u32);
  buf.put_slice(s.as_bytes());
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8> {
  if !buf.has_remaining() {
    return Err(TRUNCATED);
  }
  Ok(buf.get_u8())
}

pub fn get_vlong(buf: &mut impl Buf) -> Result<u64> {
  let mut v = 0u64;
  let mut shift = 0u32;
  loop {
    let b = get_u8(buf)?;
    if shift > 63 {
      return Err(Error::Codec("varint overflow"));
    }
    v |= u64::from(b & 0x7f) << shift;
    if b & 0x80 == 0 {
      return Ok(v);
    }
    shift += 7;
  }
}

pub fn get_vint(buf: &mut impl Buf) -> Result<u32> {
  u32::try_from(get_vlong(buf)?).map_err(|_| Error::Codec("varint overflow"))
}

pub fn get_utf(buf: &mut impl Buf) -> Result<HipStr<'static>> {
  let n = get_vint(buf)? as usize;
  if buf.remaining() < n {
    return Err(TRUNCATED);
  }
  let raw = buf.copy_to_bytes(n);
  let s = std::str::from_utf8(&raw).map_err(|_| Error::Codec("utf8"))?;
  Ok(HipStr::from(s))
}

pub fn skip(buf: &mut impl Buf, n: usize) -> Result<()> {
  if buf.remaining() < n {
    return Err(TRUNCATED);
  }
  buf.advance(n);
  Ok(())
}

pub fn skip_utf(buf: &mut impl Buf) -> Result<()> {
  let n = get_vint(buf)? as usize;
  skip(buf, n)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_vint_bytes() {
    let mut b = Vec::new();
    put_vint(&mut b, 0x7f);
    put_vint(&mut b, 0x80);
    put_vint(&mut b, 300);
    assert_eq!(b, [0x7f, 0x80, 0x01, 0xac, 0x02]);

    let mut r = &b[..];
    assert_eq!(get_vint(&mut r).unwrap(), 0x7f);
    assert_eq!(get_vint(&mut r).unwrap(), 0x80);
    assert_eq!(get_vint(&mut r).unwrap(), 300);
    assert!(get_vint(&mut r).is_err());
  }

  #[test]
  fn test_negative_int_five_bytes() {
    let mut b = Vec::new();
    put_vint(&mut b, -1i32 as u32);
    assert_eq!(b.len(), 5);
    assert_eq!(get_vint(&mut &b[..]).unwrap() as i32, -1);
  }

  #[test]
  fn test_utf_truncated() {
    let mut b = Vec::new();
    put_utf(&mut b, "名字");
    assert_eq!(b[0], 6);
    assert!(get_utf(&mut &b[..4]).is_err());
    assert_eq!(get_utf(&mut &b[..]).unwrap().as_str(), "名字");
  }
}
