//! Reentrant read / write lock keyed by path / 以路径为键的可重入读写锁
//!
//! Owner is the calling thread. A thread may re-take the mode it holds or a
//! weaker one; a writer may also take read holds. A reader asking for write is
//! refused with [`Error::Upgrade`], since two such readers would wait on each other.
//! Waiting writers block new readers that do not already hold the lock.
//!
//! 持有者为调用线程。线程可重复获取已持有或更弱的模式；写者还可获取读锁。
//! 只持有读锁的线程请求写锁会被 [`Error::Upgrade`] 拒绝。
//! 有写者等待时，未持有该锁的新读者需要等待。

use std::{
  collections::HashMap,
  sync::Arc,
  thread::{self, ThreadId},
  time::Instant,
};

use hipstr::HipStr;
use parking_lot::{Condvar, Mutex};

use crate::{Error, LockMode, LockType, Result};

#[derive(Default)]
struct State {
  /// Read hold count per thread / 每线程读锁计数
  readers: HashMap<ThreadId, u32>,
  writer: Option<ThreadId>,
  writes: u32,
  waiting: u32,
  waiting_writers: u32,
  /// Dropped from its registry, must not be granted again
  /// 已从注册表移除，不可再授予
  retired: bool,
}

impl State {
  fn grantable(&self, me: ThreadId, mode: LockMode) -> std::result::Result<bool, ()> {
    Ok(match mode {
      LockMode::NoLock => true,
      LockMode::Read => match self.writer {
        Some(w) => w == me,
        None => self.waiting_writers == 0 || self.readers.contains_key(&me),
      },
      LockMode::Write => match self.writer {
        Some(w) => w == me,
        None => {
          if self.readers.contains_key(&me) {
            return Err(());
          }
          self.readers.is_empty()
        }
      },
    })
  }

  fn idle(&self) -> bool {
    self.writer.is_none() && self.readers.is_empty() && self.waiting == 0
  }

  fn grant(&mut self, me: ThreadId, mode: LockMode) {
    match mode {
      LockMode::NoLock => {}
      LockMode::Read => *self.readers.entry(me).or_insert(0) += 1,
      LockMode::Write => {
        self.writer = Some(me);
        self.writes += 1;
      }
    }
  }
}

pub struct RwLock {
  id: HipStr<'static>,
  lock_type: LockType,
  state: Mutex<State>,
  cond: Condvar,
}

impl RwLock {
  pub fn new(id: impl Into<HipStr<'static>>, lock_type: LockType) -> Self {
    Self {
      id: id.into(),
      lock_type,
      state: Mutex::new(State::default()),
      cond: Condvar::new(),
    }
  }

  #[inline]
  pub fn id(&self) -> &HipStr<'static> {
    &self.id
  }

  #[inline]
  pub fn lock_type(&self) -> LockType {
    self.lock_type
  }

  fn upgrade_err(&self) -> Error {
    Error::Upgrade(self.id.clone())
  }

  fn retired_err(&self) -> Error {
    Error::Retired(self.id.clone())
  }

  /// Block until granted or `deadline` passes (None = forever)
  /// 阻塞直到获得锁或超过 `deadline`（None 表示一直等待）
  pub fn acquire(&self, mode: LockMode, deadline: Option<Instant>) -> Result<()> {
    if mode == LockMode::NoLock {
      return Ok(());
    }
    let me = thread::current().id();
    let start = Instant::now();
    let writer = mode == LockMode::Write;
    let mut st = self.state.lock();

    loop {
      if st.retired {
        return Err(self.retired_err());
      }
      match st.grantable(me, mode) {
        Ok(true) => {
          st.grant(me, mode);
          return Ok(());
        }
        Ok(false) => {}
        Err(()) => return Err(self.upgrade_err()),
      }

      st.waiting += 1;
      if writer {
        st.waiting_writers += 1;
      }
      let timed_out = match deadline {
        Some(d) => self.cond.wait_until(&mut st, d).timed_out(),
        None => {
          self.cond.wait(&mut st);
          false
        }
      };
      st.waiting -= 1;
      if writer {
        st.waiting_writers -= 1;
      }

      if timed_out {
        if let Ok(true) = st.grantable(me, mode) {
          st.grant(me, mode);
          return Ok(());
        }
        drop(st);
        // readers held back by this writer may proceed now
        // 被该写者阻挡的读者现在可以继续
        if writer {
          self.cond.notify_all();
        }
        return Err(Error::Timeout {
          id: self.id.clone(),
          lock_type: self.lock_type,
          mode,
          waited_ms: start.elapsed().as_millis() as u64,
        });
      }
    }
  }

  /// Grant without waiting / 不等待，立即尝试
  pub fn try_acquire(&self, mode: LockMode) -> Result<bool> {
    let me = thread::current().id();
    let mut st = self.state.lock();
    if st.retired {
      return Err(self.retired_err());
    }
    match st.grantable(me, mode) {
      Ok(true) => {
        st.grant(me, mode);
        Ok(true)
      }
      Ok(false) => Ok(false),
      Err(()) => Err(self.upgrade_err()),
    }
  }

  /// Release a hold of the calling thread / 释放调用线程的一个持有
  #[inline]
  pub fn release(&self, mode: LockMode) -> Result<()> {
    self.release_for(thread::current().id(), mode)
  }

  /// Release a hold taken by `owner`, which may be another thread than the caller
  /// 释放 `owner` 获取的持有，`owner` 可以不是调用线程
  pub fn release_for(&self, owner: ThreadId, mode: LockMode) -> Result<()> {
    let not_held = || Error::NotHeld {
      id: self.id.clone(),
      mode,
    };
    {
      let mut st = self.state.lock();
      match mode {
        LockMode::NoLock => return Ok(()),
        LockMode::Read => {
          let n = st.readers.get_mut(&owner).ok_or_else(not_held)?;
          *n -= 1;
          if *n == 0 {
            st.readers.remove(&owner);
          }
        }
        LockMode::Write => {
          if st.writer != Some(owner) {
            return Err(not_held());
          }
          st.writes -= 1;
          if st.writes == 0 {
            st.writer = None;
          }
        }
      }
    }
    self.cond.notify_all();
    Ok(())
  }

  pub fn is_locked_for_read(&self) -> bool {
    !self.state.lock().readers.is_empty()
  }

  pub fn is_locked_for_write(&self) -> bool {
    self.state.lock().writer.is_some()
  }

  pub fn is_locked(&self) -> bool {
    let st = self.state.lock();
    st.writer.is_some() || !st.readers.is_empty()
  }

  pub fn has_queued_threads(&self) -> bool {
    self.state.lock().waiting > 0
  }

  pub fn is_retired(&self) -> bool {
    self.state.lock().retired
  }

  /// Mark retired when idle and `self` plus the registry are the only
  /// references left. Later acquires fail with [`Error::Retired`].
  ///
  /// 空闲且只剩 `self` 与注册表两个引用时标记为已回收，之后的获取返回 [`Error::Retired`]。
  pub(crate) fn retire(self: &Arc<Self>) -> bool {
    let mut st = self.state.lock();
    if st.retired {
      return true;
    }
    if st.idle() && Arc::strong_count(self) <= 2 {
      st.retired = true;
    }
    st.retired
  }

  /// Total read holds across threads / 所有线程的读锁总数
  pub fn read_count(&self) -> u32 {
    self.state.lock().readers.values().sum()
  }

  /// Whether the calling thread holds at least `mode`
  /// 调用线程是否至少持有 `mode`
  pub fn is_held_by_current(&self, mode: LockMode) -> bool {
    let me = thread::current().id();
    let st = self.state.lock();
    let write = st.writer == Some(me);
    match mode {
      LockMode::NoLock => true,
      LockMode::Read => write || st.readers.contains_key(&me),
      LockMode::Write => write,
    }
  }

  /// Whether any other thread holds this lock / 是否有其他线程持有此锁
  pub fn is_held_by_other(&self) -> bool {
    let me = thread::current().id();
    let st = self.state.lock();
    st.writer.is_some_and(|w| w != me) || st.readers.keys().any(|t| *t != me)
  }
}
