//! Lock events and holder table / 锁事件与持有者表

use std::{
  collections::BTreeMap,
  fmt::Write as _,
  sync::Arc,
  thread::{self, ThreadId},
};

use hipstr::HipStr;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::{LockMode, LockType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEventType {
  Attempt,
  AttemptFailed,
  Acquired,
  Released,
}

#[derive(Debug, Clone, Copy)]
pub struct LockEvent<'a> {
  pub kind: LockEventType,
  pub id: &'a str,
  pub lock_type: LockType,
  pub mode: LockMode,
  pub thread: ThreadId,
}

pub trait LockEventListener: Send + Sync {
  fn on_event(&self, event: &LockEvent<'_>);
}

/// Logs every event at debug level / 以 debug 级别记录所有事件
pub struct LogListener;

impl LockEventListener for LogListener {
  fn on_event(&self, e: &LockEvent<'_>) {
    debug!(
      "{:?} {:?} {} {:?} {:?}",
      e.kind, e.lock_type, e.id, e.mode, e.thread
    );
  }
}

/// One hold or pending attempt / 一个持有或等待中的请求
#[derive(Debug, Clone)]
pub struct Hold {
  pub lock_type: LockType,
  pub mode: LockMode,
  pub thread: ThreadId,
  pub thread_name: HipStr<'static>,
  /// Epoch ms / 毫秒时间戳
  pub since: u64,
}

type Holds = BTreeMap<HipStr<'static>, Vec<Hold>>;

#[derive(Default)]
struct Tracked {
  acquired: Holds,
  attempting: Holds,
}

pub struct LockTable {
  listeners: RwLock<Vec<Arc<dyn LockEventListener>>>,
  track: bool,
  tracked: Mutex<Tracked>,
}

fn hold(lock_type: LockType, mode: LockMode) -> Hold {
  let cur = thread::current();
  Hold {
    lock_type,
    mode,
    thread: cur.id(),
    thread_name: HipStr::from(cur.name().unwrap_or("-")),
    since: coarsetime::Clock::now_since_epoch().as_millis(),
  }
}

/// Remove the newest entry of this thread and mode / 删除该线程该模式的最新一条
fn take(holds: &mut Holds, id: &str, lock_type: LockType, mode: LockMode, me: ThreadId) {
  if let Some(v) = holds.get_mut(id) {
    if let Some(pos) = v
      .iter()
      .rposition(|h| h.thread == me && h.mode == mode && h.lock_type == lock_type)
    {
      v.remove(pos);
    }
    if v.is_empty() {
      holds.remove(id);
    }
  }
}

impl LockTable {
  /// `track` keeps a holder table for [`LockTable::state_string`]
  /// `track` 为 [`LockTable::state_string`] 维护持有者表
  pub fn new(track: bool) -> Self {
    Self {
      listeners: RwLock::new(Vec::new()),
      track,
      tracked: Mutex::new(Tracked::default()),
    }
  }

  pub fn register(&self, listener: Arc<dyn LockEventListener>) {
    self.listeners.write().push(listener);
  }

  pub fn deregister(&self, listener: &Arc<dyn LockEventListener>) {
    self
      .listeners
      .write()
      .retain(|l| !Arc::ptr_eq(l, listener));
  }

  fn emit(
    &self,
    kind: LockEventType,
    id: &HipStr<'static>,
    lock_type: LockType,
    mode: LockMode,
    me: ThreadId,
  ) {
    if self.track {
      let mut t = self.tracked.lock();
      match kind {
        LockEventType::Attempt => t
          .attempting
          .entry(id.clone())
          .or_default()
          .push(hold(lock_type, mode)),
        LockEventType::AttemptFailed => take(&mut t.attempting, id, lock_type, mode, me),
        LockEventType::Acquired => {
          take(&mut t.attempting, id, lock_type, mode, me);
          t.acquired
            .entry(id.clone())
            .or_default()
            .push(hold(lock_type, mode));
        }
        LockEventType::Released => take(&mut t.acquired, id, lock_type, mode, me),
      }
    }

    let listeners = self.listeners.read();
    if listeners.is_empty() {
      return;
    }
    let event = LockEvent {
      kind,
      id,
      lock_type,
      mode,
      thread: me,
    };
    for l in listeners.iter() {
      l.on_event(&event);
    }
  }

  pub fn attempt(&self, id: &HipStr<'static>, lock_type: LockType, mode: LockMode) {
    self.emit(LockEventType::Attempt, id, lock_type, mode, thread::current().id());
  }

  pub fn attempt_failed(&self, id: &HipStr<'static>, lock_type: LockType, mode: LockMode) {
    self.emit(
      LockEventType::AttemptFailed,
      id,
      lock_type,
      mode,
      thread::current().id(),
    );
  }

  pub fn acquired(&self, id: &HipStr<'static>, lock_type: LockType, mode: LockMode) {
    self.emit(LockEventType::Acquired, id, lock_type, mode, thread::current().id());
  }

  pub fn released(&self, id: &HipStr<'static>, lock_type: LockType, mode: LockMode) {
    self.released_by(id, lock_type, mode, thread::current().id());
  }

  /// Release of a hold acquired by `owner` / `owner` 所获取持有的释放
  pub fn released_by(
    &self,
    id: &HipStr<'static>,
    lock_type: LockType,
    mode: LockMode,
    owner: ThreadId,
  ) {
    self.emit(LockEventType::Released, id, lock_type, mode, owner);
  }

  /// Current holders of `id` (empty when tracking is off)
  /// `id` 当前的持有者（未开启跟踪时为空）
  pub fn holders(&self, id: &str) -> Vec<Hold> {
    self
      .tracked
      .lock()
      .acquired
      .get(id)
      .cloned()
      .unwrap_or_default()
  }

  /// Number of ids with at least one hold / 至少有一个持有者的锁数量
  pub fn held_count(&self) -> usize {
    self.tracked.lock().acquired.len()
  }

  /// Human readable dump of acquired and pending locks
  /// 已获取与等待中的锁的可读输出
  pub fn state_string(&self) -> String {
    let t = self.tracked.lock();
    let now = coarsetime::Clock::now_since_epoch().as_millis();
    let mut out = String::new();
    for (title, holds) in [("Acquired Locks", &t.acquired), ("Attempting Locks", &t.attempting)] {
      let _ = writeln!(out, "{title}");
      let _ = writeln!(out, "------------------------------------");
      for (id, v) in holds {
        let _ = writeln!(out, "{id}");
        for h in v {
          let _ = writeln!(
            out,
            "\t{:?} {:?} {} ({:?}) {}ms",
            h.lock_type,
            h.mode,
            h.thread_name,
            h.thread,
            now.saturating_sub(h.since)
          );
        }
      }
      out.push('\n');
    }
    out
  }
}

impl Default for LockTable {
  fn default() -> Self {
    Self::new(true)
  }
}
