use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Which lane a decode request waits in. Visible requests are always
/// served before prefetch requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Visible,
    Prefetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeJob {
    pub path: PathBuf,
    pub generation: u64,
}

/// Blocking, de-duplicating work queue shared by the decode workers.
#[derive(Clone, Debug)]
pub struct ThumbRequestQueue {
    inner: Arc<ThumbQueueInner>,
}

#[derive(Debug)]
struct ThumbQueueInner {
    state: Mutex<ThumbQueueState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct ThumbQueueState {
    visible: VecDeque<PathBuf>,
    prefetch: VecDeque<PathBuf>,
    members: HashMap<PathBuf, Member>,
    closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    priority: Priority,
    generation: u64,
}

impl ThumbQueueState {
    fn lane(&mut self, priority: Priority) -> &mut VecDeque<PathBuf> {
        match priority {
            Priority::Visible => &mut self.visible,
            Priority::Prefetch => &mut self.prefetch,
        }
    }

    /// Bumps the generation of a queued path and promotes it to the visible
    /// lane if asked. Returns false when the path is not queued.
    fn update(&mut self, path: &Path, priority: Priority, generation: u64) -> bool {
        let Some(member) = self.members.get_mut(path) else {
            return false;
        };
        member.generation = member.generation.max(generation);
        if member.priority == Priority::Prefetch && priority == Priority::Visible {
            member.priority = Priority::Visible;
            if let Some(pos) = self.prefetch.iter().position(|p| p == path) {
                if let Some(moved) = self.prefetch.remove(pos) {
                    self.visible.push_back(moved);
                }
            }
        }
        true
    }
}

impl Default for ThumbRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbRequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ThumbQueueInner {
                state: Mutex::new(ThumbQueueState::default()),
                condvar: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThumbQueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `path`, or refreshes it if it is already waiting. Returns true
    /// when a new entry was added.
    pub fn enqueue(&self, path: PathBuf, priority: Priority, generation: u64) -> bool {
        let mut state = self.lock();
        if state.closed || state.update(&path, priority, generation) {
            return false;
        }
        state.members.insert(
            path.clone(),
            Member {
                priority,
                generation,
            },
        );
        state.lane(priority).push_back(path);
        self.inner.condvar.notify_one();
        true
    }

    /// Refreshes a path only if it is still waiting; never adds a new entry.
    pub fn refresh(&self, path: &Path, priority: Priority, generation: u64) -> bool {
        self.lock().update(path, priority, generation)
    }

    /// Blocks until a job is available. Returns `None` once closed.
    pub fn pop(&self) -> Option<DecodeJob> {
        let mut state = self.lock();
        loop {
            let next = match state.visible.pop_front() {
                Some(path) => Some(path),
                None => state.prefetch.pop_front(),
            };
            if let Some(path) = next {
                let generation = state
                    .members
                    .remove(&path)
                    .map(|member| member.generation)
                    .unwrap_or_default();
                return Some(DecodeJob { path, generation });
            }
            if state.closed {
                return None;
            }
            state = self
                .inner
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.visible.clear();
        state.prefetch.clear();
        state.members.clear();
        self.inner.condvar.notify_all();
    }
}
