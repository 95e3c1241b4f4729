use crate::chess::Position;
use crate::search::{Control, Depth, Frame, History, MovePicker, RootMoves, Score};
use crate::search::{ThreadCount, TranspositionTable};
use crate::util::thread;
use derive_more::with_trait::Debug;
use shakmaty::Move;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// The flavour of a node in the search tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeKind {
    Root,
    Pv,
    NonPv,
}

impl NodeKind {
    /// Whether the node searches a full window.
    #[inline(always)]
    pub fn is_pv(&self) -> bool {
        !matches!(self, NodeKind::NonPv)
    }

    /// Whether the node is the root of the tree.
    #[inline(always)]
    pub fn is_root(&self) -> bool {
        matches!(self, NodeKind::Root)
    }
}

/// The state a search shares across all of its workers.
#[derive(Debug)]
pub struct SearchShared {
    pub ctrl: Control,
    pub tt: Arc<TranspositionTable>,
    pub history: History,
    pub root: Mutex<RootMoves>,
    pub pool: Arc<Pool>,
}

/// The mutable state of a split point, guarded by its lock.
#[derive(Debug)]
pub struct SplitShared {
    pub picker: MovePicker,
    pub alpha: Score,
    pub best_value: Score,
    pub best: Option<Move>,
    pub move_count: usize,
    pub slaves: u64,
}

/// A point in the tree where the remaining moves are searched in
/// parallel.
///
/// The record owns the move picker the workers draw from and a snapshot
/// of the master's position and stack frame; slaves clone the position
/// and re-enter the move loop with the shared state under the lock.
/// Split points form a tree across threads through the parent handle,
/// which the ancestor cut-off walk follows.
#[derive(Debug)]
pub struct SplitPoint {
    pub ctx: Arc<SearchShared>,
    pub parent: Option<Arc<SplitPoint>>,
    pub master: usize,
    pub kind: NodeKind,
    pub depth: Depth,
    pub beta: Score,
    pub ply: i32,
    pub multipv_idx: usize,
    pub single_pv: bool,
    pub threat: Option<Move>,
    pub frame: Frame,
    pub pos: Position,
    pub cutoff: AtomicBool,
    pub shared: Mutex<SplitShared>,
    pub done: Condvar,
}

impl SplitPoint {
    /// Whether this split point or any of its ancestors has cut off.
    pub fn cutoff_occurred(&self) -> bool {
        if self.cutoff.load(Relaxed) {
            return true;
        }

        let mut ancestor = &self.parent;
        while let Some(sp) = ancestor {
            if sp.cutoff.load(Relaxed) {
                return true;
            }

            ancestor = &sp.parent;
        }

        false
    }

    /// Detaches a slave, waking the master when it was the last one.
    pub fn release_slave(&self, thread: usize) {
        let mut shared = match self.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };

        shared.slaves &= !(1 << thread);

        if shared.slaves == 0 {
            self.done.notify_all();
        }
    }
}

/// The body a worker thread runs on an assigned split point.
pub type SplitHandler = std::sync::Arc<dyn Fn(usize, Arc<SplitPoint>) + Send + Sync>;

#[derive(Debug, Default)]
struct SlotState {
    idle: bool,
    terminate: bool,
    assignment: Option<Arc<SplitPoint>>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    wake: Condvar,
}

/// The fixed pool of helper threads.
///
/// Thread 0 is the main thread driving iterative deepening and is not
/// pooled; helpers park on their own condition variable until a master
/// hands them a split point.
#[derive(Debug)]
pub struct Pool {
    slots: Vec<Arc<Slot>>,
    #[debug(skip)]
    handles: Mutex<Vec<JoinHandle<()>>>,
    min_split_depth: Depth,
    fake_split: bool,
}

impl Pool {
    /// Spawns `threads - 1` helpers, each running the given handler on
    /// the split points assigned to it.
    pub fn new(threads: ThreadCount, handler: SplitHandler) -> Arc<Self> {
        Self::with_fake_split(threads, handler, false)
    }

    /// Like [`Self::new`], but in fake split mode the master performs
    /// split-point work synchronously, preserving the same state
    /// transitions in a single thread.
    pub fn with_fake_split(threads: ThreadCount, handler: SplitHandler, fake: bool) -> Arc<Self> {
        let slots: Vec<_> = (1..threads.get())
            .map(|_| Arc::new(Slot::default()))
            .collect();

        let pool = Arc::new(Pool {
            slots: slots.clone(),
            handles: Mutex::new(Vec::new()),
            min_split_depth: Depth::from_plies(4),
            fake_split: fake,
        });

        let mut handles = Vec::new();
        for (idx, slot) in slots.into_iter().enumerate() {
            let handler = handler.clone();
            let id = idx + 1;

            handles.push(thread::spawn(move || Self::idle_loop(id, slot, handler)));
        }

        if let Ok(mut guard) = pool.handles.lock() {
            *guard = handles;
        }

        pool
    }

    fn idle_loop(thread: usize, slot: Arc<Slot>, handler: SplitHandler) {
        loop {
            let sp = {
                let mut state = match slot.state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };

                loop {
                    if state.terminate {
                        return;
                    }

                    if let Some(sp) = state.assignment.take() {
                        state.idle = false;
                        break sp;
                    }

                    state.idle = true;
                    state = match slot.wake.wait(state) {
                        Ok(state) => state,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            };

            handler(thread, sp.clone());
            sp.release_slave(thread);
        }
    }

    /// The number of workers, the main thread included.
    pub fn threads(&self) -> usize {
        self.slots.len() + 1
    }

    /// The depth below which splitting is not worth its overhead.
    pub fn min_split_depth(&self) -> Depth {
        self.min_split_depth
    }

    /// Whether split-point work stays on the master thread.
    pub fn fake_split(&self) -> bool {
        self.fake_split
    }

    /// Whether an idle helper is available to join a split point.
    ///
    /// In fake split mode the answer is true whenever helpers exist so
    /// the split machinery still runs, merely without handing work out.
    pub fn available_slave_exists(&self) -> bool {
        if self.fake_split {
            return !self.slots.is_empty();
        }

        self.slots.iter().any(|slot| {
            slot.state
                .lock()
                .map(|s| s.idle && s.assignment.is_none() && !s.terminate)
                .unwrap_or(false)
        })
    }

    /// Hands a split point to every idle helper.
    ///
    /// The slave bits are set before the helpers wake so the master
    /// cannot observe an empty bitmap while work is still pending.
    pub fn assign_slaves(&self, sp: &Arc<SplitPoint>) -> usize {
        if self.fake_split {
            return 0;
        }

        let mut assigned = 0;

        for (idx, slot) in self.slots.iter().enumerate() {
            let thread = idx + 1;
            let Ok(mut state) = slot.state.lock() else {
                continue;
            };

            if state.idle && state.assignment.is_none() && !state.terminate {
                if let Ok(mut shared) = sp.shared.lock() {
                    shared.slaves |= 1 << thread;
                } else {
                    continue;
                }

                state.assignment = Some(sp.clone());
                assigned += 1;
                slot.wake.notify_one();
            }
        }

        assigned
    }

    /// Blocks the master until all slaves have left the split point.
    pub fn wait_for_slaves(&self, sp: &SplitPoint) {
        let mut shared = match sp.shared.lock() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };

        while shared.slaves != 0 {
            shared = match sp.done.wait(shared) {
                Ok(shared) => shared,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Ok(mut state) = slot.state.lock() {
                state.terminate = true;
            }

            slot.wake.notify_all();
        }

        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{HashSize, Limits};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn shared(pool: &Arc<Pool>) -> Arc<SearchShared> {
        Arc::new(SearchShared {
            ctrl: Control::new(Limits::none(), 0),
            tt: Arc::new(TranspositionTable::new(HashSize::new(1))),
            history: History::default(),
            root: Mutex::new(RootMoves::default()),
            pool: pool.clone(),
        })
    }

    fn split_point(ctx: Arc<SearchShared>) -> Arc<SplitPoint> {
        let pos = Position::default();
        let picker = MovePicker::main(&pos, None, &ctx.history, [None; 2]);

        Arc::new(SplitPoint {
            ctx,
            parent: None,
            master: 0,
            kind: NodeKind::NonPv,
            depth: Depth::from_plies(6),
            beta: Score::DRAW,
            ply: 2,
            multipv_idx: 0,
            single_pv: true,
            threat: None,
            frame: Frame::default(),
            pos,
            cutoff: AtomicBool::new(false),
            shared: Mutex::new(SplitShared {
                picker,
                alpha: -Score::INFINITE,
                best_value: -Score::INFINITE,
                best: None,
                move_count: 0,
                slaves: 0,
            }),
            done: Condvar::new(),
        })
    }

    #[test]
    fn helpers_park_and_terminate_cleanly() {
        let pool = Pool::new(ThreadCount::new(4), Arc::new(|_, _| {}));
        assert_eq!(pool.threads(), 4);

        std::thread::sleep(Duration::from_millis(20));
        assert!(pool.available_slave_exists());
        drop(pool);
    }

    #[test]
    fn a_single_thread_has_no_slaves() {
        let pool = Pool::new(ThreadCount::new(1), Arc::new(|_, _| {}));
        assert_eq!(pool.threads(), 1);
        assert!(!pool.available_slave_exists());
    }

    #[test]
    fn fake_split_mode_assigns_no_slaves() {
        let pool = Pool::with_fake_split(ThreadCount::new(4), Arc::new(|_, _| {}), true);
        std::thread::sleep(Duration::from_millis(20));
        assert!(pool.available_slave_exists());

        let sp = split_point(shared(&pool));
        assert_eq!(pool.assign_slaves(&sp), 0);
        assert_eq!(sp.shared.lock().map(|s| s.slaves).unwrap_or(u64::MAX), 0);
    }

    #[test]
    fn slaves_run_the_handler_and_release_their_bits() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = {
            let count = count.clone();
            Arc::new(move |_thread: usize, sp: Arc<SplitPoint>| {
                while sp.shared.lock().map(|mut s| s.picker.next()).ok().flatten().is_some() {
                    count.fetch_add(1, Relaxed);
                }
            })
        };

        let pool = Pool::new(ThreadCount::new(3), handler);
        std::thread::sleep(Duration::from_millis(20));

        let sp = split_point(shared(&pool));
        let assigned = pool.assign_slaves(&sp);
        assert!(assigned > 0);

        pool.wait_for_slaves(&sp);
        assert_eq!(count.load(Relaxed), 20);
        assert_eq!(sp.shared.lock().map(|s| s.slaves).unwrap_or(u64::MAX), 0);
    }

    #[test]
    fn cutoffs_propagate_from_ancestors() {
        let pool = Pool::new(ThreadCount::new(1), Arc::new(|_, _| {}));
        let ctx = shared(&pool);

        let parent = split_point(ctx.clone());
        let child = Arc::new(SplitPoint {
            parent: Some(parent.clone()),
            ..match Arc::try_unwrap(split_point(ctx)) {
                Ok(sp) => sp,
                Err(_) => unreachable!(),
            }
        });

        assert!(!child.cutoff_occurred());
        parent.cutoff.store(true, Relaxed);
        assert!(child.cutoff_occurred());
    }
}
