//! Host test support
//!
//! [`ThreadScheduler`] runs each kernel task on its own OS thread. A task
//! that yields parks its thread until the task is Runnable again, which is
//! enough to exercise the wait and wakeup paths with real concurrency.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::kern::tcb::{TaskState, Tcb};
use crate::scheduler::{RunQueue, Scheduler};

/// How long a test may wait for another thread before giving up
const TIMEOUT: Duration = Duration::from_secs(10);

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Tcb>>> = const { RefCell::new(None) };
}

struct Inner {
    rq: Mutex<RunQueue>,
    wakeups: Condvar,
    yields: AtomicUsize,
    enqueued: AtomicUsize,
    reschedules: AtomicUsize,
}

/// Scheduler backed by one OS thread per task
#[derive(Clone)]
pub struct ThreadScheduler {
    inner: Arc<Inner>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rq: Mutex::new(RunQueue::new()),
                wakeups: Condvar::new(),
                yields: AtomicUsize::new(0),
                enqueued: AtomicUsize::new(0),
                reschedules: AtomicUsize::new(0),
            }),
        }
    }

    pub fn yields(&self) -> usize {
        self.inner.yields.load(Ordering::SeqCst)
    }

    pub fn enqueued(&self) -> usize {
        self.inner.enqueued.load(Ordering::SeqCst)
    }

    pub fn reschedules(&self) -> usize {
        self.inner.reschedules.load(Ordering::SeqCst)
    }

    pub fn runqueue_len(&self) -> usize {
        self.inner.rq.lock().unwrap().len()
    }
}

impl Scheduler for ThreadScheduler {
    fn prepare_sleep(&self, task: &Arc<Tcb>) {
        self.inner.rq.lock().unwrap().remove(task);
    }

    fn enqueue_runnable(&self, task: &Arc<Tcb>) {
        let mut rq = self.inner.rq.lock().unwrap();
        if !rq.contains(task) {
            rq.enqueue(task);
        }
        self.inner.enqueued.fetch_add(1, Ordering::SeqCst);
        drop(rq);
        self.inner.wakeups.notify_all();
    }

    fn yield_now(&self) {
        let current = CURRENT
            .with(|c| c.borrow().clone())
            .expect("yield_now called outside a task thread");
        self.inner.yields.fetch_add(1, Ordering::SeqCst);

        let deadline = Instant::now() + TIMEOUT;
        let mut rq = self.inner.rq.lock().unwrap();
        while current.state() != TaskState::Runnable {
            assert!(
                Instant::now() < deadline,
                "task {} was never woken",
                current.tid().0
            );
            // Short timeout: state can also change without an enqueue
            rq = self
                .inner
                .wakeups
                .wait_timeout(rq, Duration::from_millis(5))
                .unwrap()
                .0;
        }
    }

    fn reschedule_now(&self) {
        self.inner.reschedules.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
    }
}

/// Run `f` as `task` on a new thread
pub fn spawn_task<F, R>(sched: &ThreadScheduler, task: &Arc<Tcb>, f: F) -> JoinHandle<R>
where
    F: FnOnce(&Arc<Tcb>, &ThreadScheduler) -> R + Send + 'static,
    R: Send + 'static,
{
    let sched = sched.clone();
    let task = Arc::clone(task);
    thread::spawn(move || {
        CURRENT.with(|c| *c.borrow_mut() = Some(Arc::clone(&task)));
        f(&task, &sched)
    })
}

/// Poll `cond` until it holds; panics after a timeout
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}
