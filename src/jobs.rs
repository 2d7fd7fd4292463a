/*
 * mailcache - jobs executor
 *
 * Copyright 2020 Manos Pitsidianakis
 *
 * This file is part of mailcache.
 *
 * mailcache is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mailcache is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mailcache. If not, see <http://www.gnu.org/licenses/>.
 */

/*!
 * Job executor thread pools.
 *
 * Three submission lanes exist: an unordered work-stealing pool sized to
 * the machine, and two single-thread FIFO lanes ("fast" and "slow") whose
 * jobs run strictly in submission order. A fourth lane,
 * [`JobExecutor::push_main_loop`], queues work for the thread that drives
 * the [`MainLoop`](crate::mainloop::MainLoop).
 *
 * Every submission returns a [`JoinHandle`] holding a oneshot receiver for
 * the job's result and a shared cancellation flag. Cancellation is
 * cooperative: a job that has not been picked up yet is dropped at pickup,
 * a running job has to poll [`JobContext::is_cancelled`].
 */

use std::{
    borrow::Cow,
    iter,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use crossbeam::{
    channel,
    channel::Sender,
    deque::{Injector, Stealer, Worker},
    sync::{Parker, Unparker},
};
pub use futures::channel::oneshot;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::datetime::{self, UnixTimestamp};
use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::MainLoopEvent;

#[derive(Clone, Debug)]
struct FinishedTimestamp(Arc<Mutex<UnixTimestamp>>);

impl FinishedTimestamp {
    fn finished(&self) -> Option<UnixTimestamp> {
        match self.0.lock() {
            Ok(v) if *v == 0 => None,
            Ok(v) => Some(*v),
            Err(poison) => {
                // The worker panicked mid-update; treat the job as
                // finished now.
                let mut guard = poison.into_inner();
                if *guard == 0 {
                    *guard = datetime::now();
                }
                Some(*guard)
            }
        }
    }

    fn set_finished(&self, new_value: Option<UnixTimestamp>) {
        let new_value = new_value.unwrap_or_default();
        match self.0.lock() {
            Ok(mut f) => *f = new_value,
            Err(poison) => {
                let mut guard = poison.into_inner();
                *guard = new_value;
            }
        }
    }
}

fn find_task(
    local: &Worker<CacheTask>,
    global: &Injector<CacheTask>,
    stealers: &[Stealer<CacheTask>],
) -> Option<CacheTask> {
    // Pop a task from the local queue, if not empty.
    local.pop().or_else(|| {
        // Otherwise, we need to look for a task elsewhere.
        iter::repeat_with(|| {
            // Try stealing a batch of tasks from the global queue.
            global
                .steal_batch_and_pop(local)
                // Or try stealing a task from one of the other threads.
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        // Loop while no task was stolen and any steal operation needs to be retried.
        .find(|s| !s.is_retry())
        // Extract the stolen task, if there is one.
        .and_then(|s| s.success())
    })
}

macro_rules! uuid_hash_type {
    ($n:ident) => {
        #[derive(PartialEq, Hash, Eq, Copy, Clone, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $n(Uuid);

        impl std::fmt::Debug for $n {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::fmt::Display for $n {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $n {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $n {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
            pub fn null() -> Self {
                Self(Uuid::nil())
            }
        }
    };
}
uuid_hash_type!(JobId);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// Passed to every running job for cooperative cancellation checks.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: Arc<AtomicBool>,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A submitted job and its current state.
pub struct CacheTask {
    work: Box<dyn FnOnce(&JobContext) + Send + 'static>,
    id: JobId,
    desc: Cow<'static, str>,
    cancel: Arc<AtomicBool>,
    finished: FinishedTimestamp,
    sender: Sender<MainLoopEvent>,
}

impl std::fmt::Debug for CacheTask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CacheTask")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .finish()
    }
}

impl CacheTask {
    /// Runs the job, or drops it if it was cancelled before pickup. Either
    /// way the owning loop is told the job is done with.
    pub(crate) fn run(self) {
        let Self {
            work,
            id,
            desc: _,
            cancel,
            finished,
            sender,
        } = self;
        let ctx = JobContext { cancel };
        if !ctx.is_cancelled() {
            work(&ctx);
        }
        finished.set_finished(Some(datetime::now()));
        let _ = sender.send(MainLoopEvent::JobFinished(id));
    }
}

#[derive(Clone, Debug)]
/// A submitted job's metadata for book-keeping.
pub struct JobMetadata {
    id: JobId,
    desc: Cow<'static, str>,
    started: UnixTimestamp,
    finished: FinishedTimestamp,
    succeeded: bool,
    cancel: Arc<AtomicBool>,
}

impl JobMetadata {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.desc
    }

    pub fn started(&self) -> UnixTimestamp {
        self.started
    }

    pub fn finished(&self) -> Option<UnixTimestamp> {
        self.finished.finished()
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }
}

/// A main-loop job plus its scheduling key. Higher priority runs first,
/// submission order breaks ties.
struct QueuedTask {
    priority: JobPriority,
    seq: u64,
    task: CacheTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct OrderedLane {
    name: &'static str,
    sender: Mutex<Option<Sender<CacheTask>>>,
}

impl OrderedLane {
    const fn new(name: &'static str) -> Self {
        OrderedLane {
            name,
            sender: Mutex::new(None),
        }
    }

    /// The lane thread is spawned on first submission and lives for the
    /// process lifetime; jobs on it run strictly in submission order.
    fn submit(&self, task: CacheTask) {
        let mut guard = self.sender.lock().unwrap();
        let name = self.name;
        let sender = guard.get_or_insert_with(|| {
            let (tx, rx) = channel::unbounded::<CacheTask>();
            thread::Builder::new()
                .name(format!("mailcache-{}", name))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        let id = task.id;
                        let desc = task.desc.clone();
                        log::trace!("{} lane got task {:?} {:?}", name, desc, id);
                        let _ = catch_unwind(AssertUnwindSafe(|| task.run()));
                        log::trace!("{} lane returned after {:?} {:?}", name, desc, id);
                    }
                })
                .unwrap();
            tx
        });
        let _ = sender.send(task);
    }
}

#[derive(Debug)]
pub struct JobExecutor {
    global_queue: Arc<Injector<CacheTask>>,
    workers: Vec<Stealer<CacheTask>>,
    sender: Sender<MainLoopEvent>,
    parkers: Vec<Unparker>,
    fast_lane: OrderedLane,
    slow_lane: OrderedLane,
    main_loop_queue: Arc<Mutex<std::collections::BinaryHeap<QueuedTask>>>,
    main_loop_seq: AtomicU64,
    pub jobs: Arc<Mutex<IndexMap<JobId, JobMetadata>>>,
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("task", &self.task)
            .finish()
    }
}

impl JobExecutor {
    /// A queue that holds scheduled jobs.
    pub fn new(sender: Sender<MainLoopEvent>) -> Self {
        // Create a queue.
        let mut ret = Self {
            global_queue: Arc::new(Injector::new()),
            workers: vec![],
            parkers: vec![],
            sender,
            fast_lane: OrderedLane::new("fast"),
            slow_lane: OrderedLane::new("slow"),
            main_loop_queue: Arc::new(Mutex::new(std::collections::BinaryHeap::new())),
            main_loop_seq: AtomicU64::new(0),
            jobs: Arc::new(Mutex::new(IndexMap::default())),
        };
        let mut workers = vec![];
        for _ in 0..thread::available_parallelism()
            .map(Into::into)
            .unwrap_or(1)
        {
            let new_worker = Worker::new_fifo();
            ret.workers.push(new_worker.stealer());
            let p = Parker::new();
            ret.parkers.push(p.unparker().clone());
            workers.push((new_worker, p));
        }

        // Spawn executor threads the first time the queue is created.
        for (i, (local, parker)) in workers.into_iter().enumerate() {
            let global = ret.global_queue.clone();
            let stealers = ret.workers.clone();
            thread::Builder::new()
                .name(format!("mailcache-executor-{i}"))
                .spawn(move || loop {
                    parker.park_timeout(Duration::from_millis(100));
                    let task = find_task(&local, &global, stealers.as_slice());
                    if let Some(task) = task {
                        let id = task.id;
                        let desc = task.desc.clone();
                        log::trace!("Worker {} got task {:?} {:?}", i, desc, id);
                        let _ = catch_unwind(AssertUnwindSafe(|| task.run()));
                        log::trace!("Worker {} returned after {:?} {:?}", i, desc, id);
                    }
                })
                .unwrap();
        }
        ret
    }

    fn new_task<F, R>(
        &self,
        desc: Cow<'static, str>,
        work: F,
    ) -> (CacheTask, JoinHandle<R>)
    where
        F: FnOnce(&JobContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_sender, receiver) = oneshot::channel();
        let job_id = JobId::new();
        // We do not use `AtomicU64` because it's not portable, so ignore the lint.
        #[allow(clippy::mutex_integer)]
        let finished = FinishedTimestamp(Arc::new(Mutex::new(0)));
        let cancel = Arc::new(AtomicBool::new(false));

        self.jobs.lock().unwrap().insert(
            job_id,
            JobMetadata {
                id: job_id,
                desc: desc.clone(),
                started: datetime::now(),
                finished: finished.clone(),
                succeeded: true,
                cancel: cancel.clone(),
            },
        );

        let task = CacheTask {
            work: Box::new(move |ctx: &JobContext| {
                let res = work(ctx);
                let _ = result_sender.send(res);
            }),
            id: job_id,
            desc,
            cancel: cancel.clone(),
            finished: finished.clone(),
            sender: self.sender.clone(),
        };

        (
            task,
            JoinHandle {
                chan: receiver,
                cancel,
                finished,
                job_id,
            },
        )
    }

    /// Submits a job to the work-stealing pool; jobs on it run in no
    /// particular order relative to each other.
    pub fn submit_unordered<F, R>(&self, desc: Cow<'static, str>, work: F) -> JoinHandle<R>
    where
        F: FnOnce(&JobContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = self.new_task(desc, work);
        self.global_queue.push(task);
        for unparker in self.parkers.iter() {
            unparker.unpark();
        }
        handle
    }

    /// Submits a job to the fast ordered lane, for work that is expected
    /// to finish quickly (summary reads, count updates).
    pub fn submit_fast_ordered<F, R>(&self, desc: Cow<'static, str>, work: F) -> JoinHandle<R>
    where
        F: FnOnce(&JobContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = self.new_task(desc, work);
        self.fast_lane.submit(task);
        handle
    }

    /// Submits a job to the slow ordered lane, for work that may block on
    /// the network for a long time.
    pub fn submit_slow_ordered<F, R>(&self, desc: Cow<'static, str>, work: F) -> JoinHandle<R>
    where
        F: FnOnce(&JobContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = self.new_task(desc, work);
        self.slow_lane.submit(task);
        handle
    }

    /// Queues a job for the owning thread. Jobs run at the next
    /// [`MainLoop`](crate::mainloop::MainLoop) tick, highest priority
    /// first, submission order within a priority.
    pub fn push_main_loop<F, R>(
        &self,
        desc: Cow<'static, str>,
        priority: JobPriority,
        work: F,
    ) -> JoinHandle<R>
    where
        F: FnOnce(&JobContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = self.new_task(desc, work);
        let seq = self.main_loop_seq.fetch_add(1, Ordering::SeqCst);
        self.main_loop_queue
            .lock()
            .unwrap()
            .push(QueuedTask { priority, seq, task });
        let _ = self.sender.send(MainLoopEvent::Queued);
        handle
    }

    /// Takes the highest-priority queued main-loop job, if any.
    pub(crate) fn pop_main_loop_task(&self) -> Option<CacheTask> {
        self.main_loop_queue.lock().unwrap().pop().map(|q| q.task)
    }

    /// Flags the job for cancellation. Unknown or already-finished ids are
    /// a no-op.
    pub fn cancel(&self, id: JobId) {
        let guard = self.jobs.lock().unwrap();
        if let Some(meta) = guard.get(&id) {
            if meta.finished.finished().is_none() {
                meta.cancel.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn set_job_success(&self, id: JobId, value: bool) {
        self.jobs.lock().unwrap().entry(id).and_modify(|entry| {
            entry.succeeded = value;
        });
    }

    /// Retires a finished job's book-keeping row. Called by the owning
    /// loop after completion was observed.
    pub(crate) fn finalize_job(&self, id: JobId) {
        self.jobs.lock().unwrap().shift_remove(&id);
    }
}

pub type JobChannel<T> = oneshot::Receiver<T>;

/// `JoinHandle` for a submitted job that allows us to cancel it and to
/// receive its result.
#[derive(Debug)]
pub struct JoinHandle<T> {
    pub chan: JobChannel<T>,
    pub cancel: Arc<AtomicBool>,
    finished: FinishedTimestamp,
    pub job_id: JobId,
}

impl<T> JoinHandle<T> {
    /// Returns `true` if this call was the one that cancelled the job.
    pub fn cancel(&self) -> bool {
        let was_cancelled = self.cancel.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            self.finished.set_finished(Some(datetime::now()));
        }
        !was_cancelled
    }

    pub fn finished(&self) -> Option<UnixTimestamp> {
        self.finished.finished()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Blocks until the job's result arrives. A job dropped before
    /// completion yields [`ErrorKind::Cancelled`].
    pub fn join(self) -> Result<T> {
        futures::executor::block_on(self.chan)
            .map_err(|_| Error::new("job was cancelled").set_kind(ErrorKind::Cancelled))
    }
}

impl<T> std::cmp::PartialEq<JobId> for JoinHandle<T> {
    fn eq(&self, other: &JobId) -> bool {
        self.job_id == *other
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::mainloop::MainLoop;

    fn new_executor() -> (Arc<JobExecutor>, MainLoop) {
        let (sender, receiver) = channel::unbounded();
        let executor = Arc::new(JobExecutor::new(sender.clone()));
        let main_loop = MainLoop::new(receiver, sender, executor.clone());
        (executor, main_loop)
    }

    #[test]
    fn test_submit_unordered_returns_result() {
        let (executor, _main_loop) = new_executor();
        let handle = executor.submit_unordered("add".into(), |_ctx| 40 + 2);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_ordered_lane_runs_in_submission_order() {
        let (executor, _main_loop) = new_executor();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..32 {
            let order = order.clone();
            handles.push(executor.submit_fast_ordered("ordered".into(), move |_ctx| {
                order.lock().unwrap().push(i);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_before_pickup_drops_job() {
        let (executor, _main_loop) = new_executor();
        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = ran.clone();
            // Occupy the slow lane so the second job sits in the queue.
            let _blocker = executor.submit_slow_ordered("blocker".into(), move |_ctx| {
                thread::sleep(Duration::from_millis(200));
            });
            let handle = executor.submit_slow_ordered("cancelled".into(), move |_ctx| {
                ran.store(true, Ordering::SeqCst);
            });
            executor.cancel(handle.job_id);
            handle
        };
        assert!(handle.join().is_err());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_running_job_observes_cancellation() {
        let (executor, _main_loop) = new_executor();
        let iterations = Arc::new(AtomicUsize::new(0));
        let handle = {
            let iterations = iterations.clone();
            executor.submit_unordered("poll-cancel".into(), move |ctx| {
                while !ctx.is_cancelled() {
                    iterations.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                }
                "stopped"
            })
        };
        while iterations.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        executor.cancel(handle.job_id);
        assert_eq!(handle.join().unwrap(), "stopped");
    }

    #[test]
    fn test_main_loop_priority_order() {
        let (executor, mut main_loop) = new_executor();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [
            ("low", JobPriority::Low),
            ("normal", JobPriority::Normal),
            ("high", JobPriority::High),
            ("normal2", JobPriority::Normal),
        ] {
            let order = order.clone();
            executor.push_main_loop("prio".into(), priority, move |_ctx| {
                order.lock().unwrap().push(name);
            });
        }
        main_loop.try_tick();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["high", "normal", "normal2", "low"]
        );
    }

    #[test]
    fn test_finished_job_is_retired() {
        let (executor, mut main_loop) = new_executor();
        let handle = executor.submit_unordered("noop".into(), |_ctx| ());
        let job_id = handle.job_id;
        handle.join().unwrap();
        // Completion event reaches the owning loop at the next tick.
        main_loop.tick();
        assert!(!executor.jobs.lock().unwrap().contains_key(&job_id));
    }
}
