/*
 * mailcache - main loop module
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
 * The owning thread's event pump.
 *
 * One thread owns the engine: it creates the [`MainLoop`] and drives it by
 * calling [`MainLoop::tick`]. Worker threads talk back to it through the
 * cloneable [`MainLoopHandler`]. Job results, queued main-loop jobs and
 * cache update closures are all delivered here, so their destructors run
 * on the owning thread too.
 */

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender};
use futures::channel::oneshot;

use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{JobExecutor, JobId};

pub enum MainLoopEvent {
    /// A job finished (successfully, with an error, or cancelled) and its
    /// book-keeping row can be retired.
    JobFinished(JobId),
    /// A job was pushed on the main-loop priority queue.
    Queued,
    /// A closure shipped over by [`MainLoopHandler::call_blocking`].
    Run(Box<dyn FnOnce() + Send + 'static>),
}

impl fmt::Debug for MainLoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MainLoopEvent::JobFinished(id) => write!(f, "JobFinished({:?})", id),
            MainLoopEvent::Queued => write!(f, "Queued"),
            MainLoopEvent::Run(_) => write!(f, "Run(_)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MainLoopHandler {
    pub sender: Sender<MainLoopEvent>,
    pub job_executor: Arc<JobExecutor>,
    thread_id: thread::ThreadId,
}

impl MainLoopHandler {
    pub fn send(&self, event: MainLoopEvent) {
        let _ = self.sender.send(event);
    }

    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `f` on the owning thread and waits for its return value.
    ///
    /// When called from the owning thread itself, `f` runs in place.
    /// Otherwise it is shipped over and the calling thread blocks until
    /// the next tick runs it; the owning thread must therefore never issue
    /// a nested `call_blocking` through a worker while one is pending, or
    /// both sides wait forever.
    pub fn call_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_owning_thread() {
            return Ok(f());
        }
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(MainLoopEvent::Run(Box::new(move || {
                let _ = sender.send(f());
            })))
            .map_err(|_| Error::new("main loop has shut down").set_kind(ErrorKind::Bug))?;
        futures::executor::block_on(receiver)
            .map_err(|_| Error::new("main loop dropped the call").set_kind(ErrorKind::Cancelled))
    }
}

/// The engine's event pump. Not `Send`; it must stay on the thread that
/// created it.
pub struct MainLoop {
    receiver: Receiver<MainLoopEvent>,
    handler: MainLoopHandler,
    finish_callbacks: HashMap<JobId, Box<dyn FnOnce(JobId)>>,
    // Keeps `MainLoop` out of other threads; the thread-id check in the
    // handler only covers `call_blocking`.
    _no_send: std::marker::PhantomData<*const ()>,
}

impl fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("handler", &self.handler)
            .field("pending_callbacks", &self.finish_callbacks.len())
            .finish()
    }
}

impl MainLoop {
    pub fn new(
        receiver: Receiver<MainLoopEvent>,
        sender: Sender<MainLoopEvent>,
        job_executor: Arc<JobExecutor>,
    ) -> Self {
        MainLoop {
            receiver,
            handler: MainLoopHandler {
                sender,
                job_executor,
                thread_id: thread::current().id(),
            },
            finish_callbacks: HashMap::new(),
            _no_send: std::marker::PhantomData,
        }
    }

    pub fn handler(&self) -> MainLoopHandler {
        self.handler.clone()
    }

    /// Registers a callback run on the owning thread when the job
    /// completes. At most one callback per job.
    pub fn on_job_finish(&mut self, id: JobId, callback: Box<dyn FnOnce(JobId)>) {
        self.finish_callbacks.insert(id, callback);
    }

    /// Blocks for the next event, then processes everything pending.
    pub fn tick(&mut self) {
        if let Ok(event) = self.receiver.recv() {
            self.process(event);
        }
        self.try_tick();
    }

    /// Processes all pending events and queued main-loop jobs without
    /// blocking.
    pub fn try_tick(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.receiver.try_recv() {
                self.process(event);
                progressed = true;
            }
            while let Some(task) = self.handler.job_executor.pop_main_loop_task() {
                task.run();
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    fn process(&mut self, event: MainLoopEvent) {
        match event {
            MainLoopEvent::JobFinished(id) => {
                log::trace!("Job finished {:?}", id);
                if let Some(callback) = self.finish_callbacks.remove(&id) {
                    callback(id);
                }
                self.handler.job_executor.finalize_job(id);
            }
            MainLoopEvent::Queued => {}
            MainLoopEvent::Run(f) => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crossbeam::channel;

    use super::*;

    #[test]
    fn test_call_blocking_from_owning_thread_runs_in_place() {
        let (sender, receiver) = channel::unbounded();
        let executor = Arc::new(JobExecutor::new(sender.clone()));
        let main_loop = MainLoop::new(receiver, sender, executor);
        let handler = main_loop.handler();
        assert!(handler.is_owning_thread());
        assert_eq!(handler.call_blocking(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_call_blocking_from_worker_runs_on_owning_thread() {
        let (sender, receiver) = channel::unbounded();
        let executor = Arc::new(JobExecutor::new(sender.clone()));
        let mut main_loop = MainLoop::new(receiver, sender, executor.clone());
        let handler = main_loop.handler();
        let owning_thread = thread::current().id();

        let mut job = executor.submit_unordered("call-blocking".into(), move |_ctx| {
            handler
                .call_blocking(move || thread::current().id() == owning_thread)
                .unwrap()
        });
        // Tick until the worker's closure has been serviced and the job
        // result arrived.
        let result = loop {
            main_loop.tick();
            match job.chan.try_recv() {
                Ok(Some(value)) => break value,
                Ok(None) => continue,
                Err(_) => panic!("job vanished"),
            }
        };
        assert!(result);
    }

    #[test]
    fn test_finish_callback_runs_on_tick() {
        let (sender, receiver) = channel::unbounded();
        let executor = Arc::new(JobExecutor::new(sender.clone()));
        let mut main_loop = MainLoop::new(receiver, sender, executor.clone());
        let seen = Arc::new(Mutex::new(None));
        let handle = executor.submit_unordered("noop".into(), |_ctx| ());
        {
            let seen = seen.clone();
            main_loop.on_job_finish(
                handle.job_id,
                Box::new(move |id| {
                    *seen.lock().unwrap() = Some(id);
                }),
            );
        }
        let job_id = handle.job_id;
        handle.join().unwrap();
        main_loop.tick();
        assert_eq!(*seen.lock().unwrap(), Some(job_id));
    }
}
