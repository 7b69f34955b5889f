// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The framework event loop.
//!
//! A single thread drains a FIFO queue of events. Every structural mutation of
//! the framework (service registration, tracker creation, bundle lifecycle) is
//! applied here, which gives all of them one total order and keeps tracker
//! callbacks from racing each other.
//!
//! Each queued event may carry a [`Completion`]. Whoever moves the completion
//! out of [`CompletionState::Pending`] first wins: the loop (which then runs the
//! event) or a canceller (which then guarantees the event never runs).

use crate::sync::{lock, panic_message};
use crossbeam_channel::{Receiver, Sender};
use orbis_core::{FrameworkError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Progress of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionState {
    /// Queued, not picked up yet. Still cancellable.
    Pending,
    /// Being applied on the event loop.
    Running,
    /// Applied.
    Done,
    /// Cancelled before it ran; its effects never happened.
    Cancelled,
}

impl CompletionState {
    fn is_final(self) -> bool {
        matches!(self, CompletionState::Done | CompletionState::Cancelled)
    }
}

/// A cancellable handle on a queued event.
#[derive(Debug, Clone)]
pub struct Completion {
    inner: Arc<(Mutex<CompletionState>, Condvar)>,
}

impl Completion {
    /// Creates a pending completion.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(CompletionState::Pending), Condvar::new())),
        }
    }

    /// Current state.
    pub fn state(&self) -> CompletionState {
        *lock(&self.inner.0)
    }

    /// Cancels the event if it has not started yet.
    ///
    /// Returns `true` when the cancellation won; the event will never run.
    pub fn cancel(&self) -> bool {
        self.transition(CompletionState::Pending, CompletionState::Cancelled)
    }

    /// Blocks until the event was applied or cancelled.
    pub fn wait(&self) -> CompletionState {
        let (state, cond) = &*self.inner;
        let mut guard = lock(state);
        while !guard.is_final() {
            guard = cond.wait(guard).unwrap_or_else(|p| p.into_inner());
        }
        *guard
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `None` when the event is still pending or running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CompletionState> {
        let deadline = Instant::now() + timeout;
        let (state, cond) = &*self.inner;
        let mut guard = lock(state);
        while !guard.is_final() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = cond
                .wait_timeout(guard, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|p| p.into_inner().0);
        }
        Some(*guard)
    }

    pub(crate) fn try_begin(&self) -> bool {
        self.transition(CompletionState::Pending, CompletionState::Running)
    }

    pub(crate) fn finish(&self) {
        let (state, cond) = &*self.inner;
        *lock(state) = CompletionState::Done;
        cond.notify_all();
    }

    fn transition(&self, from: CompletionState, to: CompletionState) -> bool {
        let (state, cond) = &*self.inner;
        let mut guard = lock(state);
        if *guard != from {
            return false;
        }
        *guard = to;
        if to.is_final() {
            cond.notify_all();
        }
        true
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Event {
        name: String,
        completion: Option<Completion>,
        task: Task,
    },
    Shutdown,
}

#[derive(Default)]
struct QueueState {
    pending: Mutex<usize>,
    drained: Condvar,
    processed: Mutex<u64>,
}

impl QueueState {
    fn event_done(&self) {
        *lock(&self.processed) += 1;
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

/// The single-consumer event executor of a framework instance.
pub struct EventLoop {
    sender: Mutex<Option<Sender<LoopMessage>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    queue: Arc<QueueState>,
    warning_threshold: usize,
}

impl EventLoop {
    /// Spawns the loop thread.
    pub fn start(warning_threshold: usize) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let queue = Arc::new(QueueState::default());
        let handle = thread::Builder::new()
            .name("orbis-event-loop".to_string())
            .spawn({
                let queue = Arc::clone(&queue);
                move || run(receiver, queue)
            })
            .map_err(|e| FrameworkError::Enomem(format!("cannot spawn event loop thread: {e}")))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            queue,
            warning_threshold,
        })
    }

    /// Returns `true` when called from the loop thread itself.
    pub fn is_event_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queues `task` and returns a handle to wait on or cancel it.
    pub fn submit(&self, name: impl Into<String>, task: impl FnOnce() + Send + 'static) -> Result<Completion> {
        let completion = Completion::new();
        self.submit_with(name, completion.clone(), task)?;
        Ok(completion)
    }

    /// Queues `task` under a completion created by the caller.
    ///
    /// Callers that must publish the completion (so that a racing canceller can
    /// find it) create it first, publish it, then submit.
    pub fn submit_with(
        &self,
        name: impl Into<String>,
        completion: Completion,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.enqueue(LoopMessage::Event {
            name: name.into(),
            completion: Some(completion),
            task: Box::new(task),
        })
    }

    /// Runs `task` on the loop and returns its result.
    ///
    /// When already on the loop thread the task runs inline, so nested
    /// synchronous calls from callbacks cannot deadlock.
    pub fn execute<R, F>(&self, name: &str, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_event_loop_thread() {
            return Ok(task());
        }
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        self.enqueue(LoopMessage::Event {
            name: name.to_string(),
            completion: None,
            task: Box::new(move || {
                let _ = result_tx.send(task());
            }),
        })?;
        result_rx.recv().map_err(|_| {
            FrameworkError::illegal_state(format!("event '{name}' did not complete (panicked or dropped)"))
        })
    }

    /// Blocks until every queued event has been processed.
    ///
    /// A no-op on the loop thread.
    pub fn wait_for_empty_queue(&self) {
        if self.is_event_loop_thread() {
            log::debug!("wait_for_empty_queue called on the event loop thread; not waiting");
            return;
        }
        let mut pending = lock(&self.queue.pending);
        while *pending > 0 {
            pending = self
                .queue
                .drained
                .wait(pending)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Number of queued events not yet processed.
    pub fn queue_depth(&self) -> usize {
        *lock(&self.queue.pending)
    }

    /// Number of events processed (run or skipped) so far.
    pub fn processed_events(&self) -> u64 {
        *lock(&self.queue.processed)
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) was called.
    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stops accepting events, lets already queued events run, and joins the
    /// loop thread.
    pub fn shutdown(&self) -> Result<()> {
        if self.is_event_loop_thread() {
            return Err(FrameworkError::illegal_state(
                "the event loop cannot be shut down from its own thread",
            ));
        }
        if let Some(sender) = lock(&self.sender).take() {
            let _ = sender.send(LoopMessage::Shutdown);
        }
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                log::error!("Framework event loop thread terminated abnormally.");
            }
        }
        Ok(())
    }

    fn enqueue(&self, message: LoopMessage) -> Result<()> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(FrameworkError::illegal_state("the framework event loop is stopped"));
        };
        let depth = {
            let mut pending = lock(&self.queue.pending);
            *pending += 1;
            *pending
        };
        if sender.send(message).is_err() {
            self.queue.event_done();
            return Err(FrameworkError::illegal_state("the framework event loop is gone"));
        }
        if depth > self.warning_threshold {
            log::warn!(
                "Framework event queue depth {depth} exceeds the warning threshold {}",
                self.warning_threshold
            );
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if !self.is_event_loop_thread() {
            let _ = self.shutdown();
        }
    }
}

fn run(receiver: Receiver<LoopMessage>, queue: Arc<QueueState>) {
    log::debug!("Framework event loop started.");
    while let Ok(message) = receiver.recv() {
        match message {
            LoopMessage::Shutdown => break,
            LoopMessage::Event {
                name,
                completion,
                task,
            } => {
                let runnable = completion.as_ref().map_or(true, Completion::try_begin);
                if runnable {
                    log::trace!("Processing event '{name}'");
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        log::error!(
                            "Event '{name}' panicked: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                    if let Some(completion) = &completion {
                        completion.finish();
                    }
                } else {
                    log::trace!("Skipping cancelled event '{name}'");
                }
                queue.event_done();
            }
        }
    }
    log::debug!("Framework event loop stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_events_run_in_fifo_order() {
        let event_loop = EventLoop::start(1024).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            event_loop
                .submit(format!("push {i}"), move || seen.lock().unwrap().push(i))
                .unwrap();
        }
        event_loop.wait_for_empty_queue();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert_eq!(event_loop.processed_events(), 20);
    }

    #[test]
    fn test_cancel_before_run_wins() {
        let event_loop = EventLoop::start(1024).unwrap();
        let gate = Arc::new(Barrier::new(2));
        {
            let gate = Arc::clone(&gate);
            event_loop.submit("block", move || {
                gate.wait();
            })
            .unwrap();
        }
        let ran = Arc::new(AtomicUsize::new(0));
        let completion = {
            let ran = Arc::clone(&ran);
            event_loop
                .submit("cancel me", move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        assert!(completion.cancel());
        assert!(!completion.cancel());
        gate.wait();
        event_loop.wait_for_empty_queue();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(completion.wait(), CompletionState::Cancelled);
    }

    #[test]
    fn test_cancel_after_run_is_noop() {
        let event_loop = EventLoop::start(1024).unwrap();
        let completion = event_loop.submit("noop", || {}).unwrap();
        assert_eq!(completion.wait(), CompletionState::Done);
        assert!(!completion.cancel());
        assert_eq!(completion.state(), CompletionState::Done);
    }

    #[test]
    fn test_execute_returns_value_and_runs_inline_when_nested() {
        let event_loop = Arc::new(EventLoop::start(1024).unwrap());
        let inner = Arc::clone(&event_loop);
        let value = event_loop
            .execute("outer", move || {
                assert!(inner.is_event_loop_thread());
                inner.execute("inner", || 21 * 2).unwrap()
            })
            .unwrap();
        assert_eq!(value, 42);
        assert!(!event_loop.is_event_loop_thread());
    }

    #[test]
    fn test_panicking_event_does_not_kill_loop() {
        let event_loop = EventLoop::start(1024).unwrap();
        let completion = event_loop.submit("boom", || panic!("boom")).unwrap();
        assert_eq!(completion.wait(), CompletionState::Done);
        let err = event_loop.execute("boom again", || -> u32 { panic!("again") });
        assert!(err.is_err());
        assert_eq!(event_loop.execute("alive", || 1).unwrap(), 1);
    }

    #[test]
    fn test_shutdown_runs_queued_events_then_rejects() {
        let event_loop = EventLoop::start(1024).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            event_loop
                .submit("count", move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        event_loop.shutdown().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert!(!event_loop.is_running());
        let err = event_loop.submit("late", || {}).unwrap_err();
        assert_eq!(err.status(), orbis_core::Status::IllegalState);
    }

    #[test]
    fn test_completion_wait_timeout() {
        let event_loop = EventLoop::start(1024).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let completion = {
            let gate = Arc::clone(&gate);
            event_loop.submit("slow", move || {
                gate.wait();
            })
            .unwrap()
        };
        assert_eq!(completion.wait_timeout(Duration::from_millis(20)), None);
        gate.wait();
        assert_eq!(
            completion.wait_timeout(Duration::from_secs(5)),
            Some(CompletionState::Done)
        );
    }
}
