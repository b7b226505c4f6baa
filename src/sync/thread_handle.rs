//! A detached worker thread driven by a cooperative state machine.
//!
//! Every CP and every PP runs on one of these. Cancellation is coarse and
//! cooperative: a stop or terminate request is only observed between
//! iterations of the worker's `run_once` body, never in the middle of one.

use std::thread::JoinHandle;

use super::waitable::Waitable;

/// The four states a worker thread can occupy. Numeric values double as the
/// payload stored in the driving [`Waitable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ThreadState {
    Stopped = 0,
    Started = 1,
    Running = 2,
    Terminated = 3,
}

impl ThreadState {
    fn from_value(value: i32) -> ThreadState {
        match value {
            0 => ThreadState::Stopped,
            1 => ThreadState::Started,
            2 => ThreadState::Running,
            3 => ThreadState::Terminated,
            other => unreachable!("worker state cell holds an out-of-range value {other}"),
        }
    }
}

/// The body a [`ThreadHandle`] drives. `run_once` is the only required
/// method; `on_start`/`on_stop`/`on_terminate` default to no-ops, matching
/// the source's placeholder-callback behavior.
pub trait Worker: Send + 'static {
    /// Invoked once on the Started → Running transition.
    fn on_start(&mut self) {}
    /// Invoked exactly once per Running iteration.
    fn run_once(&mut self);
    /// Invoked every time the worker observes the Stopped state.
    fn on_stop(&mut self) {}
    /// Invoked once before the worker thread exits.
    fn on_terminate(&mut self) {}
}

/// Owns a waitable state cell and the detached thread it drives.
pub struct ThreadHandle {
    state: std::sync::Arc<Waitable>,
    join_handle: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    /// Spawns `worker`'s loop on a new OS thread, named `name` for
    /// debugging, starting in the `Stopped` state.
    pub fn spawn<W: Worker>(name: impl Into<String>, mut worker: W) -> crate::error::Result<ThreadHandle> {
        let state = std::sync::Arc::new(Waitable::new(ThreadState::Stopped as i32));
        let worker_state = state.clone();

        let join_handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(&mut worker, &worker_state))?;

        Ok(ThreadHandle {
            state,
            join_handle: Some(join_handle),
        })
    }

    pub fn current_state(&self) -> ThreadState {
        ThreadState::from_value(self.state.get())
    }

    pub fn start(&self) {
        self.state.set(ThreadState::Started as i32);
    }

    pub fn stop(&self) {
        self.state.set(ThreadState::Stopped as i32);
    }

    /// Requests the worker exit. Only after the underlying thread has
    /// actually observed `Terminated` and returned is it legal to drop this
    /// handle expecting a clean join; see [`ThreadHandle::join`].
    pub fn terminate(&self) {
        self.state.set(ThreadState::Terminated as i32);
    }

    /// Blocks until the worker thread has exited. Legal only after
    /// `terminate()` — joining a worker still in Running/Stopped will block
    /// indefinitely.
    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.join_handle.is_some() {
            self.terminate();
            self.join();
        }
    }
}

fn worker_loop<W: Worker>(worker: &mut W, state: &Waitable) {
    let mut current = state.get();

    loop {
        match ThreadState::from_value(current) {
            ThreadState::Stopped => {
                worker.on_stop();
                current = state.await_change(current);
            }
            ThreadState::Started => {
                worker.on_start();
                state.set(ThreadState::Running as i32);
                current = ThreadState::Running as i32;
            }
            ThreadState::Running => {
                worker.run_once();
                current = state.get();
            }
            ThreadState::Terminated => {
                worker.on_terminate();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingWorker {
        iterations: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        terminated: Arc<AtomicUsize>,
    }

    impl Worker for CountingWorker {
        fn on_start(&mut self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn run_once(&mut self) {
            self.iterations.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        }

        fn on_terminate(&mut self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn starts_runs_and_terminates() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));

        let worker = CountingWorker {
            iterations: iterations.clone(),
            started: started.clone(),
            terminated: terminated.clone(),
        };

        let mut handle = ThreadHandle::spawn("test-worker", worker).unwrap();
        assert_eq!(handle.current_state(), ThreadState::Stopped);

        handle.start();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(iterations.load(Ordering::SeqCst) > 0);

        handle.terminate();
        handle.join();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_after_start_halts_iteration_growth() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let worker = CountingWorker {
            iterations: iterations.clone(),
            started: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicUsize::new(0)),
        };

        let mut handle = ThreadHandle::spawn("test-worker-2", worker).unwrap();
        handle.start();
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
        std::thread::sleep(Duration::from_millis(20));
        let count_after_stop = iterations.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(iterations.load(Ordering::SeqCst), count_after_stop);

        handle.terminate();
        handle.join();
    }
}
