//! Fixed-size background worker pool for flush (and, dispatched the same
//! way, compaction) jobs. Kept as a hand-rolled channel + thread pool
//! rather than pulling in a generic executor crate: it only ever runs
//! one kind of idempotent-per-generation job and needs no work-stealing.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct FlushPool {
    sender: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    pending: Arc<(Mutex<usize>, Condvar)>,
}

impl FlushPool {
    pub fn new(worker_count: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new((Mutex::new(0usize), Condvar::new()));
        let worker_count = worker_count.max(1);
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let rx = rx.clone();
            let pending = pending.clone();
            handles.push(thread::spawn(move || loop {
                let job = {
                    let rx = rx.lock().expect("flush pool queue lock poisoned");
                    rx.recv()
                };
                match job {
                    Ok(job) => {
                        job();
                        let (count, cvar) = &*pending;
                        let mut n = count.lock().expect("flush pool pending lock poisoned");
                        *n -= 1;
                        if *n == 0 {
                            cvar.notify_all();
                        }
                    }
                    Err(_) => break,
                }
            }));
        }

        Self {
            sender: Some(tx),
            handles,
            pending,
        }
    }

    /// Enqueues a job. Never blocks the caller on the job's completion.
    pub fn submit(&self, job: Job) {
        {
            let (count, _) = &*self.pending;
            *count.lock().expect("flush pool pending lock poisoned") += 1;
        }
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }

    /// Blocks until every submitted job has completed, or `timeout` elapses.
    pub fn drain(&self, timeout: Duration) {
        let (count, cvar) = &*self.pending;
        let guard = count.lock().expect("flush pool pending lock poisoned");
        let _ = cvar
            .wait_timeout_while(guard, timeout, |pending| *pending > 0)
            .expect("flush pool pending lock poisoned");
    }
}

impl Drop for FlushPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
