//! Thread-affinity redirection for endpoint calls.
//!
//! Some hosts require every control call on the native stream object to
//! happen on one designated thread. That requirement is a platform
//! capability, not engine logic: it is injected as a [`HostDispatch`] and
//! checked exactly once when the handle is wrapped. The engine and its
//! callers never see the difference.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use soundpump_foundation::{AudioError, ShareMode};

use crate::format::{AudioFormat, FormatSupport};
use crate::native::{CaptureBuffer, InitSpec, NativeStream, RenderBuffer};

type Job = Box<dyn FnOnce() + Send>;

/// Where endpoint calls are allowed to execute.
pub trait HostDispatch: Send + Sync {
    /// Whether calls must be redirected. Consulted once, at wrap time.
    fn requires_dispatch(&self) -> bool;

    /// Runs `job` on the designated thread and returns after it completes.
    fn run(&self, job: Job);
}

/// Dispatch strategy for hosts without an affinity requirement.
#[derive(Debug, Default)]
pub struct InlineDispatch;

impl HostDispatch for InlineDispatch {
    fn requires_dispatch(&self) -> bool {
        false
    }

    fn run(&self, job: Job) {
        job();
    }
}

/// Owns the designated thread and funnels every job through it.
pub struct SingleThreadDispatch {
    job_tx: Option<Sender<Job>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadDispatch {
    pub fn spawn() -> Result<Self, AudioError> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name("host-dispatch".to_string())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    job();
                }
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn dispatch thread: {e}")))?;

        Ok(Self {
            job_tx: Some(job_tx),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl HostDispatch for SingleThreadDispatch {
    fn requires_dispatch(&self) -> bool {
        true
    }

    fn run(&self, job: Job) {
        let Some(job_tx) = self.job_tx.as_ref() else {
            return;
        };
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let wrapped: Job = Box::new(move || {
            job();
            let _ = done_tx.send(());
        });
        if job_tx.send(wrapped).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for SingleThreadDispatch {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.job_tx.take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// [`NativeStream`] adapter that routes every call through a
/// [`HostDispatch`].
pub struct DispatchedStream {
    inner: Arc<dyn NativeStream>,
    dispatch: Arc<dyn HostDispatch>,
}

impl DispatchedStream {
    /// Wraps `stream` when the host demands it; hands the stream back
    /// untouched otherwise.
    pub fn wrap(
        stream: Arc<dyn NativeStream>,
        dispatch: Arc<dyn HostDispatch>,
    ) -> Arc<dyn NativeStream> {
        if !dispatch.requires_dispatch() {
            return stream;
        }
        Arc::new(Self {
            inner: stream,
            dispatch,
        })
    }

    fn on_host<R, F>(&self, f: F) -> Result<R, AudioError>
    where
        R: Send + 'static,
        F: FnOnce(&dyn NativeStream) -> Result<R, AudioError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.dispatch.run(Box::new(move || {
            let _ = reply_tx.send(f(inner.as_ref()));
        }));
        reply_rx
            .recv()
            .map_err(|_| AudioError::Fatal("Host dispatch dropped the reply".to_string()))?
    }
}

impl NativeStream for DispatchedStream {
    fn initialize(&self, mode: ShareMode, spec: InitSpec) -> Result<(), AudioError> {
        self.on_host(move |s| s.initialize(mode, spec))
    }

    fn start(&self) -> Result<(), AudioError> {
        self.on_host(|s| s.start())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.on_host(|s| s.stop())
    }

    fn reset(&self) -> Result<(), AudioError> {
        self.on_host(|s| s.reset())
    }

    fn buffer_frame_count(&self) -> Result<u32, AudioError> {
        self.on_host(|s| s.buffer_frame_count())
    }

    fn current_padding(&self) -> Result<u32, AudioError> {
        self.on_host(|s| s.current_padding())
    }

    fn stream_latency(&self) -> Result<Duration, AudioError> {
        self.on_host(|s| s.stream_latency())
    }

    fn is_format_supported(
        &self,
        mode: ShareMode,
        format: &AudioFormat,
    ) -> Result<FormatSupport, AudioError> {
        let format = format.clone();
        self.on_host(move |s| s.is_format_supported(mode, &format))
    }

    fn mix_format(&self) -> Result<AudioFormat, AudioError> {
        self.on_host(|s| s.mix_format())
    }

    fn register_event(&self, signal: Sender<()>) -> Result<(), AudioError> {
        self.on_host(move |s| s.register_event(signal))
    }

    fn capture_client(&self) -> Result<Box<dyn CaptureBuffer>, AudioError> {
        self.on_host(|s| s.capture_client())
    }

    fn render_client(&self) -> Result<Box<dyn RenderBuffer>, AudioError> {
        self.on_host(|s| s.render_client())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn inline_dispatch_runs_on_the_caller_thread() {
        let caller = std::thread::current().id();
        let same_thread = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&same_thread);

        InlineDispatch.run(Box::new(move || {
            flag.store(std::thread::current().id() == caller, Ordering::SeqCst);
        }));

        assert!(same_thread.load(Ordering::SeqCst));
    }

    #[test]
    fn single_thread_dispatch_runs_elsewhere_and_blocks_until_done() {
        let dispatch = SingleThreadDispatch::spawn().expect("spawn");
        let caller = std::thread::current().id();
        let ran_elsewhere = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_elsewhere);

        dispatch.run(Box::new(move || {
            flag.store(std::thread::current().id() != caller, Ordering::SeqCst);
        }));

        // run() returns only after the job completed, so the flag is
        // already observable.
        assert!(ran_elsewhere.load(Ordering::SeqCst));
    }

    #[test]
    fn jobs_share_one_designated_thread() {
        let dispatch = SingleThreadDispatch::spawn().expect("spawn");
        let first = Arc::new(Mutex::new(None));
        let second = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&first);
        dispatch.run(Box::new(move || {
            *slot.lock() = Some(std::thread::current().id());
        }));
        let slot = Arc::clone(&second);
        dispatch.run(Box::new(move || {
            *slot.lock() = Some(std::thread::current().id());
        }));

        let first = first.lock().expect("first job ran");
        let second = second.lock().expect("second job ran");
        assert_eq!(first, second);
    }
}
