//! Bounded producer/consumer recording pipeline.
//!
//! The capture tick enqueues frames into a fixed-capacity channel and a
//! dedicated worker thread drains them into the [`FrameSink`].  When the
//! queue is full the newest frame is dropped and counted; the capture tick
//! never waits on disk.  Stopping the pipeline lets the worker drain the
//! backlog in order, finalize the file and signal completion, with the
//! caller waiting at most a fixed timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camgate_hal::FrameSink;
use camgate_types::Frame;
use tracing::{debug, warn};

use crate::stats::CaptureStats;

/// One in-flight recording job.
pub struct RecordingPipeline {
    tx: Option<SyncSender<Frame>>,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    path: PathBuf,
    stats: Arc<CaptureStats>,
}

impl RecordingPipeline {
    /// Start the worker thread writing to `sink`.  `capacity` bounds the
    /// number of frames queued ahead of the disk.
    pub fn spawn(
        mut sink: Box<dyn FrameSink>,
        capacity: usize,
        stats: Arc<CaptureStats>,
        path: PathBuf,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Frame>(capacity);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let worker_stats = Arc::clone(&stats);
        let worker_path = path.clone();

        let worker = thread::spawn(move || {
            while let Ok(frame) = rx.recv() {
                match sink.write(&frame) {
                    Ok(()) => {
                        worker_stats.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(path = %worker_path.display(), error = %e, "frame write failed");
                    }
                }
            }
            if let Err(e) = sink.finalize() {
                warn!(path = %worker_path.display(), error = %e, "recording finalize failed");
            }
            let _ = done_tx.send(());
        });

        Self {
            tx: Some(tx),
            done_rx,
            worker: Some(worker),
            path,
            stats,
        }
    }

    /// Offer `frame` to the writer.  A full queue drops the frame and bumps
    /// the drop counter; the call never blocks.
    pub fn enqueue(&self, frame: Frame) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(path = %self.path.display(), "recording worker exited early");
            }
        }
    }

    /// Close the queue without waiting.  The worker drains the backlog,
    /// finalizes and signals done; poll with [`RecordingPipeline::poll_done`].
    pub fn begin_stop(&mut self) {
        self.tx = None;
    }

    /// Non-blocking check whether the worker has finished.  Joins the worker
    /// thread on completion.  A worker that died without signalling counts
    /// as finished.
    pub fn poll_done(&mut self) -> bool {
        match self.done_rx.try_recv() {
            Ok(()) => {
                if let Some(worker) = self.worker.take()
                    && worker.join().is_err()
                {
                    warn!(path = %self.path.display(), "recording worker panicked");
                }
                true
            }
            Err(mpsc::TryRecvError::Empty) => false,
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!(path = %self.path.display(), "recording worker died before finalize");
                self.worker.take();
                true
            }
        }
    }

    /// Close the queue and wait for the worker to drain and finalize.
    ///
    /// Returns `true` when the worker completed within `timeout`.  On
    /// overrun the worker is left running detached (it still owns the sink
    /// and will finalize when the backlog clears) and the overrun counter
    /// is bumped.
    pub fn stop(mut self, timeout: Duration) -> bool {
        // Dropping the sender ends the worker's recv loop after the backlog.
        self.tx = None;
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(worker) = self.worker.take()
                    && worker.join().is_err()
                {
                    warn!(path = %self.path.display(), "recording worker panicked");
                }
                debug!(path = %self.path.display(), "recording finalized");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                self.stats.finalize_overruns.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %self.path.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "recording worker missed the stop deadline; detaching"
                );
                self.worker.take();
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(path = %self.path.display(), "recording worker died before finalize");
                self.worker.take();
                false
            }
        }
    }

    /// Destination file of this job.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camgate_hal::SyntheticSinkBackend;
    use camgate_hal::RecordingBackend;
    use camgate_types::RecordProfile;

    fn frame(tag: u8) -> Frame {
        Frame {
            width: 4,
            height: 2,
            data: vec![tag; 24],
        }
    }

    fn open_sink(backend: &SyntheticSinkBackend) -> Box<dyn FrameSink> {
        backend
            .open(Path::new("/tmp/test.mjv"), &RecordProfile::default())
            .unwrap()
    }

    #[test]
    fn frames_drain_in_fifo_order_and_finalize() {
        let backend = SyntheticSinkBackend::default();
        let stats = Arc::new(CaptureStats::default());
        let pipeline = RecordingPipeline::spawn(
            open_sink(&backend),
            12,
            Arc::clone(&stats),
            PathBuf::from("/tmp/test.mjv"),
        );

        for tag in 0..5 {
            pipeline.enqueue(frame(tag));
        }
        assert!(pipeline.stop(Duration::from_secs(3)));

        let written = backend.written();
        assert_eq!(written.len(), 5);
        let tags: Vec<u8> = written.iter().map(|f| f.data[0]).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert!(backend.is_finalized());
        assert_eq!(stats.snapshot().written, 5);
        assert_eq!(stats.snapshot().dropped, 0);
    }

    #[test]
    fn full_queue_drops_newest_and_counts() {
        // A slow sink keeps the queue full while the producer floods it.
        let backend = SyntheticSinkBackend::default().with_write_delay(Duration::from_millis(20));
        let stats = Arc::new(CaptureStats::default());
        let pipeline = RecordingPipeline::spawn(
            open_sink(&backend),
            12,
            Arc::clone(&stats),
            PathBuf::from("/tmp/slow.mjv"),
        );

        let total = 40;
        for tag in 0..total {
            pipeline.enqueue(frame(tag));
        }
        pipeline.stop(Duration::from_secs(10));

        let snap = stats.snapshot();
        assert_eq!(snap.written + snap.dropped, total as u64);
        assert!(snap.dropped > 0, "flooding a slow sink must drop frames");
        // Surviving frames keep their original order.
        let tags: Vec<u8> = backend.written().iter().map(|f| f.data[0]).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn stop_overrun_counts_and_returns_false() {
        let backend = SyntheticSinkBackend::default().with_finalize_delay(Duration::from_millis(200));
        let stats = Arc::new(CaptureStats::default());
        let pipeline = RecordingPipeline::spawn(
            open_sink(&backend),
            12,
            Arc::clone(&stats),
            PathBuf::from("/tmp/overrun.mjv"),
        );

        pipeline.enqueue(frame(1));
        let completed = pipeline.stop(Duration::from_millis(20));

        assert!(!completed);
        assert_eq!(stats.snapshot().finalize_overruns, 1);
    }

    #[test]
    fn write_errors_are_counted_not_fatal() {
        let backend = SyntheticSinkBackend::default().with_failing_writes();
        let stats = Arc::new(CaptureStats::default());
        let pipeline = RecordingPipeline::spawn(
            open_sink(&backend),
            12,
            Arc::clone(&stats),
            PathBuf::from("/tmp/err.mjv"),
        );

        pipeline.enqueue(frame(1));
        pipeline.enqueue(frame(2));
        assert!(pipeline.stop(Duration::from_secs(3)));

        let snap = stats.snapshot();
        assert_eq!(snap.write_errors, 2);
        assert_eq!(snap.written, 0);
        assert!(backend.is_finalized());
    }
}
