//! Background detection and verdict handoff.
//!
//! Detection passes run on worker threads; the thread that owns the user
//! interface collects their verdicts and hands them to the response policy.
//! Each pass is stamped with a sequence number when it completes, and the
//! receiving side only ever acts on the newest completed pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::policy::{Orchestrator, Verdict};
use crate::engine::responses::ResponsePolicy;

/// A verdict tagged with the order its pass completed in.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub sequence: u64,
    pub verdict: Verdict,
}

/// Owned by the UI context. Schedules passes and receives their verdicts.
pub struct BackgroundDetector {
    orchestrator: Arc<Mutex<Orchestrator>>,
    concurrent: bool,
    completed: Arc<AtomicU64>,
    sender: Sender<PassReport>,
    receiver: Receiver<PassReport>,
    pending: Option<PassReport>,
    last_delivered: Option<PassReport>,
}

impl BackgroundDetector {
    pub fn new(orchestrator: Orchestrator, concurrent: bool) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            concurrent,
            completed: Arc::new(AtomicU64::new(0)),
            sender,
            receiver,
            pending: None,
            last_delivered: None,
        }
    }

    /// Start one detection pass on a worker thread.
    ///
    /// Passes are serialized on the orchestrator; the sequence number is
    /// assigned and the report sent while it is still held, so channel order
    /// matches completion order.
    pub fn schedule(&self) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let completed = Arc::clone(&self.completed);
        let sender = self.sender.clone();
        let concurrent = self.concurrent;

        thread::spawn(move || {
            let mut orchestrator = orchestrator.lock().unwrap_or_else(PoisonError::into_inner);
            let verdict = if concurrent {
                orchestrator.run_concurrent()
            } else {
                orchestrator.run()
            };
            let sequence = completed.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(pass = sequence, compromised = verdict.is_compromised(), "pass complete");
            // The receiver lives as long as the detector; a send error only
            // means the UI side is gone.
            let _ = sender.send(PassReport { sequence, verdict });
        })
    }

    fn absorb(&mut self, report: PassReport) {
        let newer = self
            .pending
            .as_ref()
            .map_or(true, |pending| report.sequence > pending.sequence);
        if newer && report.sequence > self.delivered() {
            self.pending = Some(report);
        }
    }

    fn drain(&mut self) {
        while let Ok(report) = self.receiver.try_recv() {
            self.absorb(report);
        }
    }

    /// Newest completed verdict not yet delivered, without consuming it.
    pub fn latest(&mut self) -> Option<&PassReport> {
        self.drain();
        self.pending.as_ref()
    }

    /// Sequence number of the last delivered pass, 0 before the first.
    pub fn delivered(&self) -> u64 {
        self.last_delivered.as_ref().map_or(0, |report| report.sequence)
    }

    /// The pass most recently handed to a policy.
    pub fn last_delivered(&self) -> Option<&PassReport> {
        self.last_delivered.as_ref()
    }

    /// Hand the newest undelivered verdict to `policy`. Returns its sequence
    /// number, or `None` if nothing newer than the last delivery arrived.
    pub fn deliver(&mut self, policy: &dyn ResponsePolicy) -> Option<u64> {
        self.drain();
        let report = self.pending.take()?;
        let sequence = report.sequence;
        info!(pass = sequence, "delivering verdict");
        policy.respond(&report.verdict);
        self.last_delivered = Some(report);
        Some(sequence)
    }

    /// Like [`deliver`](Self::deliver), but waits up to `timeout` for a pass
    /// to complete when none is pending.
    pub fn deliver_within(&mut self, policy: &dyn ResponsePolicy, timeout: Duration) -> Option<u64> {
        if self.latest().is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(report) => self.absorb(report),
                Err(RecvTimeoutError::Timeout) => return None,
                // unreachable while self holds a sender
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        self.deliver(policy)
    }
}
