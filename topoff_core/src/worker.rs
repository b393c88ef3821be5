//! Dedicated thread that owns the controller and serializes top-up runs.
//!
//! Requests arrive over a bounded channel. Only one request can be in flight:
//! a second submission while a run is queued or active is refused with
//! `TopoffError::Busy`. The thread is shut down when the `TopupWorker` is
//! dropped; an active run is cancelled first so the pump is switched off
//! before the join completes.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use topoff_traits::Pump;

use crate::cancel::CancelToken;
use crate::controller::{TopupController, TopupOutcome};
use crate::error::TopoffError;
use crate::ranger::LevelSource;
use crate::status::StatusHandle;

enum Job {
    /// Run with the context as it is.
    Run { reply: xch::Sender<TopupOutcome> },
    /// Reload settings from the store, then run.
    Scheduled { reply: xch::Sender<TopupOutcome> },
}

pub struct TopupWorker {
    tx: Option<xch::Sender<Job>>,
    busy: Arc<AtomicBool>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    cancel: CancelToken,
    status: StatusHandle,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TopupWorker {
    pub fn spawn<L, P>(mut controller: TopupController<L, P>) -> Self
    where
        L: LevelSource + Send + 'static,
        P: Pump + Send + 'static,
    {
        let (tx, rx) = xch::bounded::<Job>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let busy_clone = busy.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let cancel = controller.cancel_token();
        let status = controller.status();

        let join_handle = std::thread::spawn(move || {
            for job in rx.iter() {
                if shutdown_clone.load(Ordering::Acquire) {
                    tracing::debug!("worker thread received shutdown signal");
                    break;
                }

                let (outcome, reply) = match job {
                    Job::Run { reply } => (controller.run_configured(), reply),
                    Job::Scheduled { reply } => {
                        if let Err(e) = controller.reload_settings() {
                            tracing::warn!(error = %e, "settings reload failed, using cached values");
                        }
                        (controller.run_configured(), reply)
                    }
                };
                busy_clone.store(false, Ordering::Release);
                // If send fails, the submitter stopped waiting; nothing to do
                let _ = reply.send(outcome);
            }
            tracing::trace!("worker thread exiting cleanly");
        });

        Self {
            tx: Some(tx),
            busy,
            shutdown,
            cancel,
            status,
            join_handle: Some(join_handle),
        }
    }

    fn submit_job(
        &self,
        make: impl FnOnce(xch::Sender<TopupOutcome>) -> Job,
    ) -> Result<xch::Receiver<TopupOutcome>, TopoffError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(TopoffError::Busy);
        }
        let Some(tx) = self.tx.as_ref() else {
            self.busy.store(false, Ordering::Release);
            return Err(TopoffError::State("worker stopped".into()));
        };
        // Clear a cancel left over from an earlier run; one issued after this
        // point applies to the job being queued.
        self.cancel.reset();
        let (reply_tx, reply_rx) = xch::bounded(1);
        if tx.try_send(make(reply_tx)).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(TopoffError::State("worker not accepting jobs".into()));
        }
        Ok(reply_rx)
    }

    /// Queue a run with the current settings. The receiver yields the outcome.
    pub fn submit(&self) -> Result<xch::Receiver<TopupOutcome>, TopoffError> {
        self.submit_job(|reply| Job::Run { reply })
    }

    /// Queue a run that first reloads trigger level and schedule from the store.
    pub fn submit_scheduled(&self) -> Result<xch::Receiver<TopupOutcome>, TopoffError> {
        self.submit_job(|reply| Job::Scheduled { reply })
    }

    /// Submit and wait for the outcome.
    pub fn run_blocking(&self) -> Result<TopupOutcome, TopoffError> {
        let rx = self.submit()?;
        rx.recv()
            .map_err(|_| TopoffError::State("worker exited before finishing the run".into()))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancel the queued or active run, if any. The pump is switched off by
    /// the run itself.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }
}

impl Drop for TopupWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.cancel.cancel();
        // Closing the channel ends the thread's receive loop once idle.
        drop(self.tx.take());

        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("worker thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "worker thread panicked during shutdown");
                }
            }
        }
    }
}
