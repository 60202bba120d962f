//! Bridging between the synchronous boot caller and the pipeline.
//!
//! At process start-up a synchronous caller must wait for a scan step
//! that runs inside the pipeline: first for its decision on whether any
//! deployment work exists at all, then, only if work exists, for that
//! work's own terminal result. Two ordered single-shot hand-offs keep the
//! blocking side from ever counting one completion twice: the decision
//! channel fires exactly once, and the result channel fires exactly once
//! and only after a `WorkFound` decision.

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use tiller_model::{PathAddress, Value};
use tracing::debug;

use crate::error::{OperationError, OperationResult};

/// Creates a linked pair of boot-bridge handles. The [`ScanHandle`] goes
/// to the scheduled scan step; the [`BootHandle`] stays with the blocking
/// boot caller.
#[must_use]
pub fn boot_handoff() -> (ScanHandle, BootHandle) {
    let (decision_tx, decision_rx) = sync_channel(1);
    let (result_tx, result_rx) = sync_channel(1);
    (
        ScanHandle {
            decision: decision_tx,
            result: result_tx,
        },
        BootHandle {
            decision: decision_rx,
            result: result_rx,
        },
    )
}

enum ScanDecision {
    NoWork,
    WorkFound,
}

/// Producer side of the bridge, consumed by the scan step.
pub struct ScanHandle {
    decision: SyncSender<ScanDecision>,
    result: SyncSender<OperationResult<Value>>,
}

impl ScanHandle {
    /// Signals that the scan found nothing to do. Releases the boot
    /// caller immediately.
    pub fn no_work(self) {
        debug!("boot scan found no pending work");
        let _ = self.decision.send(ScanDecision::NoWork);
    }

    /// Signals that work exists and returns the handle used to publish
    /// its terminal result.
    #[must_use]
    pub fn work_found(self) -> WorkCompletion {
        debug!("boot scan found pending work");
        let _ = self.decision.send(ScanDecision::WorkFound);
        WorkCompletion {
            result: self.result,
        }
    }
}

/// Obligation to publish the scheduled work's terminal outcome.
pub struct WorkCompletion {
    result: SyncSender<OperationResult<Value>>,
}

impl WorkCompletion {
    /// Publishes the work's terminal result, releasing the boot caller.
    pub fn finish(self, outcome: OperationResult<Value>) {
        let _ = self.result.send(outcome);
    }
}

/// Consumer side of the bridge, held by the blocking boot caller.
pub struct BootHandle {
    decision: Receiver<ScanDecision>,
    result: Receiver<OperationResult<Value>>,
}

impl BootHandle {
    /// Blocks through both hand-offs in order.
    ///
    /// Returns `None` when the scan decided there is no work, otherwise
    /// the work's terminal result.
    ///
    /// # Errors
    ///
    /// `Runtime` when the scan side went away without completing a
    /// hand-off; any error the scheduled work itself reported.
    pub fn await_outcome(self) -> OperationResult<Option<Value>> {
        let gone = |message: &str| OperationError::Runtime {
            address: PathAddress::empty(),
            message: message.to_string(),
        };
        match self
            .decision
            .recv()
            .map_err(|_| gone("boot scan ended before deciding whether work exists"))?
        {
            ScanDecision::NoWork => Ok(None),
            ScanDecision::WorkFound => {
                let outcome = self
                    .result
                    .recv()
                    .map_err(|_| gone("boot work ended without publishing a result"))?;
                outcome.map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_no_work_releases_immediately() {
        let (scan, boot) = boot_handoff();
        thread::spawn(move || scan.no_work());
        assert_eq!(boot.await_outcome().unwrap(), None);
    }

    #[test]
    fn test_work_found_blocks_until_result() {
        let (scan, boot) = boot_handoff();
        thread::spawn(move || {
            let completion = scan.work_found();
            thread::sleep(Duration::from_millis(30));
            completion.finish(Ok(Value::from("deployed")));
        });
        let outcome = boot.await_outcome().unwrap();
        assert_eq!(outcome.unwrap().as_str(), Some("deployed"));
    }

    #[test]
    fn test_work_failure_propagates() {
        let (scan, boot) = boot_handoff();
        thread::spawn(move || {
            scan.work_found().finish(Err(OperationError::Runtime {
                address: PathAddress::empty(),
                message: "deploy failed".to_string(),
            }));
        });
        assert!(boot.await_outcome().unwrap_err().is_runtime());
    }

    #[test]
    fn test_dropped_scan_side_is_an_error() {
        let (scan, boot) = boot_handoff();
        drop(scan);
        assert!(boot.await_outcome().is_err());
    }
}
