use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use flow_core::lifecycle::{PhaseDispatch, PhaseDispatcher};

/// Phase dispatcher that records every request and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<PhaseDispatch>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<PhaseDispatch> {
        self.dispatched.lock().clone()
    }

    pub fn last(&self) -> Option<PhaseDispatch> {
        self.dispatched.lock().last().cloned()
    }
}

#[async_trait]
impl PhaseDispatcher for RecordingDispatcher {
    async fn dispatch(&self, dispatch: PhaseDispatch) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("phase engine unavailable");
        }
        self.dispatched.lock().push(dispatch);
        Ok(())
    }
}
