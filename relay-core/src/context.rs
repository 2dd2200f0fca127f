//! Everything the router and the supervision logic share during one run.

use std::sync::Arc;

use relay_telemetry::{RelayMetrics, SinkFile};

use crate::error::SupervisionError;
use crate::supervision::{
    Flow, KillSender, Pid, SignalSender, SignalSlot, SupervisionSession, SIGNAL_SLOT,
};

pub struct RelayContext<S: SignalSender = KillSender> {
    pub session: SupervisionSession,
    pub signals: S,
    /// Mailbox filled by the signal handler.
    pub slot: &'static SignalSlot,
    /// Render child that receives the termination request on shutdown.
    pub child: Option<Pid>,
    /// Sink receiving verbatim position reports.
    pub diagnostics: Arc<SinkFile>,
    pub metrics: RelayMetrics,
}

impl RelayContext<KillSender> {
    /// Production context bound to the installed handler's slot.
    pub fn new(child: Pid, diagnostics: Arc<SinkFile>, metrics: RelayMetrics) -> Self {
        Self {
            session: SupervisionSession::new(),
            signals: KillSender,
            slot: &SIGNAL_SLOT,
            child: Some(child),
            diagnostics,
            metrics,
        }
    }
}

impl<S: SignalSender> RelayContext<S> {
    pub fn with_sender(
        signals: S,
        slot: &'static SignalSlot,
        child: Option<Pid>,
        diagnostics: Arc<SinkFile>,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            session: SupervisionSession::new(),
            signals,
            slot,
            child,
            diagnostics,
            metrics,
        }
    }

    /// Drains the slot and runs the supervision transitions.
    pub fn handle_signals(&mut self) -> Result<Flow, SupervisionError> {
        let pending = self.slot.take();
        if pending.registration.is_some() {
            self.metrics.record_signal("registration");
        }
        if pending.shutdown {
            self.metrics.record_signal("shutdown");
        }
        self.session.dispatch(pending, &mut self.signals, self.child)
    }
}
