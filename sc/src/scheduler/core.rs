//! Main scheduler task implementation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, trace, warn};
use wirecodec::{Codec, Container, DataType, TimeStamp};

use super::cycle::{PulseCycle, shift_offset};
use super::handle::SupercomponentHandle;
use super::status::{SchedulerMetrics, SchedulerState, StatusSnapshot};
use crate::config::{ManagedLevel, SupercomponentConfig};
use crate::error::{SupercomponentError, TrackerError};
use crate::inbox::Inbox;
use crate::messages::{
    ControlMessage, ModuleAnnouncement, ModuleConfiguration, ModuleState, ModuleStateReport, ModuleStop, Pulse,
    PulseAck,
};
use crate::tracker::{ModuleDescriptor, ModuleId, ModuleTracker, UpdateOutcome};
use crate::transport::{ContainerSink, ContainerSource};

/// The supercomponent's scheduling loop
///
/// Owns the module tracker and the cycle state. Inbound containers arrive
/// through an [`Inbox`]; outbound control messages go through the sink.
pub struct Supercomponent<K: ContainerSink> {
    config: SupercomponentConfig,
    codec: Codec,
    sink: K,
    inbox: Inbox,
    tracker: ModuleTracker,
    cycle: PulseCycle,
    state: SchedulerState,
    metrics: SchedulerMetrics,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<StatusSnapshot>,
}

/// How a wait for one module's acknowledgment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Acknowledged,
    Departed,
}

impl<K: ContainerSink> Supercomponent<K> {
    /// Create a scheduler; must be called inside a tokio runtime
    pub fn new<S>(config: SupercomponentConfig, codec: Codec, sink: K, source: S) -> Self
    where
        S: ContainerSource + 'static,
    {
        debug!(cid = config.cid, level = %config.managed_level, "Supercomponent::new: called");
        let inbox = Inbox::spawn(source, config.inbox_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let scheduler = Self {
            tracker: ModuleTracker::new(config.strict_timestamps),
            config,
            codec,
            sink,
            inbox,
            cycle: PulseCycle::default(),
            state: SchedulerState::Idle,
            metrics: SchedulerMetrics::default(),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            status_tx,
        };
        scheduler.publish();
        scheduler
    }

    pub fn handle(&self) -> SupercomponentHandle {
        SupercomponentHandle::new(self.stop_tx.clone(), self.status_tx.subscribe())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn tracker(&self) -> &ModuleTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            cid: self.config.cid,
            state: self.state,
            managed_level: self.config.managed_level,
            cycle: self.cycle.number,
            awaiting: self
                .cycle
                .awaiting()
                .and_then(|id| self.tracker.name(id))
                .map(String::from),
            modules: self.tracker.snapshot(),
            metrics: self.metrics.clone(),
        }
    }

    /// Run until a stop is requested; returns the final snapshot
    pub async fn run(mut self) -> StatusSnapshot {
        let level = self.config.managed_level;
        info!(cid = self.config.cid, %level, frequency = self.config.frequency, "Supercomponent started");
        if let Err(e) = self.config.validate() {
            warn!(error = %e, "Running with an invalid configuration");
        }
        self.set_state(SchedulerState::Scheduling(level));

        let mut ticker = interval(self.config.cycle_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stop_requested() {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => continue,
                _ = ticker.tick() => {}
            }
            self.run_cycle().await;
        }

        self.shutdown();
        info!(cycles = self.metrics.cycles_completed, stalls = self.metrics.stalls, "Supercomponent stopped");
        self.snapshot()
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&mut self, state: SchedulerState) {
        debug!(from = ?self.state, to = ?state, "Supercomponent::set_state: called");
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }

    async fn run_cycle(&mut self) {
        trace!(cycle = self.cycle.number, "Supercomponent::run_cycle");
        self.process_inbox();
        match self.config.managed_level {
            ManagedLevel::NotManaged => self.cycle.finish(),
            ManagedLevel::PulseShift => self.pulse_shift_cycle(),
            ManagedLevel::PulseTimeAck => self.pulse_time_ack_cycle().await,
        }
        self.metrics.cycles_completed += 1;
        self.publish();
    }

    /// Apply everything queued; acks arriving here are not awaited by anyone
    fn process_inbox(&mut self) {
        for container in self.inbox.drain() {
            if let Some(ack) = self.handle_container(&container) {
                self.reject_ack(&ack, None);
            }
        }
    }

    /// Apply one inbound container; acknowledgments are handed back
    fn handle_container(&mut self, container: &Container) -> Option<PulseAck> {
        let message = match ControlMessage::decode(container, &self.codec) {
            Ok(Some(message)) => message,
            Ok(None) => {
                trace!(data_type = container.data_type(), "Passing over application data");
                return None;
            }
            Err(e) => {
                warn!(data_type = container.data_type(), error = %e, "Discarding malformed control message");
                self.metrics.malformed_messages += 1;
                return None;
            }
        };
        match message {
            ControlMessage::Announcement(announcement) => self.on_announcement(announcement, container.sent()),
            ControlMessage::State(report) => self.on_state_report(report, container.sent()),
            ControlMessage::Ack(ack) => return Some(ack),
            other => trace!(kind = other.kind(), "Ignoring control message"),
        }
        None
    }

    fn on_announcement(&mut self, announcement: ModuleAnnouncement, sent: TimeStamp) {
        let name = announcement.module;
        let excluded = self.config.is_excluded(&name);
        let known = self.tracker.find(&name).is_some();
        let id = self.tracker.register(
            ModuleDescriptor::new(name.clone(), announcement.pid, announcement.frequency, sent).excluded(excluded),
        );
        if known {
            debug!(module = %name, %id, "Module announced again");
        } else {
            info!(module = %name, %id, pid = announcement.pid, excluded, "Module joined");
        }

        let reply = ModuleConfiguration {
            module: name.clone(),
            managed_level: self.config.effective_level(&name),
            cid: self.config.cid,
        };
        if let Err(e) = self.send_control(&name, &reply, TimeStamp::now()) {
            warn!(module = %name, error = %e, "Failed to configure module");
        }
    }

    fn on_state_report(&mut self, report: ModuleStateReport, sent: TimeStamp) {
        let Some(id) = self.tracker.find(&report.module) else {
            warn!(module = %report.module, "State report from unknown module");
            return;
        };
        match self.tracker.update(id, report.state, sent, report.exit_code) {
            Ok(UpdateOutcome::Applied) => match report.state {
                ModuleState::Running => trace!(module = %report.module, "Heartbeat"),
                ModuleState::NotRunning => {
                    info!(module = %report.module, exit_code = ?report.exit_code, "Module reported not running")
                }
            },
            Ok(UpdateOutcome::Unchanged) => {}
            Ok(UpdateOutcome::Stale) => debug!(module = %report.module, %sent, "Ignoring stale state report"),
            Err(e) => {
                warn!(error = %e, "Rejected state report");
                self.metrics.invalid_transitions += 1;
            }
        }
    }

    fn pulse_shift_cycle(&mut self) {
        let targets = self.tracker.pulse_targets();
        self.cycle.begin(targets.clone());
        let now = TimeStamp::now();
        let increment = self.config.pulse_shift.shift_increment();
        for (position, id) in targets.into_iter().enumerate() {
            let Some(name) = self.tracker.name(id).map(String::from) else {
                continue;
            };
            let pulse = Pulse {
                cycle: self.cycle.number,
                timestamp: now.saturating_add(shift_offset(position, increment)),
                module: name,
            };
            self.deliver_pulse(id, &pulse, now);
        }
        self.cycle.finish();
    }

    async fn pulse_time_ack_cycle(&mut self) {
        let targets = self.tracker.pulse_targets();
        self.cycle.begin(targets.clone());
        let timeout = self.config.pulse_time_ack.timeout();
        let yield_delay = self.config.pulse_time_ack.yield_delay();

        for (position, id) in targets.into_iter().enumerate() {
            if self.stop_requested() {
                info!(cycle = self.cycle.number, "Stop requested, ending sweep early");
                break;
            }
            // may have terminated while an earlier module was being waited on
            let Some(module) = self.tracker.get(id).filter(ModuleDescriptor::is_pulse_target) else {
                continue;
            };
            let cycle = self.cycle.number;
            let sent = TimeStamp::now();
            let pulse = Pulse {
                cycle,
                timestamp: sent,
                module: module.name.clone(),
            };
            if !self.deliver_pulse(id, &pulse, sent) {
                continue;
            }

            let deadline = Instant::now() + timeout;
            self.cycle.await_ack(position, deadline);
            self.publish();
            let outcome = self.await_ack(id, &module.name, cycle, deadline, timeout).await;
            self.cycle.resolve();
            match outcome {
                Ok(AckOutcome::Acknowledged) => {
                    record(self.tracker.record_ack(id));
                    self.metrics.acks_received += 1;
                    sleep(yield_delay).await;
                }
                Ok(AckOutcome::Departed) => {
                    info!(module = %module.name, cycle, "Module stopped running while awaited");
                }
                Err(e) => self.record_stall(id, &e),
            }
        }
        self.cycle.finish();
    }

    /// Block on the inbox until `module` acknowledges `cycle`, stops running,
    /// or `deadline` passes
    async fn await_ack(
        &mut self,
        id: ModuleId,
        module: &str,
        cycle: u64,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<AckOutcome, SupercomponentError> {
        loop {
            let Some(container) = self.inbox.next_until(deadline).await else {
                return Err(SupercomponentError::StallTimeout {
                    module: module.to_string(),
                    cycle,
                    timeout,
                });
            };
            if let Some(ack) = self.handle_container(&container) {
                if ack.module == module && ack.cycle == cycle {
                    trace!(module, cycle, "Acknowledged");
                    return Ok(AckOutcome::Acknowledged);
                }
                self.reject_ack(&ack, Some((module, cycle)));
            }
            if !self.tracker.get(id).is_some_and(|m| m.is_pulse_target()) {
                return Ok(AckOutcome::Departed);
            }
        }
    }

    fn reject_ack(&mut self, ack: &PulseAck, awaiting: Option<(&str, u64)>) {
        self.metrics.rejected_acks += 1;
        let reason = match awaiting {
            _ if self.tracker.find(&ack.module).is_none() => "unknown module",
            Some((module, _)) if ack.module != module => "not the module being waited on",
            Some(_) => "wrong cycle",
            None => "no acknowledgment pending",
        };
        warn!(module = %ack.module, cycle = ack.cycle, reason, "Ignoring acknowledgment");
    }

    /// Send a pulse, counting a stall when it cannot be delivered
    fn deliver_pulse(&mut self, id: ModuleId, pulse: &Pulse, sent: TimeStamp) -> bool {
        match self.send_control(&pulse.module, pulse, sent) {
            Ok(()) => {
                record(self.tracker.record_pulse(id));
                self.metrics.pulses_sent += 1;
                true
            }
            Err(e) => {
                self.record_stall(id, &e);
                false
            }
        }
    }

    fn record_stall(&mut self, id: ModuleId, reason: &SupercomponentError) {
        self.metrics.stalls += 1;
        if let Some(stalls) = record(self.tracker.mark_stalled(id)) {
            warn!(module = self.tracker.name(id), stalls, reason = %reason, "Module stalled");
        }
    }

    /// Pack and send, retrying once on a transport failure
    fn send_control<T: DataType>(&mut self, module: &str, message: &T, sent: TimeStamp) -> Result<(), SupercomponentError> {
        let container = self.codec.pack(message, sent)?;
        if let Err(first) = self.sink.send(&container) {
            warn!(module, error = %first, "Send failed, retrying once");
            self.metrics.send_retries += 1;
            self.sink
                .send(&container)
                .map_err(|source| SupercomponentError::TransportSendFailure {
                    module: module.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.set_state(SchedulerState::Stopping);
        self.process_inbox();
        for module in self.tracker.list_active() {
            let stop = ModuleStop {
                module: module.name.clone(),
            };
            match self.send_control(&module.name, &stop, TimeStamp::now()) {
                Ok(()) => {
                    record(self.tracker.mark_terminated(module.id, TimeStamp::now()));
                }
                Err(e) => warn!(module = %module.name, error = %e, "Failed to deliver stop"),
            }
        }
        // modules still mid-handshake are not tracked yet
        if let Err(e) = self.send_control("*", &ModuleStop::all(), TimeStamp::now()) {
            warn!(error = %e, "Failed to broadcast stop");
        }
        self.set_state(SchedulerState::Stopped);
    }
}

/// Log a tracker failure for an id the tracker itself handed out
fn record<T>(result: Result<T, TrackerError>) -> Option<T> {
    result.map_err(|e| warn!(error = %e, "Tracker rejected update")).ok()
}
