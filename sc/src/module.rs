//! Module-side runtime
//!
//! A module announces itself, learns its managed level from the
//! supercomponent and then loops: wait for permission, run one unit of work,
//! acknowledge. Under `not_managed` the permission comes from the module's own
//! clock instead of a pulse.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, trace, warn};
use wirecodec::{Codec, Container, DataType, TimeStamp};

use crate::config::{ManagedLevel, ModuleConfig};
use crate::error::ModuleError;
use crate::inbox::Inbox;
use crate::messages::{ControlMessage, ExitCode, ModuleAnnouncement, ModuleState, ModuleStateReport, Pulse, PulseAck};
use crate::transport::{ContainerSink, ContainerSource};

/// Answer to [`ModuleRuntime::wait_for_permission_to_proceed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Run the unit of work for this cycle
    Proceed(u64),
    Stop,
}

/// Requests a module to stop from outside its loop
#[derive(Debug, Clone)]
pub struct ModuleStopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ModuleStopHandle {
    pub fn stop(&self) {
        debug!("ModuleStopHandle::stop: called");
        self.tx.send_replace(true);
    }
}

enum Incoming {
    Pulse(Pulse, TimeStamp),
    Stop,
    Nothing,
}

/// One module's connection to a supercomponent
pub struct ModuleRuntime<K: ContainerSink> {
    config: ModuleConfig,
    codec: Codec,
    sink: K,
    inbox: Inbox,
    cid: u32,
    managed_level: ManagedLevel,
    ticker: Interval,
    local_cycle: u64,
    pending_ack: Option<u64>,
    last_pulse: Option<u64>,
    stopped: Option<ExitCode>,
    latest: HashMap<u32, Container>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<K: ContainerSink> ModuleRuntime<K> {
    /// Announce this module and wait for the supercomponent's configuration
    pub async fn connect<S>(config: ModuleConfig, codec: Codec, sink: K, source: S) -> Result<Self, ModuleError>
    where
        S: ContainerSource + 'static,
    {
        debug!(module = %config.name, "ModuleRuntime::connect: called");
        let mut inbox = Inbox::spawn(source, config.inbox_capacity);
        let announcement = ModuleAnnouncement {
            module: config.name.clone(),
            pid: std::process::id(),
            frequency: config.frequency,
        };
        send_with_retry(&sink, &codec, &announcement)?;

        let timeout = config.handshake_timeout();
        let deadline = Instant::now() + timeout;
        let mut latest = HashMap::new();
        let configuration = loop {
            let Some(container) = inbox.next_until(deadline).await else {
                return Err(ModuleError::NoSupercomponent { timeout });
            };
            match ControlMessage::decode(&container, &codec) {
                Ok(Some(ControlMessage::Configuration(c))) if c.module == config.name => break c,
                Ok(Some(_)) => {}
                Ok(None) => {
                    latest.insert(container.data_type(), container);
                }
                Err(e) => warn!(module = %config.name, error = %e, "Discarding malformed control message"),
            }
        };

        let mut ticker = interval(config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (stop_tx, stop_rx) = watch::channel(false);

        let runtime = Self {
            codec,
            sink,
            inbox,
            cid: configuration.cid,
            managed_level: configuration.managed_level,
            ticker,
            local_cycle: 0,
            pending_ack: None,
            last_pulse: None,
            stopped: None,
            latest,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            config,
        };
        runtime.report(ModuleState::Running, None)?;
        info!(module = %runtime.config.name, cid = runtime.cid, level = %runtime.managed_level, "Module connected");
        Ok(runtime)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// Level the supercomponent assigned to this module
    pub fn managed_level(&self) -> ManagedLevel {
        self.managed_level
    }

    pub fn stop_handle(&self) -> ModuleStopHandle {
        ModuleStopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Block until the next cycle may run
    ///
    /// Acknowledges the previous pulse first if the caller has not done so.
    pub async fn wait_for_permission_to_proceed(&mut self) -> Result<Permission, ModuleError> {
        self.acknowledge()?;
        if self.stopped.is_some() {
            return Ok(Permission::Stop);
        }
        match self.managed_level {
            ManagedLevel::NotManaged => Ok(self.wait_for_tick().await),
            ManagedLevel::PulseShift | ManagedLevel::PulseTimeAck => Ok(self.wait_for_pulse().await),
        }
    }

    /// Acknowledge the pulse being worked on, if any
    ///
    /// Returns whether an ack was sent. Never sends more than one ack per
    /// pulse and never one for a pulse that was not received.
    pub fn acknowledge(&mut self) -> Result<bool, ModuleError> {
        let Some(cycle) = self.pending_ack.take() else {
            return Ok(false);
        };
        trace!(module = %self.config.name, cycle, "ModuleRuntime::acknowledge");
        self.send(&PulseAck {
            cycle,
            module: self.config.name.clone(),
        })?;
        Ok(true)
    }

    /// Publish an application value to the conference
    pub fn send<T: DataType>(&self, value: &T) -> Result<(), ModuleError> {
        send_with_retry(&self.sink, &self.codec, value)
    }

    /// Most recent `T` received from another participant
    pub fn latest<T: DataType>(&self) -> Option<T> {
        let container = self.latest.get(&T::ID)?;
        match container.unpack(&self.codec) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(module = %self.config.name, data_type = T::ID, error = %e, "Stored container does not decode");
                None
            }
        }
    }

    /// Report NOT_RUNNING with `exit_code` and close the session
    pub fn finish(self, exit_code: ExitCode) -> Result<(), ModuleError> {
        info!(module = %self.config.name, ?exit_code, "Module finishing");
        self.report(ModuleState::NotRunning, Some(exit_code))
    }

    /// Drive the whole loop, calling `body` once per permitted cycle
    pub async fn run<F>(mut self, mut body: F) -> Result<ExitCode, ModuleError>
    where
        F: FnMut(&mut Self, u64) -> ControlFlow<ExitCode>,
    {
        let exit_code = loop {
            match self.wait_for_permission_to_proceed().await? {
                Permission::Proceed(cycle) => {
                    if let ControlFlow::Break(code) = body(&mut self, cycle) {
                        break code;
                    }
                }
                Permission::Stop => break self.stopped.unwrap_or_default(),
            }
        };
        self.acknowledge()?;
        self.finish(exit_code)?;
        Ok(exit_code)
    }

    async fn wait_for_tick(&mut self) -> Permission {
        tokio::select! {
            biased;
            _ = self.stop_rx.changed() => return self.stop(ExitCode::Okay),
            _ = self.ticker.tick() => {}
        }
        for container in self.inbox.drain() {
            if let Incoming::Stop = self.dispatch(container) {
                return self.stop(ExitCode::Okay);
            }
        }
        if self.inbox.is_closed() {
            return self.stop(ExitCode::ConnectionLost);
        }
        if let Err(e) = self.report(ModuleState::Running, None) {
            warn!(module = %self.config.name, error = %e, "Heartbeat not sent");
        }
        self.local_cycle += 1;
        Permission::Proceed(self.local_cycle)
    }

    async fn wait_for_pulse(&mut self) -> Permission {
        loop {
            let container = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => return self.stop(ExitCode::Okay),
                next = self.inbox.next() => match next {
                    Some(container) => container,
                    None => return self.stop(ExitCode::ConnectionLost),
                },
            };
            match self.dispatch(container) {
                Incoming::Pulse(pulse, sent) => return self.on_pulse(pulse, sent).await,
                Incoming::Stop => return self.stop(ExitCode::Okay),
                Incoming::Nothing => {}
            }
        }
    }

    async fn on_pulse(&mut self, pulse: Pulse, sent: TimeStamp) -> Permission {
        match self.managed_level {
            ManagedLevel::PulseTimeAck => self.pending_ack = Some(pulse.cycle),
            _ => {
                // the pulse carries supercomponent time plus this module's shift
                let shift = pulse
                    .timestamp
                    .duration_since(sent)
                    .unwrap_or_default()
                    .min(self.config.period());
                if !shift.is_zero() {
                    sleep(shift).await;
                }
            }
        }
        Permission::Proceed(pulse.cycle)
    }

    fn dispatch(&mut self, container: Container) -> Incoming {
        match ControlMessage::decode(&container, &self.codec) {
            Ok(Some(ControlMessage::Pulse(pulse))) if pulse.module == self.config.name => {
                if self.last_pulse == Some(pulse.cycle) {
                    debug!(module = %self.config.name, cycle = pulse.cycle, "Ignoring repeated pulse");
                    return Incoming::Nothing;
                }
                self.last_pulse = Some(pulse.cycle);
                Incoming::Pulse(pulse, container.sent())
            }
            Ok(Some(ControlMessage::Stop(stop))) if stop.addresses(&self.config.name) => Incoming::Stop,
            Ok(Some(_)) => Incoming::Nothing,
            Ok(None) => {
                self.latest.insert(container.data_type(), container);
                Incoming::Nothing
            }
            Err(e) => {
                warn!(module = %self.config.name, error = %e, "Discarding malformed control message");
                Incoming::Nothing
            }
        }
    }

    fn stop(&mut self, exit_code: ExitCode) -> Permission {
        let exit_code = *self.stopped.get_or_insert(exit_code);
        info!(module = %self.config.name, ?exit_code, "Module stopping");
        Permission::Stop
    }

    fn report(&self, state: ModuleState, exit_code: Option<ExitCode>) -> Result<(), ModuleError> {
        self.send(&ModuleStateReport {
            module: self.config.name.clone(),
            state,
            exit_code,
        })
    }
}

fn send_with_retry<K: ContainerSink, T: DataType>(sink: &K, codec: &Codec, value: &T) -> Result<(), ModuleError> {
    let container = codec.pack(value, TimeStamp::now())?;
    if let Err(first) = sink.send(&container) {
        warn!(data_type = T::ID, error = %first, "Send failed, retrying once");
        sink.send(&container)?;
    }
    Ok(())
}
