//! Demo modules for the `sc` binary
//!
//! Each demo module publishes a counter once per cycle and logs the latest
//! counter it saw from anyone else.

use std::ops::ControlFlow;

use tracing::{debug, info, warn};
use wirecodec::{DataType, structured};

use crate::config::ModuleConfig;
use crate::error::ModuleError;
use crate::messages::ExitCode;
use crate::module::ModuleRuntime;
use crate::transport::Conference;

structured! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Counter("Counter") {
        pub module: String => "module",
        pub cycle: u64 => "cycle",
        pub value: u64 => "value",
    }
}

impl DataType for Counter {
    const ID: u32 = 1001;
}

/// Join `conference` as `name` and count until stopped
pub async fn run_counter_module(conference: Conference, name: String, frequency: f64) -> Result<ExitCode, ModuleError> {
    debug!(%name, frequency, "run_counter_module: called");
    let (sink, source) = conference.join();
    let runtime = ModuleRuntime::connect(ModuleConfig::new(name, frequency), conference.codec(), sink, source).await?;
    info!(module = runtime.name(), level = %runtime.managed_level(), "Demo module running");

    let mut value = 0u64;
    runtime
        .run(move |runtime, cycle| {
            value += 1;
            if let Some(seen) = runtime.latest::<Counter>() {
                debug!(module = runtime.name(), cycle, from = %seen.module, seen = seen.value, "Latest counter");
            }
            let counter = Counter {
                module: runtime.name().to_string(),
                cycle,
                value,
            };
            match runtime.send(&counter) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    warn!(module = runtime.name(), error = %e, "Counter not published");
                    ControlFlow::Break(ExitCode::ConnectionLost)
                }
            }
        })
        .await
}
