//! Lock actuator output.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Output driving the physical lock. Energized means unlocked.
pub trait Actuator: Send {
    fn energize(&mut self) -> io::Result<()>;
    fn de_energize(&mut self) -> io::Result<()>;
}

/// Actuator behind a sysfs-style GPIO value file (`/sys/class/gpio/gpioN/value`).
///
/// Without a value file the actuator only logs, which is how the daemon runs
/// off-device.
#[derive(Debug, Clone, Default)]
pub struct GpioActuator {
    value_path: Option<PathBuf>,
}

impl GpioActuator {
    pub fn new(value_path: Option<PathBuf>) -> Self {
        if value_path.is_none() {
            info!("No actuator GPIO configured; actuator output is simulated");
        }
        Self { value_path }
    }

    fn write(&self, level: &str) -> io::Result<()> {
        match &self.value_path {
            Some(path) => {
                debug!("GPIO {} <- {}", path.display(), level);
                fs::write(path, level)
            }
            None => {
                debug!("Simulated actuator <- {}", level);
                Ok(())
            }
        }
    }
}

impl Actuator for GpioActuator {
    fn energize(&mut self) -> io::Result<()> {
        self.write("1")
    }

    fn de_energize(&mut self) -> io::Result<()> {
        self.write("0")
    }
}

/// Actuator transition recorded by [`FakeActuator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorEvent {
    Energized,
    DeEnergized,
}

/// Recording actuator for tests. Clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct FakeActuator {
    events: Arc<Mutex<Vec<ActuatorEvent>>>,
}

impl FakeActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActuatorEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, event: ActuatorEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    fn record(&self, event: ActuatorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Actuator for FakeActuator {
    fn energize(&mut self) -> io::Result<()> {
        self.record(ActuatorEvent::Energized);
        Ok(())
    }

    fn de_energize(&mut self) -> io::Result<()> {
        self.record(ActuatorEvent::DeEnergized);
        Ok(())
    }
}
