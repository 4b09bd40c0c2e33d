use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use homegate_core::{Command, DeviceId, SystemSnapshot};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("control loop is not running")]
    LoopStopped,
}

/// Latest published snapshot, replaced wholesale on every publish.
type Slot = Arc<Mutex<Arc<SystemSnapshot>>>;

/// Create the shared snapshot slot and command queue.
///
/// The publisher and the queue belong to the control loop; the handle is
/// cloned out to readers.
pub fn channel(max_power_w: i32, lock_wait: Duration) -> (StatePublisher, StateHandle, CommandQueue) {
    let slot: Slot = Arc::new(Mutex::new(Arc::new(SystemSnapshot::default())));
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = StatePublisher {
        slot: Arc::clone(&slot),
        lock_wait,
    };
    let handle = StateHandle {
        slot,
        lock_wait,
        max_power_w,
        commands: tx,
        cached: Arc::new(StdMutex::new(Arc::new(SystemSnapshot::default()))),
    };
    (publisher, handle, CommandQueue { rx })
}

/// Writer side of the snapshot.
pub struct StatePublisher {
    slot: Slot,
    lock_wait: Duration,
}

impl StatePublisher {
    /// Replace the snapshot. Gives up after the bounded wait, leaving the
    /// previous snapshot in place; returns whether it was published.
    pub async fn publish(&self, snapshot: SystemSnapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        match timeout(self.lock_wait, self.slot.lock()).await {
            Ok(mut slot) => {
                *slot = snapshot;
                true
            }
            Err(_) => {
                debug!("Snapshot lock busy, skipping publish");
                false
            }
        }
    }
}

/// Reader and command side, safe to clone into any task.
#[derive(Clone)]
pub struct StateHandle {
    slot: Slot,
    lock_wait: Duration,
    max_power_w: i32,
    commands: mpsc::UnboundedSender<Command>,
    /// Last snapshot this handle (and its clones) obtained.
    cached: Arc<StdMutex<Arc<SystemSnapshot>>>,
}

impl StateHandle {
    /// Copy of the latest snapshot. Never waits longer than the bounded
    /// wait; if the lock stays busy, the previously obtained copy is returned.
    pub async fn get_system_state(&self) -> SystemSnapshot {
        let latest = match timeout(self.lock_wait, self.slot.lock()).await {
            Ok(slot) => {
                let latest = Arc::clone(&slot);
                drop(slot);
                *self.cache() = Arc::clone(&latest);
                latest
            }
            Err(_) => {
                debug!("Snapshot lock busy, serving cached state");
                Arc::clone(&self.cache())
            }
        };
        SystemSnapshot::clone(&latest)
    }

    pub fn max_power_w(&self) -> i32 {
        self.max_power_w
    }

    /// Queue a switch command; applied on the control loop's next cycle.
    pub fn set_device_state(&self, id: DeviceId, on: bool) -> Result<(), StateError> {
        self.enqueue(Command::SetDeviceState { id, on })
    }

    /// Queue a target temperature change; applied on the next cycle.
    pub fn set_device_target_temp(&self, id: DeviceId, celsius: f32) -> Result<(), StateError> {
        self.enqueue(Command::SetTargetTemperature { id, celsius })
    }

    fn enqueue(&self, command: Command) -> Result<(), StateError> {
        self.commands
            .send(command)
            .map_err(|_| StateError::LoopStopped)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, Arc<SystemSnapshot>> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving end of the command queue, drained once per cycle.
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Every command queued so far, oldest first.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            commands.push(command);
        }
        commands
    }
}
