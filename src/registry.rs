//! Registry of supervised demon slots.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, info};

use crate::{
    demon::{DemonInstance, DemonKind},
    pid_file::PidFileStore,
};

/// All demon instances owned by one supervisor, keyed by demon name and slot.
///
/// Instances are created on the first `start` for a slot and kept for the registry's lifetime;
/// `stop` leaves them in place so a later `start` reuses them.
#[derive(Debug)]
pub struct DemonRegistry {
    pid_files: PidFileStore,
    demons: Mutex<BTreeMap<String, Vec<Arc<DemonInstance>>>>,
}

impl DemonRegistry {
    pub fn new(pid_files: PidFileStore) -> Self {
        Self {
            pid_files,
            demons: Mutex::new(BTreeMap::new()),
        }
    }

    /// Starts slots `0..count` of `kind`, creating instances as needed.
    ///
    /// Slots whose worker is already running are left untouched.
    pub fn start(&self, kind: &Arc<DemonKind>, count: usize) {
        info!("Starting {count} worker(s) for '{}'", kind.name);

        let instances: Vec<Arc<DemonInstance>> = {
            let mut demons = self.lock();
            let slots = demons.entry(kind.name.clone()).or_default();
            while slots.len() < count {
                let slot = slots.len();
                debug!("Registering '{}' slot {slot}", kind.name);
                slots.push(DemonInstance::new(
                    Arc::clone(kind),
                    slot,
                    self.pid_files.clone(),
                ));
            }
            slots[..count].to_vec()
        };

        for instance in instances {
            instance.start();
        }
    }

    /// Stops every instance registered under `name`.
    pub fn stop(&self, name: &str) {
        let instances = self.instances(name);
        if instances.is_empty() {
            debug!("No instances registered for '{name}'");
            return;
        }

        info!("Stopping {} worker(s) for '{name}'", instances.len());
        for instance in instances {
            instance.stop();
        }
    }

    /// Stops every registered demon.
    pub fn shutdown(&self) {
        for name in self.names() {
            self.stop(&name);
        }
    }

    /// Names of all demons that have been started at least once.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Instances registered under `name`, ordered by slot.
    pub fn instances(&self, name: &str) -> Vec<Arc<DemonInstance>> {
        self.lock().get(name).cloned().unwrap_or_default()
    }

    /// Worker pids tracked in memory for `name`, indexed by slot.
    pub fn running_pids(&self, name: &str) -> Vec<Option<u32>> {
        self.instances(name)
            .iter()
            .map(|instance| instance.worker_pid())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Arc<DemonInstance>>>> {
        self.demons
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
