use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    config::RelayConfig,
    hub::{Hub, HubHandle},
};

/// Starts and owns one hub per room.
pub struct Rooms {
    hubs: HashMap<String, HubHandle>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Rooms {
    /// Spawns a hub for every distinct name. Blank names are skipped.
    pub fn start<I, S>(names: I, config: &RelayConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hubs = HashMap::new();
        let mut tasks = Vec::new();

        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || hubs.contains_key(name) {
                continue;
            }
            let (handle, task) = Hub::spawn(name, config);
            hubs.insert(name.to_string(), handle);
            tasks.push((name.to_string(), task));
        }

        info!(rooms = hubs.len(), "rooms started");
        Self { hubs, tasks }
    }

    pub fn get(&self, name: &str) -> Option<&HubHandle> {
        self.hubs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hubs.keys().map(String::as_str)
    }

    pub fn handles(&self) -> HashMap<String, HubHandle> {
        self.hubs.clone()
    }

    fn signal_shutdown(&self) {
        for hub in self.hubs.values() {
            hub.shutdown();
        }
    }

    /// Stops every hub and waits for its control loop to return.
    pub async fn shutdown(self) {
        self.signal_shutdown();
        for (room, task) in self.tasks {
            if let Err(err) = task.await {
                error!(room = %room, error = ?err, "hub task failed");
            }
        }
        info!("rooms stopped");
    }
}
