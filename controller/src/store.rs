use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use virtual_thermostat_common::Setpoint;

/// One flat JSON file per thermostat holding its [`Setpoint`].
#[derive(Debug, Clone)]
pub struct SetpointStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl SetpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.path.as_ref()
    }

    pub async fn load(&self) -> anyhow::Result<Setpoint> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<Setpoint>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Setpoint::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Missing, unreadable or corrupt files all yield the defaults.
    pub async fn load_or_default(&self) -> Setpoint {
        match self.load().await {
            Ok(setpoint) => {
                debug!(path = %self.path.display(), ?setpoint, "setpoint loaded");
                setpoint
            }
            Err(err) => {
                warn!(
                    "failed to load setpoint from {}: {err:#}, using defaults",
                    self.path.display()
                );
                Setpoint::default()
            }
        }
    }

    pub async fn save(&self, setpoint: &Setpoint) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(setpoint)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}
