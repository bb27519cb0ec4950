use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::{
    config::{load_settings, ConnectorSettings, SettingsStore},
    driver::MiraiDriver,
    errors::DriverError,
    transport::Fetcher,
    Result,
};

/// Builds the transport for a given set of settings.
pub type FetcherFactory =
    Arc<dyn Fn(&ConnectorSettings) -> Result<Arc<dyn Fetcher>> + Send + Sync>;

/// Process-wide access point to the driver.
///
/// Hands out the same [`MiraiDriver`] for as long as the stored settings stay
/// the same; a settings change releases the old session and connects anew.
pub struct DriverHandle {
    settings: Arc<dyn SettingsStore>,
    factory: FetcherFactory,
    live: Mutex<Option<Arc<MiraiDriver>>>,
}

impl DriverHandle {
    pub fn new(settings: Arc<dyn SettingsStore>, factory: FetcherFactory) -> Self {
        Self {
            settings,
            factory,
            live: Mutex::new(None),
        }
    }

    pub async fn driver(&self) -> std::result::Result<Arc<MiraiDriver>, DriverError> {
        let settings = load_settings(self.settings.as_ref())?;
        let mut live = self.live.lock().await;

        if let Some(driver) = live.as_ref() {
            if driver.settings() == &settings {
                return Ok(Arc::clone(driver));
            }
            info!("connector settings changed; reconnecting");
            driver.release().await;
        }
        *live = None;

        let fetcher = (self.factory)(&settings)?;
        let driver = Arc::new(MiraiDriver::connect(settings, fetcher).await?);
        *live = Some(Arc::clone(&driver));
        Ok(driver)
    }

    /// Drop the cached driver; the next [`DriverHandle::driver`] reconnects.
    pub async fn invalidate(&self) {
        if let Some(driver) = self.live.lock().await.take() {
            driver.release().await;
        }
    }

    pub async fn shutdown(&self) {
        self.invalidate().await;
    }
}
