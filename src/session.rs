//! Device session: ownership of one open unit handle
//!
//! Every other component reaches the driver through [`DeviceSession::live`],
//! which fails with [`ScopeError::InvalidHandle`] once the session is closed.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::driver::Driver;
use crate::error::{Result, ScopeError};
use crate::ffi::PS4000_HANDLE;
use crate::types::{InfoKind, Model};

const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Identification strings reported by an open unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitInfo {
    pub driver_version: String,
    pub usb_version: String,
    pub hardware_version: String,
    pub variant: String,
    pub serial: String,
    pub cal_date: String,
    pub kernel_version: String,
}

impl UnitInfo {
    /// Model parsed from the variant string, if it is a known family member
    pub fn model(&self) -> Option<Model> {
        Model::from_variant(&self.variant)
    }
}

impl fmt::Display for UnitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Variant:          PS{}", self.variant)?;
        writeln!(f, "Serial:           {}", self.serial)?;
        writeln!(f, "Driver version:   {}", self.driver_version)?;
        writeln!(f, "USB version:      {}", self.usb_version)?;
        writeln!(f, "Hardware version: {}", self.hardware_version)?;
        writeln!(f, "Kernel version:   {}", self.kernel_version)?;
        write!(f, "Calibrated:       {}", self.cal_date)
    }
}

/// Progress of an asynchronous open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenStatus {
    pub percent: i16,
    pub complete: bool,
}

/// An open request that has been issued but not yet completed
pub struct PendingOpen {
    driver: Arc<dyn Driver>,
    handle: Option<PS4000_HANDLE>,
    percent: i16,
}

impl PendingOpen {
    /// Poll the driver once. Never blocks.
    pub fn progress(&mut self) -> Result<OpenStatus> {
        if self.handle.is_none() {
            let progress = self.driver.open_unit_progress().map_err(ScopeError::from)?;
            self.percent = progress.percent;
            if progress.complete {
                self.handle = Some(progress.handle);
            }
        }
        Ok(OpenStatus {
            percent: self.percent,
            complete: self.handle.is_some(),
        })
    }

    /// Poll until the open completes or `timeout` elapses
    pub fn finish(mut self, timeout: Duration) -> Result<DeviceSession> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.progress()?.complete {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ScopeError::Timeout(format!(
                    "open stalled at {}% after {:?}",
                    self.percent, timeout
                )));
            }
            thread::sleep(OPEN_POLL_INTERVAL);
        }
        match self.handle {
            Some(handle) => DeviceSession::attach(self.driver.clone(), handle),
            None => Err(ScopeError::NotFound("open did not yield a handle".into())),
        }
    }
}

/// Exclusive owner of one open unit
pub struct DeviceSession {
    driver: Arc<dyn Driver>,
    handle: Option<PS4000_HANDLE>,
    last_handle: PS4000_HANDLE,
    model: Option<Model>,
}

impl DeviceSession {
    /// Open the first unit the driver finds
    pub fn open(driver: Arc<dyn Driver>) -> Result<Self> {
        let handle = driver.open_unit(None).map_err(ScopeError::from)?;
        Self::attach(driver, handle)
    }

    /// Open the unit with the given batch/serial string
    pub fn open_serial(driver: Arc<dyn Driver>, serial: &str) -> Result<Self> {
        let handle = driver.open_unit(Some(serial)).map_err(ScopeError::from)?;
        Self::attach(driver, handle)
    }

    /// Start opening a unit without blocking. Poll the returned handle.
    pub fn open_async(driver: Arc<dyn Driver>, serial: Option<&str>) -> Result<PendingOpen> {
        driver.open_unit_async(serial).map_err(ScopeError::from)?;
        debug!("Asynchronous open started");
        Ok(PendingOpen {
            driver,
            handle: None,
            percent: 0,
        })
    }

    /// Serials of units that can be opened, without opening them
    pub fn enumerate(driver: &dyn Driver) -> Result<Vec<String>> {
        driver.enumerate_units().map_err(ScopeError::from)
    }

    fn attach(driver: Arc<dyn Driver>, handle: PS4000_HANDLE) -> Result<Self> {
        if handle <= 0 {
            return Err(ScopeError::NotFound(format!("driver returned handle {}", handle)));
        }
        let model = driver
            .get_unit_info(handle, InfoKind::VariantInfo)
            .ok()
            .and_then(|variant| Model::from_variant(&variant));
        match model {
            Some(model) => info!("Opened PS{} (handle {})", model.variant(), handle),
            None => warn!("Opened unit with unrecognised variant (handle {})", handle),
        }
        Ok(Self {
            driver,
            handle: Some(handle),
            last_handle: handle,
            model,
        })
    }

    /// Release the unit. Closing an already closed session is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        info!("Closing handle {}", handle);
        self.driver.close_unit(handle).map_err(ScopeError::from)
    }

    /// Driver and handle for a call, if the session is still open
    pub fn live(&self) -> Result<(&dyn Driver, PS4000_HANDLE)> {
        match self.handle {
            Some(handle) => Ok((self.driver.as_ref(), handle)),
            None => Err(ScopeError::InvalidHandle(self.last_handle)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<PS4000_HANDLE> {
        self.handle
    }

    pub fn model(&self) -> Option<Model> {
        self.model
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Check the unit still answers.
    ///
    /// Fails with [`ScopeError::CommunicationLost`] when the transport is
    /// gone and [`ScopeError::Busy`] while the unit is capturing.
    pub fn ping(&self) -> Result<()> {
        let (driver, handle) = self.live()?;
        driver.ping_unit(handle).map_err(ScopeError::from)
    }

    pub fn unit_info_field(&self, kind: InfoKind) -> Result<String> {
        let (driver, handle) = self.live()?;
        driver.get_unit_info(handle, kind).map_err(ScopeError::from)
    }

    /// Read every identification string
    pub fn unit_info(&self) -> Result<UnitInfo> {
        Ok(UnitInfo {
            driver_version: self.unit_info_field(InfoKind::DriverVersion)?,
            usb_version: self.unit_info_field(InfoKind::UsbVersion)?,
            hardware_version: self.unit_info_field(InfoKind::HardwareVersion)?,
            variant: self.unit_info_field(InfoKind::VariantInfo)?,
            serial: self.unit_info_field(InfoKind::BatchAndSerial)?,
            cal_date: self.unit_info_field(InfoKind::CalDate)?,
            kernel_version: self.unit_info_field(InfoKind::KernelVersion)?,
        })
    }

    /// Flash the front-panel LED. `start` > 0 flashes that many times,
    /// -1 flashes until stopped, 0 stops.
    pub fn flash_led(&self, start: i16) -> Result<()> {
        let (driver, handle) = self.live()?;
        driver.flash_led(handle, start).map_err(ScopeError::from)
    }

    pub fn is_led_flashing(&self) -> Result<bool> {
        let (driver, handle) = self.live()?;
        driver.is_led_flashing(handle).map_err(ScopeError::from)
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("handle", &self.handle)
            .field("model", &self.model)
            .finish()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close unit on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimulatedDriver};
    use crate::types::Model;

    fn driver() -> Arc<SimulatedDriver> {
        Arc::new(SimulatedDriver::new(SimConfig::for_model(Model::Ps4224)))
    }

    #[test]
    fn test_open_reads_model() {
        let session = DeviceSession::open(driver()).unwrap();
        assert!(session.is_open());
        assert_eq!(session.model(), Some(Model::Ps4224));
        let info = session.unit_info().unwrap();
        assert_eq!(info.model(), Some(Model::Ps4224));
        assert_eq!(info.serial, "SIM4224/0001");
    }

    #[test]
    fn test_closed_session_rejects_calls() {
        let mut session = DeviceSession::open(driver()).unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert!(matches!(session.ping(), Err(ScopeError::InvalidHandle(_))));
    }

    #[test]
    fn test_unit_is_exclusively_owned() {
        let sim = driver();
        let _first = DeviceSession::open(sim.clone()).unwrap();
        assert!(matches!(DeviceSession::open(sim.clone()), Err(ScopeError::NotFound(_))));
        assert!(DeviceSession::enumerate(sim.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn test_open_serial() {
        let sim = driver();
        assert!(matches!(
            DeviceSession::open_serial(sim.clone(), "NOPE/0000"),
            Err(ScopeError::NotFound(_))
        ));
        let session = DeviceSession::open_serial(sim, "SIM4224/0001").unwrap();
        assert!(session.handle().is_some());
    }

    #[test]
    fn test_async_open_can_be_polled() {
        let mut pending = DeviceSession::open_async(driver(), None).unwrap();
        let first = pending.progress().unwrap();
        assert!(!first.complete);
        let session = pending.finish(Duration::from_secs(1)).unwrap();
        assert!(session.ping().is_ok());
    }

    #[test]
    fn test_ping_distinguishes_lost_connection() {
        let sim = driver();
        let session = DeviceSession::open(sim.clone()).unwrap();
        sim.disconnect();
        assert!(matches!(session.ping(), Err(ScopeError::CommunicationLost(_))));
    }

    #[test]
    fn test_ping_reports_busy_while_capturing() {
        let mut config = SimConfig::for_model(Model::Ps4224);
        config.capture_time = Duration::from_secs(5);
        let sim = Arc::new(SimulatedDriver::new(config));
        let session = DeviceSession::open(sim.clone()).unwrap();
        let (driver, handle) = session.live().unwrap();
        driver
            .set_channel(handle, crate::types::Channel::A, true, true, crate::types::Range::V2)
            .unwrap();
        driver
            .run_block(handle, 0, 100, 3, 1, 0, Box::new(|_, _| {}))
            .unwrap();

        assert!(matches!(session.ping(), Err(ScopeError::Busy(_))));
        driver.stop(handle).unwrap();
        assert!(session.ping().is_ok());
    }

    #[test]
    fn test_drop_releases_unit() {
        let sim = driver();
        {
            let _session = DeviceSession::open(sim.clone()).unwrap();
            assert!(DeviceSession::open(sim.clone()).is_err());
        }
        let reopened = DeviceSession::open(sim).unwrap();
        assert!(reopened.is_open());
    }

    #[test]
    fn test_led_state() {
        let session = DeviceSession::open(driver()).unwrap();
        assert!(!session.is_led_flashing().unwrap());
        session.flash_led(-1).unwrap();
        assert!(session.is_led_flashing().unwrap());
    }
}
