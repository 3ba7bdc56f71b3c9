//! Actuator drivers and their URL-based factories.
//!
//! Config names each actuator by URL. `stub://` gives the in-memory
//! doubles, `plug://host[:port]` the smart-plug belt and
//! `serial://device` the bus-servo arm (behind the `arm-serial`
//! feature).

mod arm;
mod belt;

pub use arm::{servo_move_frame, servo_unload_frame, ArmDrive, BusServoArm, StubArm, ALL_SERVOS};
pub use belt::{BeltDrive, BeltState, SmartPlugBelt, StubBelt, SMART_PLUG_PORT};

use anyhow::{bail, Context, Result};
use std::time::Duration;

pub fn belt_from_url(url: &str, timeout: Duration) -> Result<Box<dyn BeltDrive>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(StubBelt::new()));
    }
    if let Some(rest) = url.strip_prefix("plug://") {
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .with_context(|| format!("bad plug port in {:?}", url))?,
            ),
            None => (rest, SMART_PLUG_PORT),
        };
        if host.is_empty() {
            bail!("belt url {:?} has no host", url);
        }
        return Ok(Box::new(SmartPlugBelt::new(host, port, timeout)));
    }
    bail!("unsupported belt url {:?}, expected stub:// or plug://", url);
}

pub fn arm_from_url(url: &str, baud: u32) -> Result<Box<dyn ArmDrive>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(StubArm::new()));
    }
    if let Some(path) = url.strip_prefix("serial://") {
        if path.is_empty() {
            bail!("arm url {:?} has no device path", url);
        }
        #[cfg(feature = "arm-serial")]
        {
            return Ok(Box::new(arm::open_serial(path, baud)?));
        }
        #[cfg(not(feature = "arm-serial"))]
        {
            let _ = baud;
            bail!(
                "arm url {:?} needs the arm-serial feature, rebuild with --features arm-serial",
                url
            );
        }
    }
    bail!("unsupported arm url {:?}, expected stub:// or serial://", url);
}
