//! Arm drivers for the 6-channel bus-servo controller.
//!
//! The controller takes binary frames: two 0x55 header bytes, a length
//! byte covering command plus parameters, the command byte, then the
//! parameters. Positions and move times are little-endian u16. Frame
//! encoding lives in free functions so it can be tested byte for byte
//! without hardware.

use anyhow::{anyhow, Context, Result};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

const FRAME_HEADER: u8 = 0x55;
const CMD_SERVO_MOVE: u8 = 0x03;
const CMD_MULT_SERVO_UNLOAD: u8 = 0x14;

/// Every channel the controller drives.
pub const ALL_SERVOS: [u8; 6] = [1, 2, 3, 4, 5, 6];

/// Boundary trait for the arm actuator.
pub trait ArmDrive: Send {
    fn name(&self) -> &str;
    /// Move the listed servos to their targets over `duration_ms`.
    fn set_pose(&mut self, targets: &[(u8, u16)], duration_ms: u16) -> Result<()>;
    /// Cut torque on all servos so the arm goes limp.
    fn power_off(&mut self) -> Result<()>;
}

/// Encode a coordinated move of `targets` servos over `duration_ms`.
pub fn servo_move_frame(targets: &[(u8, u16)], duration_ms: u16) -> Vec<u8> {
    let params = 3 + 3 * targets.len();
    let mut frame = Vec::with_capacity(params + 4);
    frame.push(FRAME_HEADER);
    frame.push(FRAME_HEADER);
    frame.push((params + 2) as u8);
    frame.push(CMD_SERVO_MOVE);
    frame.push(targets.len() as u8);
    frame.extend_from_slice(&duration_ms.to_le_bytes());
    for &(id, position) in targets {
        frame.push(id);
        frame.extend_from_slice(&position.to_le_bytes());
    }
    frame
}

/// Encode a torque release for the listed servos.
pub fn servo_unload_frame(ids: &[u8]) -> Vec<u8> {
    let params = 1 + ids.len();
    let mut frame = Vec::with_capacity(params + 4);
    frame.push(FRAME_HEADER);
    frame.push(FRAME_HEADER);
    frame.push((params + 2) as u8);
    frame.push(CMD_MULT_SERVO_UNLOAD);
    frame.push(ids.len() as u8);
    frame.extend_from_slice(ids);
    frame
}

/// Bus-servo arm over any byte sink, serial port in production.
pub struct BusServoArm<W: io::Write + Send> {
    writer: W,
    name: String,
}

impl<W: io::Write + Send> BusServoArm<W> {
    pub fn from_writer(writer: W, name: &str) -> Self {
        Self {
            writer,
            name: name.to_string(),
        }
    }
}

impl<W: io::Write + Send> ArmDrive for BusServoArm<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_pose(&mut self, targets: &[(u8, u16)], duration_ms: u16) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let frame = servo_move_frame(targets, duration_ms);
        self.writer
            .write_all(&frame)
            .with_context(|| format!("write move frame to {}", self.name))?;
        self.writer
            .flush()
            .with_context(|| format!("flush move frame to {}", self.name))?;
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        let frame = servo_unload_frame(&ALL_SERVOS);
        self.writer
            .write_all(&frame)
            .with_context(|| format!("write unload frame to {}", self.name))?;
        self.writer
            .flush()
            .with_context(|| format!("flush unload frame to {}", self.name))?;
        Ok(())
    }
}

/// Write timeout on the serial link.
#[cfg(feature = "arm-serial")]
const SERIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Open the controller on a serial device.
#[cfg(feature = "arm-serial")]
pub fn open_serial(path: &str, baud: u32) -> Result<BusServoArm<Box<dyn serialport::SerialPort>>> {
    let port = serialport::new(path, baud)
        .timeout(SERIAL_TIMEOUT)
        .open()
        .with_context(|| format!("open serial port {}", path))?;
    Ok(BusServoArm::from_writer(
        port,
        &format!("serial://{}", path),
    ))
}

#[derive(Debug, Default)]
struct StubArmInner {
    poses: Vec<Vec<(u8, u16)>>,
    durations: Vec<u16>,
    power_offs: usize,
    fail_at_call: Option<usize>,
}

/// In-memory arm double. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct StubArm {
    inner: Arc<Mutex<StubArmInner>>,
}

impl StubArm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubArmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the `n`th set_pose call, counted from zero.
    pub fn fail_at_call(&self, n: usize) {
        self.lock().fail_at_call = Some(n);
    }

    pub fn poses(&self) -> Vec<Vec<(u8, u16)>> {
        self.lock().poses.clone()
    }

    pub fn durations(&self) -> Vec<u16> {
        self.lock().durations.clone()
    }

    pub fn power_offs(&self) -> usize {
        self.lock().power_offs
    }
}

impl ArmDrive for StubArm {
    fn name(&self) -> &str {
        "stub://arm"
    }

    fn set_pose(&mut self, targets: &[(u8, u16)], duration_ms: u16) -> Result<()> {
        let mut inner = self.lock();
        let call = inner.poses.len();
        if inner.fail_at_call == Some(call) {
            inner.fail_at_call = None;
            return Err(anyhow!("stub arm fault at call {}", call));
        }
        inner.poses.push(targets.to_vec());
        inner.durations.push(duration_ms);
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        self.lock().power_offs += 1;
        Ok(())
    }
}
