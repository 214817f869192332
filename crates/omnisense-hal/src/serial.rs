//! [`SerialLineActuator`] – motor controller on a serial line.
//!
//! The port is opened at the controller's line settings (9600 baud, 8N1, no
//! flow control by default) through `serialport`.  Writes happen on a
//! dedicated writer thread; [`send`](Actuator::send) only hands the line over
//! and awaits the acknowledgement under `write_timeout`, so a stalled device
//! can never pin the async runtime.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use omnisense_types::{MotorCommand, OmniError};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::mixer::{encode_line, wheels_for};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

type LineRequest = (String, oneshot::Sender<io::Result<()>>);

/// Owns the writer thread of one open port.  Dropping it closes the queue
/// and lets the thread exit after its current write.
struct LineWriter {
    port: String,
    queue: mpsc::Sender<LineRequest>,
}

impl LineWriter {
    fn spawn(port: &str, mut sink: Box<dyn Write + Send>) -> Result<Self, OmniError> {
        // One line queued behind the one being written.
        let (queue, mut rx) = mpsc::channel::<LineRequest>(1);
        thread::Builder::new()
            .name("omnisense-serial-writer".to_string())
            .spawn(move || {
                while let Some((line, ack)) = rx.blocking_recv() {
                    let res = sink.write_all(line.as_bytes()).and_then(|()| sink.flush());
                    let _ = ack.send(res);
                }
                debug!("serial writer thread exiting");
            })
            .map_err(|e| OmniError::ActuatorWrite(format!("cannot spawn writer thread: {e}")))?;
        Ok(Self {
            port: port.to_string(),
            queue,
        })
    }
}

/// Writes one `"m1,m2,m3\n"` line per command to the attached controller.
pub struct SerialLineActuator {
    baud_rate: u32,
    write_timeout: Duration,
    link: Option<LineWriter>,
}

impl Default for SerialLineActuator {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            link: None,
        }
    }
}

impl SerialLineActuator {
    /// Create a detached actuator.  Call [`Actuator::connect`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Bound on one line write, both on the port and on the acknowledgement.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn attach(&mut self, port: &str, sink: Box<dyn Write + Send>) -> Result<(), OmniError> {
        self.link = Some(LineWriter::spawn(port, sink)?);
        Ok(())
    }
}

#[async_trait]
impl Actuator for SerialLineActuator {
    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn connect(&mut self, port: &str) -> Result<(), OmniError> {
        // Drop any previous link before reopening.
        self.link = None;
        let serial = serialport::new(port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.write_timeout)
            .open()
            .map_err(|e| OmniError::ActuatorWrite(format!("cannot open {port}: {e}")))?;
        self.attach(port, Box::new(serial))?;
        info!(port, baud = self.baud_rate, "motor controller connected");
        Ok(())
    }

    fn port(&self) -> Option<String> {
        self.link.as_ref().map(|l| l.port.clone())
    }

    fn available_ports(&self) -> Result<Vec<String>, OmniError> {
        let ports = serialport::available_ports()
            .map_err(|e| OmniError::ActuatorWrite(format!("port discovery failed: {e}")))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    async fn send(&mut self, command: MotorCommand) -> Result<(), OmniError> {
        let link = self.link.as_ref().ok_or(OmniError::ActuatorDisconnected)?;
        let line = encode_line(&wheels_for(&command));
        let (ack_tx, ack_rx) = oneshot::channel();
        link.queue.try_send((line, ack_tx)).map_err(|e| match e {
            TrySendError::Full(_) => {
                OmniError::ActuatorWrite("controller busy: previous line pending".to_string())
            }
            TrySendError::Closed(_) => {
                OmniError::ActuatorWrite("writer thread stopped".to_string())
            }
        })?;

        let res = match tokio::time::timeout(self.write_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(OmniError::ActuatorWrite(e.to_string())),
            Ok(Err(_)) => Err(OmniError::ActuatorWrite("writer thread stopped".to_string())),
            Err(_) => Err(OmniError::ActuatorWrite(format!(
                "write not acknowledged within {:?}",
                self.write_timeout
            ))),
        };
        if let Err(e) = &res {
            warn!(port = %link.port, error = %e, "motor command write failed");
        }
        res
    }
}
