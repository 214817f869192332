//! Generic `DepthSensor` trait for depth and colour+depth devices.

use async_trait::async_trait;
use omnisense_types::{OmniError, SensorFrame, SensorId, SensorRole};

/// A depth device that delivers at most one frame per call.
///
/// Implementations should return as soon as a frame is available.  The
/// caller bounds every read with its own timeout, so a driver that blocks
/// waiting for the device is cancelled rather than stalling the loop.
#[async_trait]
pub trait DepthSensor: Send {
    /// Stable identifier, e.g. `"floor"` or `"body"`.
    fn id(&self) -> &SensorId;

    /// Mounting role resolved when the device was connected.
    fn role(&self) -> SensorRole;

    /// Read the latest frame.
    ///
    /// Returns `Ok(None)` when the device has no new frame for this cycle.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::SensorUnavailable`] when the device is
    /// disconnected or the transfer failed.
    async fn read_frame(&mut self) -> Result<Option<SensorFrame>, OmniError>;
}
