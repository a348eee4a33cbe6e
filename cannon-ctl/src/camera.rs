use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

pub type Frame = RgbImage;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera is not open")]
    NotOpen,
}

/// Frame source shared by the detection and video activities
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> Result<(), CameraError>;
    /// Waits for the next frame
    async fn frame(&self) -> Result<Frame, CameraError>;
    async fn close(&self);
    fn is_open(&self) -> bool;
}
