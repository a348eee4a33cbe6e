use glam::Vec2;
use image::{
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
    ColorType, ImageError, Rgb, RgbImage,
};
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};

use crate::detector::{draw_box, draw_label, LABEL_ADVANCE, LABEL_HEIGHT};

pub const JPEG_QUALITY: u8 = 80;
const FPS_SAMPLES: usize = 16;
const CROSSHAIR: Rgb<u8> = Rgb([255, 0, 0]);
const NO_DATA: Rgb<u8> = Rgb([128, 128, 128]);
const CAPTION: Rgb<u8> = Rgb([255, 255, 255]);
const FPS_COLOUR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] ImageError),
    #[error("encoder task failed: {0}")]
    Join(#[from] JoinError),
}

/// Moving average of the last sixteen frame rates
#[derive(Default, Debug)]
pub struct FrameRate {
    samples: [f32; FPS_SAMPLES],
    count: usize,
}

impl FrameRate {
    /// Frames shorter than a millisecond are not counted
    pub fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis();
        if ms > 0 {
            self.samples[self.count % FPS_SAMPLES] = 1000.0 / ms as f32;
            self.count += 1;
        }
    }
    pub fn average(&self) -> f32 {
        self.samples.iter().sum::<f32>() / FPS_SAMPLES as f32
    }
    pub fn frames(&self) -> usize {
        self.count
    }
}

/// The grey frame streamed while the turret is SAFE
pub fn no_data_frame(width: u32, height: u32) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, NO_DATA);
    let (w, h) = (width as i64, height as i64);
    draw_box(&mut frame, w / 4, h / 4, w * 3 / 4, h * 3 / 4, Rgb([0, 0, 0]), 4);
    let caption = "NO DATA";
    let x = w / 2 - caption.len() as i64 * LABEL_ADVANCE / 2;
    draw_label(&mut frame, caption, x, h / 2 - LABEL_HEIGHT / 2, CAPTION);
    frame
}

/// Draws the aim point, which sits half the offset correction away from the centre
pub fn draw_crosshair(frame: &mut RgbImage, correction: Vec2, colour: Rgb<u8>) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let cx = w / 2 - (correction.x / 2.0) as i64;
    let cy = h / 2 - (correction.y / 2.0) as i64;
    let (size, gap) = (10, 4);
    let mut put = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && x < w && y < h {
            frame.put_pixel(x as u32, y as u32, colour);
        }
    };
    for d in gap..=size {
        put(cx, cy - d);
        put(cx, cy + d);
        put(cx - d, cy);
        put(cx + d, cy);
    }
    put(cx, cy);
}

/// Halves the frame and overlays the aim point, or swaps in the no data frame.
/// Either way the streaming rate goes in the top left corner.
pub fn compose(frame: &RgbImage, safe: bool, correction: Vec2, fps: f32) -> RgbImage {
    let (w, h) = (frame.width() / 2, frame.height() / 2);
    let mut small = if safe {
        no_data_frame(w, h)
    } else {
        let mut small = imageops::resize(frame, w, h, FilterType::Triangle);
        draw_crosshair(&mut small, correction, CROSSHAIR);
        small
    };
    draw_label(&mut small, &format!("FPS {:.2}", fps), 4, 4, FPS_COLOUR);
    small
}

/// JPEG encodes on the blocking pool
pub async fn encode_jpeg(frame: RgbImage) -> Result<Vec<u8>, VideoError> {
    tokio::task::spawn_blocking(move || {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            ColorType::Rgb8,
        )?;
        Ok::<_, VideoError>(buf)
    })
    .await?
}
