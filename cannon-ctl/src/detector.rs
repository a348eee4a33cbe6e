use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, Drawable, OriginDimensions, Pixel, Point, Size},
    text::{Baseline, Text},
};
use glam::Vec2;
use image::{Rgb, RgbImage};
use log::info;

/// Most detections kept from one cycle
pub const MAX_DETECTIONS: usize = 20;

pub const USE_OPENCV: u8 = 0x14;
pub const USE_TF: u8 = 0x15;

const BOX_COLOUR: Rgb<u8> = Rgb([0, 255, 10]);
/// Height of one line of overlay text
pub const LABEL_HEIGHT: i64 = 10;
/// Width of one overlay text glyph
pub const LABEL_ADVANCE: i64 = 6;

/// The detection backends the turret can switch between at runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    TemplateMatch,
    NeuralNet,
}

impl Strategy {
    /// Angular tolerance in degrees used to judge tracking stability
    pub fn epsilon(self) -> f32 {
        match self {
            Strategy::TemplateMatch => 0.3,
            Strategy::NeuralNet => 1.2,
        }
    }
    /// The command byte that selects this strategy, echoed back as its acknowledgement
    pub fn command(self) -> u8 {
        match self {
            Strategy::TemplateMatch => USE_OPENCV,
            Strategy::NeuralNet => USE_TF,
        }
    }
    pub fn from_command(cmd: u8) -> Option<Strategy> {
        match cmd {
            USE_OPENCV => Some(Strategy::TemplateMatch),
            USE_TF => Some(Strategy::NeuralNet),
            _ => None,
        }
    }
    /// Anything but `tensor` selects template matching
    pub fn from_config(name: &str) -> Strategy {
        match name {
            "tensor" => Strategy::NeuralNet,
            _ => Strategy::TemplateMatch,
        }
    }
    pub fn config_name(self) -> &'static str {
        match self {
            Strategy::TemplateMatch => "opencv",
            Strategy::NeuralNet => "tensor",
        }
    }
}

/// One target found in a frame, in source image pixels
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub id: u8,
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
    pub center: Vec2,
    pub label: String,
}

impl Detection {
    pub fn from_box(id: u8, xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Detection {
        Self {
            id,
            xmin,
            xmax,
            ymin,
            ymax,
            center: Vec2::new((xmin + xmax) / 2.0, (ymin + ymax) / 2.0),
            label: format!("Target {}", id),
        }
    }
}

/// The result of one detection cycle together with the size of the frame it came from
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    items: Vec<Detection>,
    pub width: u32,
    pub height: u32,
}

impl Detections {
    pub fn new(mut items: Vec<Detection>, width: u32, height: u32) -> Detections {
        items.truncate(MAX_DETECTIONS);
        Self {
            items,
            width,
            height,
        }
    }
    pub fn detected_item(&self, id: u8) -> Option<&Detection> {
        self.items.iter().find(|d| d.id == id)
    }
    pub fn num_detected(&self) -> usize {
        self.items.len()
    }
    pub fn items(&self) -> &[Detection] {
        &self.items
    }
    /// Frame centre in pixels
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width as f32 / 2.0, self.height as f32 / 2.0)
    }
}

/// A detection backend
pub trait DetectStrategy: Send {
    fn detect(&mut self, frame: &RgbImage) -> Vec<Detection>;
}

/// Runs the active backend and keeps its latest detections.
///
/// Lives behind the session's detection lock. Switching backends keeps the
/// detections already gathered until the next cycle replaces them.
pub struct Detector {
    strategy: Strategy,
    template: Box<dyn DetectStrategy>,
    neural: Box<dyn DetectStrategy>,
    current: Detections,
}

impl Detector {
    pub fn new(
        strategy: Strategy,
        template: Box<dyn DetectStrategy>,
        neural: Box<dyn DetectStrategy>,
    ) -> Detector {
        Self {
            strategy,
            template,
            neural,
            current: Detections::default(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        if strategy != self.strategy {
            info!("Detector strategy {:?} -> {:?}", self.strategy, strategy);
        }
        self.strategy = strategy;
    }

    pub fn detect(&mut self, frame: &RgbImage) {
        let backend = match self.strategy {
            Strategy::TemplateMatch => &mut self.template,
            Strategy::NeuralNet => &mut self.neural,
        };
        let items = backend.detect(frame);
        self.current = Detections::new(items, frame.width(), frame.height());
    }

    pub fn detected_item(&self, id: u8) -> Option<&Detection> {
        self.current.detected_item(id)
    }
    pub fn num_detected(&self) -> usize {
        self.current.num_detected()
    }
    /// Copy of the latest detections, taken so the caller can release the detection lock
    pub fn snapshot(&self) -> Detections {
        self.current.clone()
    }

    /// Outlines every current detection on the frame with its label above the box
    pub fn draw(&self, frame: &mut RgbImage) {
        for d in self.current.items() {
            draw_box(frame, d.xmin as i64, d.ymin as i64, d.xmax as i64, d.ymax as i64, BOX_COLOUR, 2);
            let y = (d.ymin as i64 - LABEL_HEIGHT - 2).max(0);
            draw_label(frame, &d.label, d.xmin as i64, y, BOX_COLOUR);
        }
    }
}

/// Draws an axis aligned rectangle outline, clipped to the image
pub fn draw_box(
    frame: &mut RgbImage,
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
    colour: Rgb<u8>,
    thickness: i64,
) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let mut put = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && x < w && y < h {
            frame.put_pixel(x as u32, y as u32, colour);
        }
    };
    for t in 0..thickness {
        for x in x0..=x1 {
            put(x, y0 + t);
            put(x, y1 - t);
        }
        for y in y0..=y1 {
            put(x0 + t, y);
            put(x1 - t, y);
        }
    }
}

/// An `RgbImage` seen as an embedded-graphics draw target, clipped to the image
struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = self.0.dimensions();
        for Pixel(coord, colour) in pixels {
            if coord.x < 0 || coord.y < 0 {
                continue;
            }
            let (x, y) = (coord.x as u32, coord.y as u32);
            if x < w && y < h {
                self.0.put_pixel(x, y, Rgb([colour.r(), colour.g(), colour.b()]));
            }
        }
        Ok(())
    }
}

/// Writes one line of text with its top left corner at `x`, `y`
pub fn draw_label(frame: &mut RgbImage, text: &str, x: i64, y: i64, colour: Rgb<u8>) {
    let style = MonoTextStyle::new(&FONT_6X10, Rgb888::new(colour[0], colour[1], colour[2]));
    let origin = Point::new(x as i32, y as i32);
    match Text::with_baseline(text, origin, style, Baseline::Top).draw(&mut Canvas(frame)) {
        Ok(_) => {}
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Detection>);

    impl DetectStrategy for Fixed {
        fn detect(&mut self, _frame: &RgbImage) -> Vec<Detection> {
            self.0.clone()
        }
    }

    #[test]
    fn strategy_switch_keeps_last_detections() {
        let mut detector = Detector::new(
            Strategy::TemplateMatch,
            Box::new(Fixed(vec![Detection::from_box(3, 10.0, 10.0, 20.0, 30.0)])),
            Box::new(Fixed(vec![])),
        );
        detector.detect(&RgbImage::new(64, 48));
        assert_eq!(detector.detected_item(3).map(|d| d.center), Some(Vec2::new(15.0, 20.0)));

        detector.set_strategy(Strategy::NeuralNet);
        assert_eq!(detector.num_detected(), 1);
        detector.detect(&RgbImage::new(64, 48));
        assert_eq!(detector.num_detected(), 0);
    }

    #[test]
    fn boxes_carry_their_label() {
        let mut detector = Detector::new(
            Strategy::TemplateMatch,
            Box::new(Fixed(vec![Detection::from_box(2, 20.0, 40.0, 80.0, 70.0)])),
            Box::new(Fixed(vec![])),
        );
        let mut frame = RgbImage::new(120, 90);
        detector.detect(&frame);
        detector.draw(&mut frame);

        assert_eq!(frame.get_pixel(50, 40), &BOX_COLOUR);
        let label = (20..20 + 8 * LABEL_ADVANCE as u32)
            .flat_map(|x| (28..28 + LABEL_HEIGHT as u32).map(move |y| (x, y)))
            .filter(|(x, y)| frame.get_pixel(*x, *y) == &BOX_COLOUR)
            .count();
        assert!(label > 20);
        assert_eq!(frame.get_pixel(110, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn epsilon_follows_strategy() {
        assert_eq!(Strategy::from_command(USE_TF).map(Strategy::epsilon), Some(1.2));
        assert_eq!(Strategy::from_config("opencv").epsilon(), 0.3);
    }
}
