use std::borrow::Cow;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{class_mapping::ClassMapping, mask::SegmentationMask, schema::ClassStatistic};

pub const OVERLAY_ALPHA: f32 = 0.5;

const MARGIN: u32 = 20;
const TEXT_HEIGHT: u32 = 200;
const TOP_CLASSES: usize = 5;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Tried in order when no font path is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Per-pixel color lookup at the mask's resolution.
pub fn colorize(mask: &SegmentationMask, mapping: &ClassMapping) -> RgbImage {
    let classes = mask.view();
    RgbImage::from_fn(mask.width() as u32, mask.height() as u32, |x, y| {
        Rgb(mapping.color(usize::from(classes[[y as usize, x as usize]])))
    })
}

/// Nearest-neighbor resize so class boundaries stay hard.
pub fn resize_nearest(colored: &RgbImage, width: u32, height: u32) -> RgbImage {
    if colored.dimensions() == (width, height) {
        return colored.clone();
    }
    imageops::resize(colored, width, height, FilterType::Nearest)
}

/// `(1 - alpha) * original + alpha * mask`, with the mask scaled to the original first.
pub fn overlay(original: &RgbImage, colored: &RgbImage, alpha: f32) -> RgbImage {
    let (width, height) = original.dimensions();
    let colored = if colored.dimensions() == (width, height) {
        Cow::Borrowed(colored)
    } else {
        Cow::Owned(imageops::resize(colored, width, height, FilterType::Nearest))
    };

    let mut blended = RgbImage::new(width, height);
    blended
        .par_chunks_mut(3)
        .zip(original.par_chunks(3))
        .zip(colored.par_chunks(3))
        .for_each(|((out, base), tint)| {
            for channel in 0..3 {
                out[channel] = blend(base[channel], tint[channel], alpha);
            }
        });
    blended
}

fn blend(base: u8, tint: u8, alpha: f32) -> u8 {
    ((1.0 - alpha) * f32::from(base) + alpha * f32::from(tint)).clamp(0.0, 255.0) as u8
}

pub struct Visualizer {
    font: Option<FontArc>,
    title_scale: PxScale,
    text_scale: PxScale,
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Visualizer {
    /// Loads `font_path` if given, otherwise the first readable system font.
    ///
    /// Without any usable font the composite is still rendered, only without captions.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path
            .and_then(|path| {
                let font = load_font(path);
                if font.is_none() {
                    warn!(path = %path.display(), "configured font unusable, trying system fonts");
                }
                font
            })
            .or_else(|| {
                FONT_CANDIDATES
                    .iter()
                    .find_map(|candidate| load_font(Path::new(candidate)))
            });
        if font.is_none() {
            warn!("no renderable font found, side-by-side text will be skipped");
        }
        Self::with_font(font)
    }

    pub fn with_font(font: Option<FontArc>) -> Self {
        Self {
            font,
            title_scale: PxScale::from(24.0),
            text_scale: PxScale::from(16.0),
        }
    }

    pub const fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Original on the left, mask on the right, top class shares underneath.
    pub fn composite(
        &self,
        original: &RgbImage,
        mask_image: &RgbImage,
        stats: &[ClassStatistic],
    ) -> RgbImage {
        let (width, height) = original.dimensions();
        let mut canvas = RgbImage::from_pixel(
            width * 2 + MARGIN * 3,
            height + MARGIN * 2 + TEXT_HEIGHT,
            WHITE,
        );

        let mask_image = resize_nearest(mask_image, width, height);
        imageops::overlay(&mut canvas, original, i64::from(MARGIN), i64::from(MARGIN));
        imageops::overlay(
            &mut canvas,
            &mask_image,
            i64::from(width + MARGIN * 2),
            i64::from(MARGIN),
        );

        let Some(font) = &self.font else {
            return canvas;
        };

        let caption_y = (height + MARGIN + 10) as i32;
        draw_text_mut(&mut canvas, BLACK, MARGIN as i32, caption_y, self.title_scale, font, "Original");
        draw_text_mut(
            &mut canvas,
            BLACK,
            (width + MARGIN * 2) as i32,
            caption_y,
            self.title_scale,
            font,
            "Prediction",
        );

        let mut y = (height + MARGIN + 50) as i32;
        draw_text_mut(&mut canvas, BLACK, MARGIN as i32, y, self.text_scale, font, "Class distribution:");
        y += 25;
        for stat in stats.iter().take(TOP_CLASSES) {
            draw_text_mut(
                &mut canvas,
                BLACK,
                MARGIN as i32,
                y,
                self.text_scale,
                font,
                &format_stat_line(stat),
            );
            y += 20;
        }
        canvas
    }
}

pub fn format_stat_line(stat: &ClassStatistic) -> String {
    format!("{}: {:.1}%", stat.class_name, stat.percentage)
}

fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = std::fs::read(path).ok()?;
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            debug!(path = %path.display(), "loaded font");
            Some(font)
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "not a usable font");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn striped_mask() -> SegmentationMask {
        SegmentationMask::new(Array2::from_shape_fn((4, 6), |(y, x)| ((x + y) % 8) as u8))
    }

    #[test]
    fn test_colorize_matches_mapping() {
        let mapping = ClassMapping::cityscapes();
        let mask = striped_mask();
        let colored = colorize(&mask, &mapping);
        assert_eq!(colored.dimensions(), (6, 4));
        for (x, y, pixel) in colored.enumerate_pixels() {
            let class_id = mask.get(y as usize, x as usize).unwrap();
            assert_eq!(pixel.0, mapping.color(usize::from(class_id)));
        }
    }

    #[test]
    fn test_colorize_is_idempotent() {
        let mapping = ClassMapping::cityscapes();
        let mask = striped_mask();
        assert_eq!(colorize(&mask, &mapping).as_raw(), colorize(&mask, &mapping).as_raw());
    }

    #[test]
    fn test_overlay_blends_half_and_half() {
        let original = RgbImage::from_pixel(4, 4, Rgb([200, 100, 0]));
        let colored = RgbImage::from_pixel(4, 4, Rgb([0, 100, 255]));
        let blended = overlay(&original, &colored, OVERLAY_ALPHA);
        assert_eq!(blended.get_pixel(2, 3).0, [100, 100, 127]);
    }

    #[test]
    fn test_overlay_resizes_mask_with_nearest() {
        let original = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        // left column red, right column blue
        let colored = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let blended = overlay(&original, &colored, 1.0);
        assert_eq!(blended.dimensions(), (8, 8));
        assert_eq!(blended.get_pixel(0, 7).0, [255, 0, 0]);
        assert_eq!(blended.get_pixel(7, 0).0, [0, 0, 255]);
        // no smoothed colors at the boundary
        assert!(blended
            .pixels()
            .all(|p| p.0 == [255, 0, 0] || p.0 == [0, 0, 255]));
    }

    #[test]
    fn test_composite_layout_without_font() {
        let visualizer = Visualizer::with_font(None);
        let original = RgbImage::from_pixel(30, 10, Rgb([1, 2, 3]));
        let mask_image = RgbImage::from_pixel(5, 5, Rgb([9, 9, 9]));
        let canvas = visualizer.composite(&original, &mask_image, &[]);
        assert_eq!(canvas.dimensions(), (30 * 2 + 60, 10 + 40 + 200));
        assert_eq!(canvas.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(canvas.get_pixel(MARGIN, MARGIN).0, [1, 2, 3]);
        assert_eq!(canvas.get_pixel(30 + MARGIN * 2, MARGIN).0, [9, 9, 9]);
        assert_eq!(canvas.get_pixel(30 * 2 + MARGIN * 2 - 1, MARGIN + 9).0, [9, 9, 9]);
    }

    fn available_font() -> Option<FontArc> {
        std::env::var_os("FONT_PATH")
            .and_then(|path| load_font(Path::new(&path)))
            .or_else(|| {
                FONT_CANDIDATES
                    .iter()
                    .find_map(|candidate| load_font(Path::new(candidate)))
            })
    }

    #[test]
    fn test_composite_draws_text_block() {
        let Some(font) = available_font() else {
            eprintln!("no system font available, skipping text rendering check");
            return;
        };
        let visualizer = Visualizer::with_font(Some(font));
        assert!(visualizer.has_font());

        let original = RgbImage::from_pixel(120, 40, Rgb([1, 2, 3]));
        let stats = [ClassStatistic {
            class_id: 6,
            class_name: "sky".to_string(),
            pixel_count: 4800,
            percentage: 100.0,
        }];
        let canvas = visualizer.composite(&original, &original, &stats);

        let is_inked = |mut y_range: std::ops::Range<u32>| {
            y_range.any(|y| (0..canvas.width()).any(|x| canvas.get_pixel(x, y).0 != [255; 3]))
        };
        let text_top = 40 + MARGIN;
        // captions
        assert!(is_inked(text_top..text_top + 40));
        // heading and class lines
        assert!(is_inked(text_top + 50..canvas.height()));
    }

    #[test]
    fn test_stat_line_format() {
        let stat = ClassStatistic {
            class_id: 6,
            class_name: "sky".to_string(),
            pixel_count: 1234,
            percentage: 42.06,
        };
        assert_eq!(format_stat_line(&stat), "sky: 42.1%");
    }
}
