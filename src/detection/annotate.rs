//! Box and text drawing on RGB frames. Text is rendered with an embedded
//! DejaVu Sans face.

use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::warn;
use std::sync::OnceLock;

use super::DetectedObject;

static FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

const LABEL_PX: f32 = 14.0;
const LINE_GAP: u32 = 4;
const PADDING: u32 = 3;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([0, 255, 0]),
    Rgb([255, 56, 56]),
    Rgb([255, 178, 29]),
    Rgb([72, 249, 10]),
    Rgb([0, 194, 255]),
    Rgb([255, 55, 199]),
];

fn font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Embedded font is unreadable, text overlay disabled: {}", e);
            None
        }
    })
    .as_ref()
}

/// Stable color for a class id
pub fn class_color(class_id: i32) -> Rgb<u8> {
    PALETTE[class_id.rem_euclid(PALETTE.len() as i32) as usize]
}

/// Draw a box and a `class (confidence%)` label for every object
pub fn draw_detections(image: &mut RgbImage, objects: &[DetectedObject]) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    for object in objects {
        let color = class_color(object.class_id);
        let left = object.bbox.x1.clamp(0.0, (width - 1) as f32).round() as i32;
        let top = object.bbox.y1.clamp(0.0, (height - 1) as f32).round() as i32;
        let right = object.bbox.x2.clamp(0.0, (width - 1) as f32).round() as i32;
        let bottom = object.bbox.y2.clamp(0.0, (height - 1) as f32).round() as i32;
        if right <= left || bottom <= top {
            continue;
        }

        // 2px outline
        for inset in 0..2 {
            let w = (right - left - 2 * inset).max(1) as u32;
            let h = (bottom - top - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(
                image,
                Rect::at(left + inset, top + inset).of_size(w, h),
                color,
            );
        }

        let Some(font) = font() else {
            continue;
        };
        let label = object.label();
        let (label_width, _) = text_size(LABEL_PX, font, &label);
        let label_height = line_height(font, LABEL_PX) + 2 * PADDING as i32;
        let label_y = if top >= label_height {
            top - label_height
        } else {
            top
        };
        draw_filled_rect_mut(
            image,
            Rect::at(left, label_y).of_size(label_width + 2 * PADDING, label_height as u32),
            color,
        );
        draw_text_mut(
            image,
            BLACK,
            left + PADDING as i32,
            label_y + PADDING as i32,
            LABEL_PX,
            font,
            &label,
        );
    }
}

/// Draw lines of text, `px` pixels high, over a black box anchored at `(x, y)`
pub fn draw_text_block(image: &mut RgbImage, x: i32, y: i32, lines: &[String], px: f32, color: Rgb<u8>) {
    if lines.is_empty() {
        return;
    }
    let Some(font) = font() else {
        return;
    };
    let line_height = line_height(font, px) as u32;
    let block_width = lines
        .iter()
        .map(|line| text_width(line, px))
        .max()
        .unwrap_or(0)
        + 2 * PADDING;
    let block_height = (line_height + LINE_GAP) * lines.len() as u32 + 2 * PADDING - LINE_GAP;

    draw_filled_rect_mut(image, Rect::at(x, y).of_size(block_width, block_height), BLACK);

    for (index, line) in lines.iter().enumerate() {
        draw_text_mut(
            image,
            color,
            x + PADDING as i32,
            y + (PADDING + index as u32 * (line_height + LINE_GAP)) as i32,
            px,
            font,
            line,
        );
    }
}

/// Pixel width of `text` rendered `px` pixels high
pub fn text_width(text: &str, px: f32) -> u32 {
    font().map_or(0, |font| text_size(px, font, text).0)
}

fn line_height(font: &FontRef<'_>, px: f32) -> i32 {
    font.as_scaled(PxScale::from(px)).height().ceil() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    #[test]
    fn text_width_grows_with_text_and_size() {
        assert_eq!(text_width("", 14.0), 0);
        let short = text_width("AB", 14.0);
        assert!(short > 0);
        assert!(text_width("ABAB", 14.0) > short);
        assert!(text_width("AB", 28.0) > short);
    }

    #[test]
    fn case_and_accents_are_kept() {
        let font = font().expect("embedded font");
        assert_ne!(font.glyph_id('a'), font.glyph_id('A'));
        for ch in ['ç', 'ã', 'é', 'õ'] {
            assert_ne!(font.glyph_id(ch).0, 0, "missing glyph for {}", ch);
        }
    }

    #[test]
    fn accented_location_is_drawn() {
        let mut image = RgbImage::from_pixel(240, 40, Rgb([200, 200, 200]));
        draw_text_block(&mut image, 0, 0, &["Estação São João".to_string()], 14.0, WHITE);
        assert!(image.pixels().any(|p| *p == WHITE));
    }

    #[test]
    fn text_block_paints_background_and_glyphs() {
        let mut image = RgbImage::from_pixel(240, 60, Rgb([200, 200, 200]));
        draw_text_block(&mut image, 0, 0, &["Location: Dock".to_string()], 14.0, WHITE);
        assert_eq!(*image.get_pixel(0, 0), BLACK);
        assert!(image.pixels().any(|p| *p == WHITE));
        // Outside the block the frame is untouched
        assert_eq!(*image.get_pixel(239, 59), Rgb([200, 200, 200]));
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let mut image = RgbImage::new(50, 50);
        let object = DetectedObject {
            class_id: 0,
            class_name: "person".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::from([-10.0, 20.0, 80.0, 49.0]),
        };
        draw_detections(&mut image, &[object]);
        assert_eq!(*image.get_pixel(0, 30), class_color(0));
    }
}
