//! Shared RGB canvas operations.

use image::RgbImage;

/// Reset a canvas to black.
pub fn clear(canvas: &mut RgbImage) {
    canvas.as_flat_samples_mut().samples.fill(0);
}

/// Copy `tile` onto `canvas` with its top-left corner at `(dx, dy)`.
///
/// Either coordinate may be negative or extend past the canvas; the copy is
/// clipped on all four sides. Rows are copied as raw byte slices.
pub fn blit(canvas: &mut RgbImage, tile: &RgbImage, dx: i64, dy: i64) {
    let (cw, ch) = canvas.dimensions();
    let (tw, th) = tile.dimensions();

    let dst_x0 = dx.max(0);
    let dst_y0 = dy.max(0);
    let dst_x1 = (dx + tw as i64).min(cw as i64);
    let dst_y1 = (dy + th as i64).min(ch as i64);
    if dst_x0 >= dst_x1 || dst_y0 >= dst_y1 {
        return;
    }

    let copy_w = (dst_x1 - dst_x0) as usize * 3;
    let src_x0 = (dst_x0 - dx) as usize * 3;
    let canvas_stride = cw as usize * 3;
    let tile_stride = tw as usize * 3;

    let canvas_buf = canvas.as_flat_samples_mut().samples;
    let tile_buf = tile.as_raw();

    for row in 0..(dst_y1 - dst_y0) as usize {
        let src_y = (dst_y0 - dy) as usize + row;
        let dst_y = dst_y0 as usize + row;
        let src_start = src_y * tile_stride + src_x0;
        let dst_start = dst_y * canvas_stride + dst_x0 as usize * 3;
        canvas_buf[dst_start..dst_start + copy_w]
            .copy_from_slice(&tile_buf[src_start..src_start + copy_w]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([value, value, value]))
    }

    #[test]
    fn test_clear() {
        let mut canvas = solid(4, 4, 200);
        clear(&mut canvas);
        assert!(canvas.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_blit_interior() {
        let mut canvas = solid(8, 8, 0);
        let tile = solid(2, 2, 9);
        blit(&mut canvas, &tile, 3, 4);

        assert_eq!(canvas.get_pixel(3, 4), &Rgb([9, 9, 9]));
        assert_eq!(canvas.get_pixel(4, 5), &Rgb([9, 9, 9]));
        assert_eq!(canvas.get_pixel(2, 4), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(5, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_blit_clips_negative_origin() {
        let mut canvas = solid(4, 4, 0);
        let tile = solid(3, 3, 7);
        blit(&mut canvas, &tile, -2, -2);

        // Only the tile's bottom-right quarter lands on the canvas.
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([7, 7, 7]));
        assert_eq!(canvas.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_blit_clips_overhang() {
        let mut canvas = solid(4, 4, 0);
        let tile = solid(3, 3, 7);
        blit(&mut canvas, &tile, 3, 3);

        assert_eq!(canvas.get_pixel(3, 3), &Rgb([7, 7, 7]));
        assert_eq!(canvas.get_pixel(2, 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_blit_fully_outside_is_noop() {
        let mut canvas = solid(4, 4, 1);
        let tile = solid(2, 2, 7);
        blit(&mut canvas, &tile, 10, 10);
        blit(&mut canvas, &tile, -5, 0);
        assert!(canvas.pixels().all(|p| p.0 == [1, 1, 1]));
    }

    #[test]
    fn test_blit_preserves_pattern() {
        let mut canvas = solid(4, 4, 0);
        let tile = RgbImage::from_fn(2, 2, |x, y| Rgb([x as u8, y as u8, 0]));
        blit(&mut canvas, &tile, 1, 1);

        assert_eq!(canvas.get_pixel(1, 1), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(2, 1), &Rgb([1, 0, 0]));
        assert_eq!(canvas.get_pixel(1, 2), &Rgb([0, 1, 0]));
    }
}
