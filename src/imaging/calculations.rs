//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = ((h as f64 * src_aspect).round() as u32).max(tgt_w);
        (w, h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = ((w as f64 / src_aspect).round() as u32).max(tgt_h);
        (w, h)
    }
}

/// Calculate dimensions that fit inside a bounding box without upscaling.
///
/// Sources already inside the box keep their size. Otherwise the limiting
/// edge matches the box and the other edge scales proportionally (at least 1px).
pub fn calculate_fit_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;

    if src_w <= max_w && src_h <= max_h {
        return source;
    }

    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// Top-left offset of a centred `crop` window inside `filled`.
pub fn calculate_center_crop(filled: (u32, u32), crop: (u32, u32)) -> (u32, u32) {
    let x = filled.0.saturating_sub(crop.0) / 2;
    let y = filled.1.saturating_sub(crop.1) / 2;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // calculate_fill_dimensions tests
    // =========================================================================

    #[test]
    fn fill_wider_source_to_portrait_target() {
        // 800x600 (4:3) → 400x500 target
        // Source is wider, so height matches: 500, width = 500 * (4/3) = 667
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 500)), (667, 500));
    }

    #[test]
    fn fill_taller_source_to_landscape_target() {
        assert_eq!(calculate_fill_dimensions((600, 800), (500, 400)), (500, 667));
    }

    #[test]
    fn fill_same_aspect_ratio() {
        assert_eq!(calculate_fill_dimensions((800, 600), (400, 300)), (400, 300));
    }

    #[test]
    fn fill_square_thumb_from_landscape() {
        // 3000x2000 → 200x200: height matches, width = 300
        assert_eq!(calculate_fill_dimensions((3000, 2000), (200, 200)), (300, 200));
    }

    #[test]
    fn fill_upscales_small_sources() {
        assert_eq!(calculate_fill_dimensions((100, 50), (200, 200)), (400, 200));
    }

    // =========================================================================
    // calculate_fit_dimensions tests
    // =========================================================================

    #[test]
    fn fit_landscape_into_square_box() {
        assert_eq!(calculate_fit_dimensions((4000, 3000), (1200, 1200)), (1200, 900));
    }

    #[test]
    fn fit_portrait_into_square_box() {
        assert_eq!(calculate_fit_dimensions((3000, 4000), (1200, 1200)), (900, 1200));
    }

    #[test]
    fn fit_never_upscales() {
        assert_eq!(calculate_fit_dimensions((800, 600), (1200, 1200)), (800, 600));
    }

    #[test]
    fn fit_extreme_panorama_keeps_one_pixel() {
        assert_eq!(calculate_fit_dimensions((10000, 10), (100, 100)), (100, 1));
    }

    // =========================================================================
    // calculate_center_crop tests
    // =========================================================================

    #[test]
    fn center_crop_offsets() {
        assert_eq!(calculate_center_crop((300, 200), (200, 200)), (50, 0));
        assert_eq!(calculate_center_crop((200, 301), (200, 200)), (0, 50));
        assert_eq!(calculate_center_crop((200, 200), (200, 200)), (0, 0));
    }
}
