//! Pure arithmetic for the capture screen: compositional grid-line placement
//! and fitting the sensor aspect ratio into an arbitrary viewport. UI layers
//! draw these; nothing here touches pixels.

use serde::{Deserialize, Serialize};

/// Compositional guide overlaid on the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridKind {
    #[default]
    None,
    Thirds,
    Golden,
}

/// Normalized positions (fractions of the edge length) of the guide lines,
/// identical for the vertical and horizontal axes. Sorted ascending.
pub fn grid_lines(kind: GridKind) -> Vec<f32> {
    match kind {
        GridKind::None => Vec::new(),
        GridKind::Thirds => vec![1.0 / 3.0, 2.0 / 3.0],
        GridKind::Golden => {
            let phi = (1.0 + 5.0_f32.sqrt()) / 2.0;
            let near = 1.0 - 1.0 / phi;
            vec![near, 1.0 / phi]
        }
    }
}

/// Placement of the preview within a viewport, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Letterboxes a preview of the given aspect ratio (width / height, e.g.
/// 16:9) into the viewport, centered on both axes.
pub fn fit_preview(viewport_width: f32, viewport_height: f32, aspect: f32) -> PreviewRect {
    let viewport_aspect = viewport_width / viewport_height;
    let (width, height) = if viewport_aspect > aspect {
        (viewport_height * aspect, viewport_height)
    } else {
        (viewport_width, viewport_width / aspect)
    };
    PreviewRect {
        x: (viewport_width - width) / 2.0,
        y: (viewport_height - height) / 2.0,
        width,
        height,
    }
}
