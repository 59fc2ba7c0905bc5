use opencv::core::{Point2f, Rect, Vector};
use opencv::imgproc;

/// Polygons with more than this many vertices are replaced by their hull.
const MAX_SIMPLE_VERTICES: usize = 4;

/// Reduces an imprecise outline to a simple polygon. Outlines with four or
/// fewer vertices are returned as-is.
pub fn normalize_polygon(points: Vec<Point2f>) -> opencv::Result<Vec<Point2f>> {
    if points.len() <= MAX_SIMPLE_VERTICES {
        return Ok(points);
    }

    let input: Vector<Point2f> = points.into_iter().collect();
    let mut hull = Vector::<Point2f>::new();
    imgproc::convex_hull(&input, &mut hull, false, true)?;
    Ok(hull.to_vec())
}

pub fn bounding_box(points: &[Point2f]) -> opencv::Result<Rect> {
    if points.is_empty() {
        return Ok(Rect::default());
    }
    let input: Vector<Point2f> = points.iter().copied().collect();
    imgproc::bounding_rect(&input)
}
