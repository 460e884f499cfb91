//! Overlap resolution within one frame.
//!
//! Duplicate or heavily occluded annotations are detected with the
//! intersection-over-foreground (IoF) ratio: the intersection of box `i` with
//! box `j` divided by the area of box `i` alone. Unlike IoU it is asymmetric,
//! so a small box swallowed by a large one scores 1.0 while the large box
//! scores only the small box's share of it.

use nalgebra::DMatrix;

use crate::config::OverlapConfig;
use crate::geometry::BBox;

/// Compute the IoF matrix between two sets of boxes.
///
/// # Arguments
/// * `boxes_a` - Foreground boxes, shape (n, 4), format [x1, y1, x2, y2]
/// * `boxes_b` - Other boxes, shape (m, 4), format [x1, y1, x2, y2]
///
/// # Returns
/// Matrix of shape (n, m) where entry (i, j) is `inter(a_i, b_j) / area(a_i)`.
/// Rows of zero-area boxes are zero.
pub fn iof_matrix(boxes_a: &DMatrix<f64>, boxes_b: &DMatrix<f64>) -> DMatrix<f64> {
    let n = boxes_a.nrows();
    let m = boxes_b.nrows();

    if n == 0 || m == 0 {
        return DMatrix::zeros(n, m);
    }

    let mut result = DMatrix::zeros(n, m);

    for i in 0..n {
        let a_x1 = boxes_a[(i, 0)];
        let a_y1 = boxes_a[(i, 1)];
        let a_x2 = boxes_a[(i, 2)];
        let a_y2 = boxes_a[(i, 3)];
        let a_area = (a_x2 - a_x1) * (a_y2 - a_y1);
        if a_area <= 0.0 {
            continue;
        }

        for j in 0..m {
            let inter_w = (a_x2.min(boxes_b[(j, 2)]) - a_x1.max(boxes_b[(j, 0)])).max(0.0);
            let inter_h = (a_y2.min(boxes_b[(j, 3)]) - a_y1.max(boxes_b[(j, 1)])).max(0.0);
            result[(i, j)] = inter_w * inter_h / a_area;
        }
    }

    result
}

/// Stack boxes into an (n, 4) matrix.
pub fn boxes_to_matrix(boxes: &[BBox]) -> DMatrix<f64> {
    let flat: Vec<f64> = boxes.iter().flat_map(|b| b.to_bounds()).collect();
    DMatrix::from_row_slice(boxes.len(), 4, &flat)
}

/// For every box, the maximum IoF against all *other* boxes of the frame.
///
/// An empty frame yields an empty vector and a single box yields `[0.0]`.
pub fn max_iof(boxes: &[BBox]) -> Vec<f64> {
    let matrix = boxes_to_matrix(boxes);
    let mut iof = iof_matrix(&matrix, &matrix);
    iof.fill_diagonal(0.0);

    (0..boxes.len())
        .map(|i| iof.row(i).iter().copied().fold(0.0, f64::max))
        .collect()
}

/// Why a box was kept out of crop extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Zero width or height.
    Degenerate,
    /// Width or height below the configured minimum.
    TooSmall { width: i64, height: i64 },
    /// Max IoF above the configured threshold.
    Overlap(f64),
}

/// Outcome of resolving one frame. Indices refer to the input slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameVerdict {
    pub accepted: Vec<usize>,
    pub rejected: Vec<(usize, Rejection)>,
    /// Max IoF per input box, `None` for degenerate boxes.
    pub max_iof: Vec<Option<f64>>,
}

impl FrameVerdict {
    pub fn len(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_accepted(&self, index: usize) -> bool {
        self.accepted.contains(&index)
    }
}

/// Accepts or rejects the boxes of a frame by overlap and size.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapResolver {
    pub max_iof: f64,
    pub min_size: i64,
}

impl OverlapResolver {
    pub fn new(config: &OverlapConfig) -> Self {
        Self {
            max_iof: config.max_iof,
            min_size: config.min_size,
        }
    }

    /// Classify every box of one frame.
    ///
    /// Degenerate boxes are rejected first and do not take part in the IoF
    /// computation. Every input index ends up in exactly one of
    /// `accepted` / `rejected`.
    pub fn resolve(&self, boxes: &[BBox]) -> FrameVerdict {
        let mut verdict = FrameVerdict {
            max_iof: vec![None; boxes.len()],
            ..Default::default()
        };

        let valid: Vec<usize> = (0..boxes.len())
            .filter(|&i| !boxes[i].is_degenerate())
            .collect();
        let valid_boxes: Vec<BBox> = valid.iter().map(|&i| boxes[i]).collect();
        let scores = max_iof(&valid_boxes);
        for (&i, &score) in valid.iter().zip(&scores) {
            verdict.max_iof[i] = Some(score);
        }

        for (i, bbox) in boxes.iter().enumerate() {
            let rejection = match verdict.max_iof[i] {
                None => Some(Rejection::Degenerate),
                Some(score) if score > self.max_iof => Some(Rejection::Overlap(score)),
                Some(_) if bbox.width() < self.min_size || bbox.height() < self.min_size => {
                    Some(Rejection::TooSmall {
                        width: bbox.width(),
                        height: bbox.height(),
                    })
                }
                Some(_) => None,
            };
            match rejection {
                Some(reason) => verdict.rejected.push((i, reason)),
                None => verdict.accepted.push(i),
            }
        }

        verdict
    }
}

impl Default for OverlapResolver {
    fn default() -> Self {
        Self::new(&OverlapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bbox(x1: i64, y1: i64, x2: i64, y2: i64) -> BBox {
        BBox::from_corners((x1, y1), (x2, y2))
    }

    #[test]
    fn test_iof_matrix_is_asymmetric() {
        let boxes = boxes_to_matrix(&[bbox(0, 0, 100, 100), bbox(10, 10, 40, 40)]);
        let iof = iof_matrix(&boxes, &boxes);
        assert_relative_eq!(iof[(0, 1)], 0.09, epsilon = 1e-12);
        assert_relative_eq!(iof[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(iof[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_iof_matrix_empty() {
        let empty = DMatrix::<f64>::zeros(0, 4);
        let one = boxes_to_matrix(&[bbox(0, 0, 10, 10)]);
        assert_eq!(iof_matrix(&empty, &one).shape(), (0, 1));
        assert_eq!(iof_matrix(&one, &empty).shape(), (1, 0));
    }

    #[test]
    fn test_max_iof_edge_cases() {
        assert!(max_iof(&[]).is_empty());
        assert_eq!(max_iof(&[bbox(0, 0, 10, 10)]), vec![0.0]);
    }

    #[test]
    fn test_max_iof_takes_maximum_over_others() {
        let scores = max_iof(&[
            bbox(0, 0, 10, 10),
            bbox(5, 0, 15, 10),  // half of box 0
            bbox(0, 0, 20, 10),  // contains both
        ]);
        assert_relative_eq!(scores[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(scores[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(scores[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_contained_box_rejected() {
        let resolver = OverlapResolver::default();
        let verdict = resolver.resolve(&[bbox(0, 0, 100, 100), bbox(10, 10, 40, 40)]);

        assert_eq!(verdict.accepted, vec![0]);
        assert_eq!(verdict.rejected.len(), 1);
        assert_eq!(verdict.rejected[0].0, 1);
        assert!(matches!(verdict.rejected[0].1, Rejection::Overlap(s) if (s - 1.0).abs() < 1e-12));
        assert_relative_eq!(verdict.max_iof[0].unwrap(), 0.09, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_and_small_boxes() {
        let resolver = OverlapResolver::default();
        let verdict = resolver.resolve(&[
            bbox(0, 0, 0, 50),
            bbox(100, 100, 101, 150),
            bbox(200, 200, 260, 300),
        ]);

        assert_eq!(verdict.accepted, vec![2]);
        assert_eq!(verdict.max_iof[0], None);
        assert!(verdict.rejected.contains(&(0, Rejection::Degenerate)));
        assert!(verdict
            .rejected
            .contains(&(1, Rejection::TooSmall { width: 1, height: 50 })));
    }

    #[test]
    fn test_degenerate_box_does_not_affect_others() {
        // A zero-width line across the big box must not count as overlap.
        let resolver = OverlapResolver::default();
        let verdict = resolver.resolve(&[bbox(0, 0, 100, 100), bbox(50, 0, 50, 100)]);
        assert_eq!(verdict.accepted, vec![0]);
        assert_relative_eq!(verdict.max_iof[0].unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_every_box_classified_once() {
        let resolver = OverlapResolver::default();
        let boxes = vec![
            bbox(0, 0, 100, 100),
            bbox(10, 10, 40, 40),
            bbox(90, 90, 200, 200),
            bbox(5, 5, 5, 5),
            bbox(300, 300, 301, 301),
            bbox(0, 0, 100, 100),
        ];
        let verdict = resolver.resolve(&boxes);
        assert_eq!(verdict.len(), boxes.len());

        let mut seen: Vec<usize> = verdict
            .accepted
            .iter()
            .copied()
            .chain(verdict.rejected.iter().map(|(i, _)| *i))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..boxes.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let resolver = OverlapResolver {
            max_iof: 0.5,
            min_size: 2,
        };
        // Box 1 has exactly half of its area inside box 0.
        let verdict = resolver.resolve(&[bbox(0, 0, 100, 100), bbox(50, 0, 150, 100)]);
        assert_eq!(verdict.accepted, vec![0, 1]);
    }
}
