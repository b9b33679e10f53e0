// Road boundary detection: morphology, contour selection, ellipse fit,
// safe-zone trust scoring. Stateless per call; one instance is shared by
// cloning into every processing task.

use anyhow::Result;
use opencv::core::{self, Mat, Point, Rect, Scalar, Vector};
use opencv::imgproc;
use opencv::prelude::*;

use crate::pipeline::types::Ellipse;

/// Expected on-track region for the fitted ellipse center, in the same
/// pixel space as the contour.
pub struct SafeZone {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

pub const SAFE_ZONE: SafeZone = SafeZone {
    min_x: 48,
    max_x: 115,
    min_y: 69,
    max_y: 119,
};

/// Extracts the dominant road contour from grayscale frames and fits an
/// ellipse to it.
#[derive(Debug, Clone)]
pub struct RoadDetector {
    kernel_size: i32,
    morpho_iterations: i32,
    approx_epsilon_factor: f64,
}

impl Default for RoadDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadDetector {
    pub fn new() -> Self {
        Self {
            kernel_size: 4,
            morpho_iterations: 3,
            approx_epsilon_factor: 0.01,
        }
    }

    /// Detects the road contour below `horizon` in a grayscale frame.
    ///
    /// Returns an empty contour when no candidate region is visible below
    /// the horizon; that is a normal output under poor lighting, not an
    /// error.
    pub fn detect_road_contour(&self, gray: &Mat, horizon: i32) -> Result<Vector<Point>> {
        let kernel = Mat::ones(self.kernel_size, self.kernel_size, core::CV_8U)?.to_mat()?;
        let anchor = Point::new(-1, -1);
        let border = imgproc::morphology_default_border_value()?;

        // Closing with one extra dilate pass: fills dark speckles in the
        // illuminated road surface and bridges small gaps before the
        // threshold turns it into a mask.
        let mut work = Mat::default();
        imgproc::dilate(
            gray,
            &mut work,
            &kernel,
            anchor,
            self.morpho_iterations,
            core::BORDER_CONSTANT,
            border,
        )?;
        let mut eroded = Mat::default();
        imgproc::erode(
            &work,
            &mut eroded,
            &kernel,
            anchor,
            self.morpho_iterations,
            core::BORDER_CONSTANT,
            border,
        )?;
        imgproc::dilate(
            &eroded,
            &mut work,
            &kernel,
            anchor,
            1,
            core::BORDER_CONSTANT,
            border,
        )?;

        // Bright road surface becomes mask foreground.
        let mut mask = Mat::default();
        imgproc::threshold(&work, &mut mask, 180.0, 255.0, imgproc::THRESH_BINARY_INV)?;

        // Everything above the horizon is far field, irrelevant to near-term
        // track following.
        imgproc::rectangle(
            &mut mask,
            Rect::new(0, 0, gray.cols(), horizon),
            Scalar::all(0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        self.dominant_contour(&mask)
    }

    /// Picks the contour with the greatest perimeter and simplifies it.
    fn dominant_contour(&self, mask: &Mat) -> Result<Vector<Point>> {
        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(
            mask,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::default(),
        )?;

        if contours.is_empty() {
            return Ok(Vector::new());
        }

        // Strict greater-than: on an exact perimeter tie the first contour
        // seen in discovery order keeps the win.
        let mut best_idx = 0;
        let mut best_perimeter = 0.0;
        for (idx, contour) in contours.iter().enumerate() {
            let perimeter = imgproc::arc_length(&contour, true)?;
            if perimeter > best_perimeter {
                best_perimeter = perimeter;
                best_idx = idx;
            }
        }

        let winner = contours.get(best_idx)?;
        let epsilon = self.approx_epsilon_factor * best_perimeter;
        let mut approx: Vector<Point> = Vector::new();
        imgproc::approx_poly_dp(&winner, &mut approx, epsilon, true)?;
        Ok(approx)
    }

    /// Fits an ellipse to the contour. Fewer than 5 points cannot constrain
    /// a fit; the not-found ellipse is returned instead.
    pub fn compute_ellipse(&self, contour: &Vector<Point>) -> Result<Ellipse> {
        if contour.len() < 5 {
            return Ok(Ellipse::not_found());
        }

        let rect = imgproc::fit_ellipse(contour)?;
        let center = Point::new(rect.center.x as i32, rect.center.y as i32);

        Ok(Ellipse {
            center,
            width: rect.size.width as i32,
            height: rect.size.height as i32,
            angle: rect.angle,
            confidence: trust_from_center(center),
        })
    }
}

/// Trust in the fitted center: exactly 1.0 inside the safe zone, decaying
/// with distance outside it, never above 0.9 off-zone.
pub fn trust_from_center(center: Point) -> f32 {
    let x_inside = SAFE_ZONE.min_x <= center.x && center.x <= SAFE_ZONE.max_x;
    let y_inside = SAFE_ZONE.min_y <= center.y && center.y <= SAFE_ZONE.max_y;

    if x_inside && y_inside {
        return 1.0;
    }
    if x_inside {
        return trust_on_axis(SAFE_ZONE.max_y, SAFE_ZONE.min_y, center.y);
    }
    if y_inside {
        return trust_on_axis(SAFE_ZONE.max_x, SAFE_ZONE.min_x, center.x);
    }
    trust_on_axis(SAFE_ZONE.max_y, SAFE_ZONE.min_y, center.y)
        * trust_on_axis(SAFE_ZONE.max_x, SAFE_ZONE.min_x, center.x)
}

fn trust_on_axis(safe_max: i32, safe_min: i32, value: i32) -> f32 {
    let mut trust = 1.0_f64;
    if value > safe_max {
        trust = 1.0 / f64::from(value - safe_max);
    } else if value < safe_min {
        trust = 1.0 / f64::from(safe_min - value);
    }
    trust *= 10.0;
    trust.clamp(0.0, 0.9) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: i32 = 160;
    const HEIGHT: i32 = 128;
    const HORIZON: i32 = 20;

    fn gray_canvas(value: f64) -> Mat {
        Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC1, Scalar::all(value)).unwrap()
    }

    fn fill(img: &mut Mat, rect: Rect, value: f64) {
        imgproc::rectangle(
            img,
            rect,
            Scalar::all(value),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
    }

    fn contour_of(points: &[(i32, i32)]) -> Vector<Point> {
        points.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn bright_frame_yields_no_contour() {
        let detector = RoadDetector::new();
        let gray = gray_canvas(255.0);

        let contour = detector.detect_road_contour(&gray, HORIZON).unwrap();
        assert!(contour.is_empty());

        let ellipse = detector.compute_ellipse(&contour).unwrap();
        assert_eq!(ellipse, Ellipse::not_found());
    }

    #[test]
    fn dark_frame_traces_the_region_below_the_horizon() {
        let detector = RoadDetector::new();
        let gray = gray_canvas(0.0);

        let contour = detector.detect_road_contour(&gray, HORIZON).unwrap();
        let points = contour.to_vec();

        assert_eq!(points.len(), 4);
        for corner in [
            Point::new(0, HORIZON),
            Point::new(0, HEIGHT - 1),
            Point::new(WIDTH - 1, HEIGHT - 1),
            Point::new(WIDTH - 1, HORIZON),
        ] {
            assert!(points.contains(&corner), "missing corner {corner:?}");
        }
        assert!(points.iter().all(|p| p.y >= HORIZON));
    }

    #[test]
    fn largest_region_wins() {
        let detector = RoadDetector::new();
        let mut gray = gray_canvas(255.0);
        // Big dark region on the left, small one on the right.
        fill(&mut gray, Rect::new(10, 30, 70, 70), 0.0);
        fill(&mut gray, Rect::new(120, 90, 20, 20), 0.0);

        let contour = detector.detect_road_contour(&gray, HORIZON).unwrap();
        assert!(!contour.is_empty());
        assert!(
            contour.iter().all(|p| p.x < 100),
            "contour strayed into the smaller region: {:?}",
            contour.to_vec()
        );
    }

    #[test]
    fn first_contour_wins_perimeter_ties() {
        let detector = RoadDetector::new();
        let mut gray = gray_canvas(255.0);
        // Two identical regions; discovery order scans left to right, so the
        // left one must be kept.
        fill(&mut gray, Rect::new(10, 40, 30, 30), 0.0);
        fill(&mut gray, Rect::new(100, 40, 30, 30), 0.0);

        let contour = detector.detect_road_contour(&gray, HORIZON).unwrap();
        assert!(!contour.is_empty());
        assert!(
            contour.iter().all(|p| p.x < 90),
            "tie broke toward the later contour: {:?}",
            contour.to_vec()
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let detector = RoadDetector::new();
        let mut gray = gray_canvas(200.0);
        fill(&mut gray, Rect::new(0, 60, 120, 68), 40.0);
        fill(&mut gray, Rect::new(90, 25, 40, 30), 130.0);
        fill(&mut gray, Rect::new(30, 90, 10, 10), 250.0);

        let first = detector.detect_road_contour(&gray, HORIZON).unwrap();
        let second = detector.detect_road_contour(&gray, HORIZON).unwrap();
        assert_eq!(first.to_vec(), second.to_vec());
    }

    #[test]
    fn short_contours_have_no_ellipse() {
        let detector = RoadDetector::new();
        for n in 0..5 {
            let contour: Vector<Point> =
                (0..n).map(|i| Point::new(i * 7, i * 11 + 21)).collect();
            let ellipse = detector.compute_ellipse(&contour).unwrap();
            assert_eq!(ellipse.confidence, 0.0);
            assert_eq!(ellipse, Ellipse::not_found());
        }
    }

    #[test]
    fn fits_the_observed_road_ellipses() {
        struct Case {
            contour: &'static [(i32, i32)],
            center: (i32, i32),
            width: i32,
            height: i32,
            angle: f32,
        }
        let cases = [
            Case {
                contour: &[(0, 45), (0, 127), (144, 127), (95, 21), (43, 21)],
                center: (71, 87),
                width: 139,
                height: 176,
                angle: 92.66927,
            },
            Case {
                contour: &[
                    (159, 69),
                    (128, 53),
                    (125, 41),
                    (113, 42),
                    (108, 21),
                    (87, 21),
                    (79, 41),
                    (72, 30),
                    (44, 39),
                    (29, 34),
                    (0, 67),
                    (0, 127),
                    (159, 127),
                    (152, 101),
                ],
                center: (77, 102),
                width: 152,
                height: 168,
                angle: 94.70433,
            },
            Case {
                contour: &[(97, 21), (59, 127), (159, 127), (159, 36), (138, 21)],
                center: (112, 86),
                width: 122,
                height: 140,
                angle: 20.761106,
            },
            Case {
                contour: &[
                    (0, 21),
                    (0, 77),
                    (68, 22),
                    (0, 96),
                    (0, 127),
                    (159, 127),
                    (159, 21),
                ],
                center: (86, 78),
                width: 154,
                height: 199,
                angle: 90.45744,
            },
            Case {
                contour: &[(159, 32), (100, 36), (29, 60), (0, 79), (0, 127), (159, 127)],
                center: (109, 87),
                width: 103,
                height: 247,
                angle: 79.6229,
            },
        ];

        let detector = RoadDetector::new();
        for case in &cases {
            let ellipse = detector.compute_ellipse(&contour_of(case.contour)).unwrap();
            assert_eq!((ellipse.center.x, ellipse.center.y), case.center);
            assert_eq!(ellipse.width, case.width);
            assert_eq!(ellipse.height, case.height);
            assert!(
                (ellipse.angle - case.angle).abs() < 0.01,
                "angle {} vs {}",
                ellipse.angle,
                case.angle
            );
            assert_eq!(ellipse.confidence, 1.0);
        }
    }

    #[test]
    fn trust_is_one_only_inside_the_safe_zone() {
        for center in [(48, 69), (115, 119), (71, 87), (48, 119)] {
            assert_eq!(trust_from_center(Point::new(center.0, center.1)), 1.0);
        }
        for center in [(47, 87), (116, 87), (71, 68), (71, 120), (0, 0)] {
            assert!(trust_from_center(Point::new(center.0, center.1)) < 1.0);
        }
    }

    #[test]
    fn trust_decays_with_distance_from_the_zone() {
        // One pixel out clamps to 0.9 on the violated axis.
        assert_eq!(trust_from_center(Point::new(116, 90)), 0.9);
        assert_eq!(trust_from_center(Point::new(80, 120)), 0.9);

        // Twenty pixels out: 10 / 20.
        assert_eq!(trust_from_center(Point::new(135, 90)), 0.5);
        assert_eq!(trust_from_center(Point::new(28, 90)), 0.5);
        assert_eq!(trust_from_center(Point::new(80, 139)), 0.5);
        assert_eq!(trust_from_center(Point::new(80, 49)), 0.5);

        // Both axes out multiply.
        assert_eq!(trust_from_center(Point::new(135, 139)), 0.25);

        // Monotone toward zero far away.
        let near = trust_from_center(Point::new(80, 139));
        let far = trust_from_center(Point::new(80, 239));
        let very_far = trust_from_center(Point::new(80, 1119));
        assert!(near > far && far > very_far);
        assert!(very_far > 0.0 && very_far < 0.1);
    }
}
