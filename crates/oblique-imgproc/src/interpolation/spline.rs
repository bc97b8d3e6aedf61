use oblique_image::Image;

/// Second derivatives of the natural cubic spline through `values` at unit spacing.
fn natural_moments(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut moments = vec![0.0; n];
    if n < 3 {
        return moments;
    }

    // tridiagonal system M[i-1] + 4 M[i] + M[i+1] = 6 (y[i+1] - 2 y[i] + y[i-1]),
    // solved for the interior moments with M[0] = M[n-1] = 0
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];
    for i in 1..n - 1 {
        let rhs = 6.0 * (values[i + 1] - 2.0 * values[i] + values[i - 1]);
        let m = 4.0 - c[i - 1];
        c[i] = 1.0 / m;
        d[i] = (rhs - d[i - 1]) / m;
    }
    for i in (1..n - 1).rev() {
        moments[i] = d[i] - c[i] * moments[i + 1];
    }
    moments
}

fn eval_natural(values: &[f64], moments: &[f64], x: f64) -> f64 {
    let n = values.len();
    if n == 1 {
        return values[0];
    }
    let i = (x.floor().max(0.0) as usize).min(n - 2);
    let t = x - i as f64;
    let s = 1.0 - t;
    s * values[i]
        + t * values[i + 1]
        + ((s * s * s - s) * moments[i] + (t * t * t - t) * moments[i + 1]) / 6.0
}

/// Natural bicubic spline through the pixels of a single channel image.
///
/// The surface passes through every pixel value and is twice continuously differentiable,
/// which keeps the position of a sampled peak unbiased when it sits between pixels.
///
/// # Example
///
/// ```
/// use oblique_image::Image;
/// use oblique_imgproc::interpolation::BicubicSpline;
///
/// let image = Image::<f32, 1>::from_fn([4, 3].into(), |x, y| [(x + 2 * y) as f32]);
/// let spline = BicubicSpline::new(&image);
///
/// assert!((spline.eval(1.5, 1.0) - 3.5).abs() < 1e-9);
/// ```
pub struct BicubicSpline {
    rows: Vec<Vec<f64>>,
    row_moments: Vec<Vec<f64>>,
}

impl BicubicSpline {
    /// Fit the spline to `image`.
    pub fn new(image: &Image<f32, 1>) -> Self {
        let rows = image
            .as_slice()
            .chunks_exact(image.cols().max(1))
            .map(|row| row.iter().map(|&v| v as f64).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let row_moments = rows.iter().map(|r| natural_moments(r)).collect();
        Self { rows, row_moments }
    }

    /// Evaluate the spline at `(x, y)`, extrapolating the border segments outside the image.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        if self.rows.is_empty() {
            return f64::NAN;
        }
        let column = self
            .rows
            .iter()
            .zip(&self.row_moments)
            .map(|(row, moments)| eval_natural(row, moments, x))
            .collect::<Vec<_>>();
        eval_natural(&column, &natural_moments(&column), y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oblique_image::ImageError;

    #[test]
    fn test_spline_passes_through_samples() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::new(
            [4, 3].into(),
            vec![1.0, 5.0, 2.0, 0.0, 3.0, -1.0, 4.0, 2.0, 0.5, 0.5, 6.0, 1.0],
        )?;
        let spline = BicubicSpline::new(&image);
        for y in 0..3 {
            for x in 0..4 {
                approx::assert_abs_diff_eq!(
                    spline.eval(x as f64, y as f64),
                    image.get_pixel(x, y, 0)? as f64,
                    epsilon = 1e-9
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_spline_reproduces_planes() {
        let image = Image::<f32, 1>::from_fn([6, 5].into(), |x, y| [2.0 * x as f32 - y as f32]);
        let spline = BicubicSpline::new(&image);
        approx::assert_abs_diff_eq!(spline.eval(2.25, 3.5), 4.5 - 3.5, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(spline.eval(0.1, 0.9), 0.2 - 0.9, epsilon = 1e-9);
    }

    #[test]
    fn test_natural_moments_of_parabola() {
        // interior second derivative of x² is 2, pulled towards zero at the ends
        let values = (0..9).map(|x| (x * x) as f64).collect::<Vec<_>>();
        let moments = natural_moments(&values);
        assert_eq!(moments[0], 0.0);
        assert_eq!(moments[8], 0.0);
        approx::assert_abs_diff_eq!(moments[4], 2.0, epsilon = 0.05);
    }
}
