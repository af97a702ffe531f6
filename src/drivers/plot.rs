use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::TitrationError;
use crate::drivers::AnalysisResult;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub data_color: RGBColor,
    pub fit_color: RGBColor,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 500,
            background: WHITE,
            data_color: RGBColor(0, 114, 178),
            fit_color: RGBColor(220, 20, 60),
        }
    }
}
fn padded_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    if span.abs() < f64::EPSILON {
        (lo - 1.0, hi + 1.0)
    } else {
        (lo - span * 0.05, hi + span * 0.05)
    }
}
/// Scatter of the analysed series with both fitted lines and the
/// intersection marked.
pub fn render_analysis_png(
    result: &AnalysisResult,
    style: PlotStyle,
) -> Result<Vec<u8>, TitrationError> {
    if result.x.is_empty() || result.x.len() != result.y.len() {
        return Err(TitrationError::Plot(
            "analysis result has no plottable series".into(),
        ));
    }
    let (x_star, y_star) = result.intersection;
    let (x_min, x_max) = padded_bounds(result.x.iter().copied());
    let (y_min, y_max) = padded_bounds(result.y.iter().copied().chain([y_star]));
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(
                format!(
                    "Equivalence x = {x_star:.4}, c = {:.4} mol/L",
                    result.concentration
                ),
                ("sans-serif", 20).into_font().color(&BLACK),
            )
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        chart
            .configure_mesh()
            .x_desc("titrant fraction")
            .y_desc("conductivity")
            .light_line_style(&BLACK.mix(0.05))
            .draw()?;
        let data_color = style.data_color;
        chart.draw_series(
            result
                .x
                .iter()
                .zip(&result.y)
                .map(|(&x, &y)| Circle::new((x, y), 3, data_color.filled())),
        )?;
        let fit_stroke = style.fit_color.stroke_width(3);
        let x_mark = x_star.clamp(x_min, x_max);
        chart.draw_series(LineSeries::new(
            [x_min, x_mark]
                .into_iter()
                .map(|x| (x, result.fit_left.predict(x))),
            fit_stroke,
        ))?;
        chart.draw_series(LineSeries::new(
            [x_mark, x_max]
                .into_iter()
                .map(|x| (x, result.fit_right.predict(x))),
            fit_stroke,
        ))?;
        chart.draw_series(std::iter::once(Circle::new(
            (x_star, y_star),
            6,
            style.fit_color.filled(),
        )))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, TitrationError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| TitrationError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SegmentedFitter;
    #[test]
    fn empty_series_is_rejected() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| (v - 4.0).abs()).collect();
        let mut result = SegmentedFitter::default().analyze(&x, &y, 0.1).unwrap();
        result.x.clear();
        assert!(matches!(
            render_analysis_png(&result, PlotStyle::default()),
            Err(TitrationError::Plot(_))
        ));
    }
    #[test]
    fn encoder_emits_png_signature() {
        let png = encode_png(&vec![255u8; 4 * 3 * 3], 4, 3).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert!(encode_png(&[0u8; 5], 4, 3).is_err());
    }
    #[test]
    fn bounds_are_padded() {
        let (lo, hi) = padded_bounds([0.0, 10.0].into_iter());
        assert!(lo < 0.0 && hi > 10.0);
        assert_eq!(padded_bounds([2.0, 2.0].into_iter()), (1.0, 3.0));
        assert_eq!(padded_bounds(std::iter::empty::<f64>()), (0.0, 1.0));
    }
}
