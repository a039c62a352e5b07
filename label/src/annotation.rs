use crate::Label;
use anyhow::{ensure, Context as _, Result};
use bbox::{CxCyWH, Rect, Size, Transform, XYXY};
use noisy_float::prelude::*;
use std::{fs, path::Path};

/// A ground-truth object in normalized, image-relative units.
pub type Annotation = Label<CxCyWH<R64>, usize>;

/// A ground-truth object converted to pixel units.
pub type PixelAnnotation = Label<XYXY<R64>, usize>;

impl Label<CxCyWH<R64>, usize> {
    /// Convert to a pixel box on an image of the given size.
    ///
    /// `x1 = xc * W - w * W / 2`, and likewise for the other corners.
    pub fn to_pixel(&self, image_size: &Size<R64>) -> PixelAnnotation {
        let transform = Transform::from_unit_to(image_size);
        let Label { rect, class } = &transform * self;
        Label {
            rect: XYXY::from(rect),
            class,
        }
    }
}

/// Parse one line of a label file, `class x_center y_center width height`.
///
/// Lines with fewer than five fields yield `None`. Fields after the fifth are ignored.
/// Coordinates are normalized and must lie in `[0, 1]`.
pub fn parse_label_line(line: &str) -> Result<Option<Annotation>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [class, cx, cy, w, h] = match fields.as_slice() {
        [class, cx, cy, w, h, ..] => [*class, *cx, *cy, *w, *h],
        _ => return Ok(None),
    };

    let class: usize = class
        .parse()
        .with_context(|| format!("invalid class id '{}'", class))?;
    let parse_coord = |text: &str| -> Result<R64> {
        let value: f64 = text
            .parse()
            .with_context(|| format!("invalid coordinate '{}'", text))?;
        ensure!(
            (0.0..=1.0).contains(&value),
            "coordinate '{}' is outside [0, 1]",
            text
        );
        Ok(r64(value))
    };
    let rect = CxCyWH::try_from_cxcywh([
        parse_coord(cx)?,
        parse_coord(cy)?,
        parse_coord(w)?,
        parse_coord(h)?,
    ])?;

    Ok(Some(Label { rect, class }))
}

/// Load all annotations of one image.
pub fn load_label_file(path: impl AsRef<Path>) -> Result<Vec<Annotation>> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))?;

    text.lines()
        .enumerate()
        .filter_map(|(line_no, line)| {
            parse_label_line(line)
                .with_context(|| format!("{}:{}", path.display(), line_no + 1))
                .transpose()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use bbox::RectNum;
    use std::io::Write as _;

    #[test]
    fn parse_line() {
        let label = parse_label_line("1 0.5 0.25 0.2 0.1").unwrap().unwrap();
        assert_eq!(label.class, 1);
        assert_eq!(label.rect.cx(), r64(0.5));
        assert_eq!(label.rect.h(), r64(0.1));

        assert!(parse_label_line("").unwrap().is_none());
        assert!(parse_label_line("0 0.5 0.5").unwrap().is_none());
        assert!(parse_label_line("0 0.5 0.5 0.1 0.1 0.93").unwrap().is_some());
        assert!(parse_label_line("x 0.5 0.5 0.1 0.1").is_err());
        assert!(parse_label_line("0 0.5 0.5 nan 0.1").is_err());
        assert!(parse_label_line("0 0.5 0.5 -0.1 0.1").is_err());
    }

    #[test]
    fn reject_unnormalized_coordinates() {
        assert!(parse_label_line("0 1e308 0.5 0.1 0.1").is_err());
        assert!(parse_label_line("0 0.5 0.5 1.5 0.1").is_err());
        assert!(parse_label_line("0 5 5 10 10").is_err());
        assert!(parse_label_line("0 inf 0.5 0.1 0.1").is_err());
        assert!(parse_label_line("0 0 1 1 0").unwrap().is_some());
    }

    #[test]
    fn convert_to_pixels() {
        let label = parse_label_line("0 0.5 0.5 0.5 0.25").unwrap().unwrap();
        let size = Size::from_wh([r64(200.0), r64(400.0)]);
        let pixel = label.to_pixel(&size);
        let [x1, y1, x2, y2] = pixel.rect.xyxy();

        assert_eq!(pixel.class, 0);
        assert_abs_diff_eq!(x1.raw(), 50.0);
        assert_abs_diff_eq!(y1.raw(), 150.0);
        assert_abs_diff_eq!(x2.raw(), 150.0);
        assert_abs_diff_eq!(y2.raw(), 250.0);
    }

    #[test]
    fn load_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hall.txt");
        let mut file = fs::File::create(&path)?;
        writeln!(file, "0 0.1 0.1 0.1 0.1")?;
        writeln!(file)?;
        writeln!(file, "1 0.5 0.5 0.2 0.2")?;
        drop(file);

        let labels = load_label_file(&path)?;
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1].class, 1);

        assert!(load_label_file(dir.path().join("missing.txt")).is_err());

        fs::write(&path, "0 0.1 zero 0.1 0.1\n")?;
        assert!(load_label_file(&path).is_err());
        Ok(())
    }
}
