//! Option-value parsing for the configuration record

use anyhow::{bail, Context, Result};

use image_ingest_core::{brightness_matrix, ResizeMode};

/// `"32"` is a shortest-side resize; `"16x16"` (or `"16,16"`) is fixed
pub fn parse_resize(value: &str) -> Result<ResizeMode> {
    let parts: Vec<&str> = value.split(['x', ',']).collect();
    match parts.as_slice() {
        [side] => {
            let side: u32 = side
                .trim()
                .parse()
                .with_context(|| format!("invalid resize '{value}'"))?;
            Ok(ResizeMode::ShortestSide(side))
        }
        [height, width] => {
            let height: u32 = height
                .trim()
                .parse()
                .with_context(|| format!("invalid resize '{value}'"))?;
            let width: u32 = width
                .trim()
                .parse()
                .with_context(|| format!("invalid resize '{value}'"))?;
            Ok(ResizeMode::Fixed { height, width })
        }
        _ => bail!("invalid resize '{value}': expected S or HxW"),
    }
}

/// Comma-separated float list of a fixed arity
pub fn parse_floats(option: &str, value: &str, expected: &[usize]) -> Result<Vec<f32>> {
    let mut out = Vec::new();
    for part in value.split(',') {
        out.push(
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid {option} '{value}'"))?,
        );
    }
    if !expected.contains(&out.len()) {
        bail!(
            "invalid {option} '{value}': expected {expected:?} values, got {}",
            out.len()
        );
    }
    Ok(out)
}

pub fn parse_vec3(option: &str, value: &str) -> Result<[f32; 3]> {
    let values = parse_floats(option, value, &[3])?;
    Ok([values[0], values[1], values[2]])
}

pub fn parse_range(option: &str, value: &str) -> Result<(f32, f32)> {
    let values = parse_floats(option, value, &[2])?;
    Ok((values[0], values[1]))
}

/// 1, 3, or 9 values: scalar, diagonal, or full column-major matrix
pub fn parse_brightness(value: &str) -> Result<[f32; 9]> {
    let values = parse_floats("brightness", value, &[1, 3, 9])?;
    brightness_matrix(&values).map_err(anyhow::Error::from)
}
