use super::EngineError;
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// Decode PNG/JPEG bytes into a `(1, 3, H, W)` f32 tensor in `[0, 1]`,
/// optionally resized to a `size x size` square.
pub fn decode(bytes: &[u8], size: Option<usize>, device: &Device) -> Result<Tensor, EngineError> {
    let mut image = image::load_from_memory(bytes)?;
    if let Some(size) = size {
        image = image.resize_exact(size as u32, size as u32, FilterType::Triangle);
    }

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let tensor = Tensor::from_vec(rgb.into_raw(), (height as usize, width as usize, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .unsqueeze(0)?;
    Ok(tensor)
}

/// Encode a `(3, H, W)` or `(1, 3, H, W)` tensor in `[0, 1]` as PNG.
pub fn encode_png(image: &Tensor) -> Result<Vec<u8>, EngineError> {
    let image = if image.rank() == 4 {
        image.squeeze(0)?
    } else {
        image.clone()
    };
    let (channels, height, width) = image.dims3()?;
    if channels != 3 {
        return Err(EngineError::Tensor(candle_core::Error::Msg(format!(
            "expected 3 channels, got {}",
            channels
        ))));
    }

    let pixels = image
        .clamp(0f32, 1f32)?
        .affine(255.0, 0.0)?
        .round()?
        .to_dtype(DType::U8)?
        .permute((1, 2, 0))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<u8>()?;

    let buffer = RgbImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
        EngineError::Tensor(candle_core::Error::Msg(
            "pixel buffer does not match image size".to_string(),
        ))
    })?;

    let mut out = Cursor::new(Vec::new());
    buffer.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 40) as u8, (y * 40) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode sample");
    out.into_inner()
}
