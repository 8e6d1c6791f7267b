//! Loss taps. Each is a pure function of the current activation and a
//! precomputed target; the caller collects the returned scalars.

use candle_core::{Result, Tensor};

/// Channel-correlation matrix of a `(B, C, H, W)` activation, normalized by
/// its element count.
pub fn gram_matrix(x: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = x.dims4()?;
    let features = x.reshape((b * c, h * w))?;
    let gram = features.matmul(&features.t()?)?;
    gram.affine(1.0 / (b * c * h * w) as f64, 0.0)
}

pub fn content_loss(x: &Tensor, target: &Tensor) -> Result<Tensor> {
    candle_nn::loss::mse(x, target)
}

/// `target_gram` is the Gram matrix of the style activation, not the
/// activation itself.
pub fn style_loss(x: &Tensor, target_gram: &Tensor) -> Result<Tensor> {
    candle_nn::loss::mse(&gram_matrix(x)?, target_gram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn activation() -> Tensor {
        Tensor::randn(0f32, 1f32, (1, 4, 3, 5), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_gram_matrix_is_symmetric() {
        let gram = gram_matrix(&activation()).unwrap();
        assert_eq!(gram.dims(), &[4, 4]);

        let diff = (&gram - &gram.t().unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_style_loss_against_itself_is_zero() {
        let x = activation();
        let target = gram_matrix(&x).unwrap();
        let loss = style_loss(&x, &target).unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_content_loss_is_mean_squared_error() {
        let x = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &Device::Cpu).unwrap();
        let target = Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let loss = content_loss(&x, &target).unwrap().to_scalar::<f32>().unwrap();
        assert!((loss - 7.5).abs() < 1e-6);
    }
}
