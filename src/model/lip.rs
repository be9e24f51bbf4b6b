//! Lip landmark feature encoder.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

/// Four-layer feed-forward encoder compressing a raw lip landmark feature
/// into a latent code. Hidden width 20, leaky-ReLU between layers, linear
/// output.
#[derive(Debug, Clone)]
pub struct LipEncoder {
    layers: Vec<nn::Linear>,
}

impl LipEncoder {
    pub fn new(input_dim: usize, encoding_dim: usize, vb: VarBuilder) -> Result<Self> {
        let widths = [input_dim, 20, 20, 20, encoding_dim];
        let mut layers = Vec::with_capacity(4);
        for l in 0..4 {
            layers.push(nn::linear(
                widths[l],
                widths[l + 1],
                vb.pp(format!("encoder.{l}")),
            )?);
        }
        Ok(Self { layers })
    }
}

impl Module for LipEncoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = xs.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if l != last {
                h = nn::ops::leaky_relu(&h, 0.01)?;
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = LipEncoder::new(40, 20, vb.pp("lip")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 40), &dev).unwrap();
        let y = enc.forward(&x).unwrap();
        assert_eq!(y.dims(), &[4, 20]);
    }
}
