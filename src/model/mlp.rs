//! Generic bias-free fully-connected block.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

/// `num_layers` bias-free linear layers with ReLU between all but the last.
///
/// Backs every attention/gating/density/color head in the network; width is
/// fixed per instantiation.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<nn::Linear>,
}

impl Mlp {
    pub fn new(
        dim_in: usize,
        dim_out: usize,
        dim_hidden: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for l in 0..num_layers {
            let d_in = if l == 0 { dim_in } else { dim_hidden };
            let d_out = if l == num_layers - 1 { dim_out } else { dim_hidden };
            layers.push(nn::linear_no_bias(d_in, d_out, vb.pp(format!("net.{l}")))?);
        }
        Ok(Self { layers })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = xs.clone();
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if l != last {
                h = h.relu()?;
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

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    #[test]
    fn test_shape() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let mlp = Mlp::new(36, 65, 64, 3, vb.pp("sigma")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 36), &dev).unwrap();
        let y = mlp.forward(&x).unwrap();
        assert_eq!(y.dims(), &[4, 65]);
    }

    #[test]
    fn test_bias_free() {
        // With no biases, a zero input must map to a zero output.
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let mlp = Mlp::new(8, 3, 16, 2, vb.pp("m")).unwrap();
        let x = Tensor::zeros((2, 8), DType::F32, &dev).unwrap();
        let y: f32 = mlp
            .forward(&x)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_single_layer_is_linear_only() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let mlp = Mlp::new(4, 2, 16, 1, vb.pp("m")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 4), &dev).unwrap();
        // No ReLU on the last (only) layer, so negating the input negates the output.
        let y_pos = mlp.forward(&x).unwrap();
        let y_neg = mlp.forward(&x.neg().unwrap()).unwrap();
        let diff: f32 = (y_pos + y_neg)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5);
    }
}
