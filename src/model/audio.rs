//! Audio feature encoders.
//!
//! [`AudioNet`] compresses one windowed acoustic feature sequence into a
//! fixed-size embedding; [`AudioAttNet`] attention-pools a stack of
//! consecutive embeddings into a single smoothed one.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Conv1d, Conv1dConfig, VarBuilder};

const LEAKY_SLOPE: f64 = 0.02;

/// Windowed audio feature encoder.
///
/// `[B, dim_in, 16]` → central `win_size` frames → 4× stride-2 Conv1d
/// (→32→32→64→64, each + leaky-ReLU) → temporal collapse → 64→64→`dim_aud`.
#[derive(Debug, Clone)]
pub struct AudioNet {
    convs: Vec<Conv1d>,
    fc1: nn::Linear,
    fc2: nn::Linear,
    win_size: usize,
}

impl AudioNet {
    pub fn new(dim_in: usize, dim_aud: usize, win_size: usize, vb: VarBuilder) -> Result<Self> {
        let widths = [dim_in, 32, 32, 64, 64];
        let mut convs = Vec::with_capacity(4);
        for l in 0..4 {
            let cfg = Conv1dConfig {
                padding: 1,
                stride: 2,
                ..Default::default()
            };
            convs.push(nn::conv1d(
                widths[l],
                widths[l + 1],
                3,
                cfg,
                vb.pp(format!("encoder_conv.{l}")),
            )?);
        }
        let fc1 = nn::linear(64, 64, vb.pp("encoder_fc1.0"))?;
        let fc2 = nn::linear(64, dim_aud, vb.pp("encoder_fc1.1"))?;
        Ok(Self {
            convs,
            fc1,
            fc2,
            win_size,
        })
    }
}

impl Module for AudioNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let full = xs.dim(2)?;
        let half = self.win_size / 2;
        // Central win_size sub-window of the 16-frame input.
        let mut h = xs.narrow(2, full / 2 - half, 2 * half)?;
        for conv in &self.convs {
            h = nn::ops::leaky_relu(&conv.forward(&h)?, LEAKY_SLOPE)?;
        }
        let h = h.squeeze(2)?; // [B, 64, 1] → [B, 64]
        let h = nn::ops::leaky_relu(&self.fc1.forward(&h)?, LEAKY_SLOPE)?;
        self.fc2.forward(&h)
    }
}

/// Temporal self-attention over a sequence of audio embeddings.
///
/// `[1, seq_len, dim_aud]` → per-step scalar logits through a 5-conv funnel
/// (`dim_aud→16→8→4→2→1`) → linear + softmax over the steps → weighted sum
/// `[1, dim_aud]`.
#[derive(Debug, Clone)]
pub struct AudioAttNet {
    convs: Vec<Conv1d>,
    attention: nn::Linear,
    seq_len: usize,
}

impl AudioAttNet {
    pub fn new(dim_aud: usize, seq_len: usize, vb: VarBuilder) -> Result<Self> {
        let widths = [dim_aud, 16, 8, 4, 2, 1];
        let mut convs = Vec::with_capacity(5);
        for l in 0..5 {
            let cfg = Conv1dConfig {
                padding: 1,
                ..Default::default()
            };
            convs.push(nn::conv1d(
                widths[l],
                widths[l + 1],
                3,
                cfg,
                vb.pp(format!("attention_conv.{l}")),
            )?);
        }
        let attention = nn::linear(seq_len, seq_len, vb.pp("attention_net"))?;
        Ok(Self {
            convs,
            attention,
            seq_len,
        })
    }
}

impl Module for AudioAttNet {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut h = xs.transpose(1, 2)?.contiguous()?; // [1, dim_aud, seq]
        for conv in &self.convs {
            h = nn::ops::leaky_relu(&conv.forward(&h)?, LEAKY_SLOPE)?;
        }
        let logits = h.reshape((1, self.seq_len))?;
        let weights = nn::ops::softmax(&self.attention.forward(&logits)?, 1)?;
        let weights = weights.reshape((1, self.seq_len, 1))?;
        xs.broadcast_mul(&weights)?.sum(1) // [1, dim_aud]
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
    fn test_audio_net_shape() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let net = AudioNet::new(29, 32, 16, vb.pp("audio_net")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (8, 29, 16), &dev).unwrap();
        let y = net.forward(&x).unwrap();
        assert_eq!(y.dims(), &[8, 32]);
    }

    #[test]
    fn test_audio_net_hubert_width() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let net = AudioNet::new(1024, 32, 16, vb.pp("audio_net")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 1024, 16), &dev).unwrap();
        assert_eq!(net.forward(&x).unwrap().dims(), &[1, 32]);
    }

    #[test]
    fn test_att_net_shape() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let net = AudioAttNet::new(32, 8, vb.pp("att")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 8, 32), &dev).unwrap();
        let y = net.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 32]);
    }

    #[test]
    fn test_att_net_is_convex_combination() {
        // Softmax weights sum to one, so identical rows in → that row out.
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let net = AudioAttNet::new(16, 8, vb.pp("att")).unwrap();
        let row = Tensor::randn(0f32, 1.0, (1, 1, 16), &dev).unwrap();
        let x = row.repeat((1, 8, 1)).unwrap();
        let y = net.forward(&x).unwrap();
        let diff: f32 = (y - row.reshape((1, 16)).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-4, "convexity violated: {diff}");
    }

    #[test]
    fn test_att_net_zero_input() {
        let dev = Device::Cpu;
        let (_vm, vb) = make_vb(&dev);
        let net = AudioAttNet::new(16, 8, vb.pp("att")).unwrap();
        let x = Tensor::zeros((1, 8, 16), DType::F32, &dev).unwrap();
        let y: f32 = net
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
}
