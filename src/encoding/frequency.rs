//! Frequency (sin/cos band) encoder for low-dimensional inputs.

use candle_core::{Result, Tensor};

/// Classic NeRF positional encoding: the raw input followed by
/// `sin(2^k x), cos(2^k x)` for `k in 0..num_freqs`.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyEncoder {
    input_dim: usize,
    num_freqs: usize,
}

impl FrequencyEncoder {
    pub fn new(input_dim: usize, num_freqs: usize) -> Self {
        Self {
            input_dim,
            num_freqs,
        }
    }

    /// Encoded width: `input_dim * (1 + 2 * num_freqs)`.
    pub fn output_dim(&self) -> usize {
        self.input_dim * (1 + 2 * self.num_freqs)
    }

    /// Encode `x: [N, input_dim]` to `[N, output_dim]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut bands = Vec::with_capacity(1 + 2 * self.num_freqs);
        bands.push(x.clone());
        for k in 0..self.num_freqs {
            let scaled = (x * f64::from(1u32 << k))?;
            bands.push(scaled.sin()?);
            bands.push(scaled.cos()?);
        }
        Tensor::cat(&bands, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_output_dims() {
        // Torso deform input: 2-d at 8 bands → 34; anchors: 6-d at 3 bands → 42.
        assert_eq!(FrequencyEncoder::new(2, 8).output_dim(), 34);
        assert_eq!(FrequencyEncoder::new(6, 3).output_dim(), 42);
    }

    #[test]
    fn test_raw_input_passthrough() {
        let dev = Device::Cpu;
        let enc = FrequencyEncoder::new(2, 3);
        let x = Tensor::new(&[[0.25f32, -0.5]], &dev).unwrap();
        let y = enc.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 14]);
        let row = y.to_vec2::<f32>().unwrap();
        assert_eq!(&row[0][..2], &[0.25, -0.5]);
        // First band is sin(x), cos(x).
        assert!((row[0][2] - 0.25f32.sin()).abs() < 1e-6);
        assert!((row[0][4] - 0.25f32.cos()).abs() < 1e-6);
    }
}
