//! Real spherical-harmonics encoder for view directions.

use candle_core::{Result, Tensor};

const C0: f64 = 0.282_094_791_773_878_14;
const C1: f64 = 0.488_602_511_902_919_87;
const C2: [f64; 5] = [
    1.092_548_430_592_079_2,
    -1.092_548_430_592_079_2,
    0.946_174_695_757_559_97,
    -1.092_548_430_592_079_2,
    0.546_274_215_296_039_59,
];
const C3: [f64; 7] = [
    -0.590_043_589_926_643_52,
    2.890_611_442_640_553_8,
    -0.457_045_799_464_465_72,
    0.373_176_332_590_115_4,
    -0.457_045_799_464_465_72,
    1.445_305_721_320_276_9,
    -0.590_043_589_926_643_52,
];

/// Spherical-harmonics direction encoder, `degree` bands (1 to 4).
///
/// Directions are expected to be unit vectors; the basis is evaluated
/// analytically, so the encoder carries no learned state.
#[derive(Debug, Clone, Copy)]
pub struct SphereEncoder {
    degree: usize,
}

impl SphereEncoder {
    pub fn new(degree: usize) -> Self {
        assert!((1..=4).contains(&degree), "SH degree must be in 1..=4");
        Self { degree }
    }

    /// Encoded width: `degree^2`.
    pub fn output_dim(&self) -> usize {
        self.degree * self.degree
    }

    /// Encode `d: [N, 3]` unit directions to `[N, degree^2]`.
    pub fn forward(&self, d: &Tensor) -> Result<Tensor> {
        let (n, _) = d.dims2()?;
        let x = d.narrow(1, 0, 1)?;
        let y = d.narrow(1, 1, 1)?;
        let z = d.narrow(1, 2, 1)?;

        let mut comps: Vec<Tensor> = Vec::with_capacity(self.output_dim());
        comps.push(Tensor::full(C0 as f32, (n, 1), d.device())?);

        if self.degree > 1 {
            comps.push((&y * -C1)?);
            comps.push((&z * C1)?);
            comps.push((&x * -C1)?);
        }
        if self.degree > 2 {
            let xx = x.sqr()?;
            let yy = y.sqr()?;
            let zz = z.sqr()?;
            comps.push(((&x * &y)? * C2[0])?);
            comps.push(((&y * &z)? * C2[1])?);
            comps.push(((&zz * C2[2])? + (-C2[2] / 3.0))?);
            comps.push(((&x * &z)? * C2[3])?);
            comps.push((((&xx - &yy)?) * C2[4])?);
        }
        if self.degree > 3 {
            let xx = x.sqr()?;
            let yy = y.sqr()?;
            let zz = z.sqr()?;
            // (3x² - y²)y, xyz, y(4z² - x² - y²), z(2z² - 3x² - 3y²), ...
            comps.push(((&y * &((&xx * 3.0)? - &yy)?)? * C3[0])?);
            comps.push((((&x * &y)? * &z)? * C3[1])?);
            comps.push(((&y * &((&zz * -4.0)? + (&xx + &yy)?)?)? * C3[2])?);
            comps.push(((&z * &((&zz * 2.0)? - &((&xx + &yy)? * 3.0)?)?)? * C3[3])?);
            comps.push(((&x * &((&zz * -4.0)? + (&xx + &yy)?)?)? * C3[4])?);
            comps.push(((&z * &(&xx - &yy)?)? * C3[5])?);
            comps.push(((&x * &(&xx - &(&yy * 3.0)?)?)? * C3[6])?);
        }

        Tensor::cat(&comps, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_output_shape() {
        let dev = Device::Cpu;
        let enc = SphereEncoder::new(4);
        assert_eq!(enc.output_dim(), 16);
        let d = Tensor::new(&[[0.0f32, 0.0, 1.0], [1.0, 0.0, 0.0]], &dev).unwrap();
        let y = enc.forward(&d).unwrap();
        assert_eq!(y.dims(), &[2, 16]);
    }

    #[test]
    fn test_constant_band() {
        let dev = Device::Cpu;
        let enc = SphereEncoder::new(1);
        let d = Tensor::new(&[[0.6f32, 0.0, 0.8]], &dev).unwrap();
        let y = enc.forward(&d).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y[0].len(), 1);
        assert!((y[0][0] - 0.2820948).abs() < 1e-6);
    }

    #[test]
    fn test_direction_sensitivity() {
        let dev = Device::Cpu;
        let enc = SphereEncoder::new(4);
        let d = Tensor::new(&[[0.0f32, 0.0, 1.0], [0.0, 1.0, 0.0]], &dev).unwrap();
        let y = enc.forward(&d).unwrap().to_vec2::<f32>().unwrap();
        assert_ne!(y[0], y[1]);
        // Band-1 z component for +z: C1 * 1.
        assert!((y[0][2] - 0.48860252).abs() < 1e-6);
    }
}
