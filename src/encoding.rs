//! Input encoders: multi-level hash grid, frequency bands, spherical harmonics.

pub mod frequency;
pub mod grid;
pub mod sphere;

pub use frequency::FrequencyEncoder;
pub use grid::GridEncoder2d;
pub use sphere::SphereEncoder;
