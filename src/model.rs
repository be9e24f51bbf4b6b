//! Network modules: audio/lip encoders, generic MLP, radiance network.

pub mod audio;
pub mod lip;
pub mod mlp;
pub mod nerf;

pub use audio::{AudioAttNet, AudioNet};
pub use lip::LipEncoder;
pub use mlp::Mlp;
pub use nerf::{DensityOutput, NeRFNetwork, ParamGroup, RadianceOutput, TorsoOutput};
