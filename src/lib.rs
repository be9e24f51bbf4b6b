//! Audio-driven talking-head NeRF in pure Rust.
//!
//! A candle-based implementation of a triplane-hashgrid radiance network
//! conditioned on audio, eye state and lip geometry. The renderer, training
//! loop and data pipeline are external; this crate is the learned mapping
//! from 3D query points to density/color plus the torso deformation network.
//!
//! ## Architecture
//!
//! ```text
//! audio window ─→ AudioNet ─→ (AudioAttNet) ─→ enc_a ──┐
//! eye scalar ──────────────────────────────────────────┤
//! audio index ─────────────────────────────────────────┼─ gated fusion
//! lip feature ─→ LipEncoder ───────────────────────────┘      │
//!                                                             ↓
//! x [N,3] ─→ triplane hash grids (xy|yz|xz) ─→ enc_x ─→ sigma_net
//!                                                             │
//!                                              sigma ←─┬──────┘
//! d [N,3] ─→ spherical harmonics ─→ enc_d ─→ color_net ←┘ geo_feat
//!                                                             ↓
//!                                              color, uncertainty
//! ```
//!
//! The torso is handled by a separate 2D deformation + color network keyed
//! on the head pose and three learned anchor points, see
//! [`model::nerf::NeRFNetwork::forward_torso`].
//!
//! ## Modules
//!
//! - [`config`] — tagged network configuration, capabilities resolved at build
//! - [`encoding`] — hash-grid, frequency and spherical-harmonics encoders
//! - [`model`] — audio/lip encoders, generic MLP, and the radiance network

pub mod config;
pub mod encoding;
pub mod model;

mod error;

pub use error::{Error, Result};
