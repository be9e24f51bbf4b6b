//! Configuration for the talking-head NeRF network.
//!
//! All capability toggles (torso mode, audio attention, eye conditioning,
//! audio-token embedding) are resolved once here; the network is built from
//! this struct and never re-inspects ad-hoc flags at call time.

use serde::{Deserialize, Serialize};

/// Acoustic front-end producing the per-frame audio features.
///
/// The variant fixes the input channel count of [`crate::model::audio::AudioNet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrModel {
    /// Esperanto phoneme features, 44 channels.
    Esperanto,
    /// DeepSpeech logits, 29 channels.
    DeepSpeech,
    /// HuBERT hidden states, 1024 channels.
    Hubert,
    /// Wav2Vec-style features, 32 channels (default front-end).
    Wav2Vec,
}

impl AsrModel {
    /// Per-frame feature dimension for this front-end.
    pub fn feature_dim(&self) -> usize {
        match self {
            AsrModel::Esperanto => 44,
            AsrModel::DeepSpeech => 29,
            AsrModel::Hubert => 1024,
            AsrModel::Wav2Vec => 32,
        }
    }
}

/// Multi-level 2D grid encoder hyperparameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    pub num_levels: usize,
    /// Feature channels per level.
    pub level_dim: usize,
    pub base_resolution: usize,
    /// Table size exponent: each level stores at most `2^log2_hashmap_size` rows.
    pub log2_hashmap_size: usize,
    /// Finest level resolution.
    pub desired_resolution: usize,
}

impl GridConfig {
    /// Encoded feature width: `num_levels * level_dim`.
    pub fn output_dim(&self) -> usize {
        self.num_levels * self.level_dim
    }
}

/// Top-level network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeRFConfig {
    // --- Audio path ---
    pub asr_model: AsrModel,
    /// Audio embedding width (`enc_a`).
    pub audio_dim: usize,
    /// Raw feature window length fed to the network (frames).
    pub audio_window: usize,
    /// Central sub-window actually consumed by `AudioNet`.
    pub audio_win_size: usize,
    /// Consecutive windows pooled by `AudioAttNet`.
    pub audio_smoothing_window: usize,
    /// Enable temporal attention pooling over audio windows.
    pub audio_attention: bool,
    /// Embed discrete audio tokens before `AudioNet`.
    pub audio_embedding: bool,

    // --- Conditioning ---
    /// Full (Mode B) conditioning: eye scalar, audio index and lip latent,
    /// each behind its own sigmoid-bounded attention gate.
    pub exp_eye: bool,
    /// Audio index signal width.
    pub audio_index_dim: usize,
    /// Raw lip landmark feature width (stacked upper/lower sets).
    pub lip_feature_dim: usize,
    /// Lip latent width after `LipEncoder`.
    pub lip_latent_dim: usize,

    // --- Scene ---
    /// Query points live in `[-bound, bound]^3`.
    pub bound: f64,
    /// Torso-only training variant.
    pub torso: bool,
    /// Scale applied to the torso 2D input before deformation.
    pub torso_shrink: f64,

    // --- Identity / camera ---
    pub individual_dim: usize,
    pub individual_dim_torso: usize,
    /// Rows in the per-identity code tables.
    pub individual_num: usize,
    pub train_camera: bool,
    /// Per-frame camera pose offsets when `train_camera` is set.
    pub num_training_frames: usize,

    // --- Heads ---
    pub sigma_hidden_dim: usize,
    pub sigma_num_layers: usize,
    pub geo_feat_dim: usize,
    pub color_hidden_dim: usize,
    pub color_num_layers: usize,
    /// Predict a per-point uncertainty scalar during training.
    pub uncertainty_loss: bool,
}

impl Default for NeRFConfig {
    fn default() -> Self {
        Self {
            asr_model: AsrModel::Wav2Vec,
            audio_dim: 32,
            audio_window: 16,
            audio_win_size: 16,
            audio_smoothing_window: 8,
            audio_attention: true,
            audio_embedding: false,
            exp_eye: true,
            audio_index_dim: 2,
            lip_feature_dim: 40,
            lip_latent_dim: 20,
            bound: 1.0,
            torso: false,
            torso_shrink: 0.8,
            individual_dim: 4,
            individual_dim_torso: 8,
            individual_num: 10_000,
            train_camera: false,
            num_training_frames: 0,
            sigma_hidden_dim: 64,
            sigma_num_layers: 3,
            geo_feat_dim: 64,
            color_hidden_dim: 64,
            color_num_layers: 2,
            uncertainty_loss: true,
        }
    }
}

impl NeRFConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Per-frame acoustic feature dimension, fixed by the ASR front-end.
    pub fn audio_in_dim(&self) -> usize {
        self.asr_model.feature_dim()
    }

    /// One triplane grid encoder (12 levels, 1 channel, finest `512 * bound`).
    pub fn plane_grid(&self) -> GridConfig {
        GridConfig {
            num_levels: 12,
            level_dim: 1,
            base_resolution: 64,
            log2_hashmap_size: 14,
            desired_resolution: (512.0 * self.bound) as usize,
        }
    }

    /// Torso color grid encoder (tiled at coarse levels, hashed when full).
    pub fn torso_grid(&self) -> GridConfig {
        GridConfig {
            num_levels: 16,
            level_dim: 2,
            base_resolution: 16,
            log2_hashmap_size: 16,
            desired_resolution: 2048,
        }
    }

    /// Triplane feature width: three concatenated plane encodings.
    pub fn in_dim(&self) -> usize {
        3 * self.plane_grid().output_dim()
    }

    /// Eye conditioning width (1 in Mode B, 0 otherwise).
    pub fn eye_dim(&self) -> usize {
        if self.exp_eye {
            1
        } else {
            0
        }
    }

    /// Input width of the density network. Mode B concatenates the gated
    /// audio index, eye scalar and lip latent after the gated audio embedding.
    pub fn sigma_in_dim(&self) -> usize {
        let base = self.in_dim() + self.audio_dim;
        if self.exp_eye {
            base + self.audio_index_dim + self.eye_dim() + self.lip_latent_dim
        } else {
            base
        }
    }

    /// Input width of the color network (SH dir + geo feature + identity code).
    pub fn color_in_dim(&self) -> usize {
        16 + self.geo_feat_dim + self.individual_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asr_feature_dims() {
        assert_eq!(AsrModel::Esperanto.feature_dim(), 44);
        assert_eq!(AsrModel::DeepSpeech.feature_dim(), 29);
        assert_eq!(AsrModel::Hubert.feature_dim(), 1024);
        assert_eq!(AsrModel::Wav2Vec.feature_dim(), 32);
    }

    #[test]
    fn test_default_dims() {
        let cfg = NeRFConfig::default();
        assert_eq!(cfg.audio_in_dim(), 32);
        assert_eq!(cfg.in_dim(), 36); // 3 planes * 12 levels * 1 channel
        // Mode B: 36 + 32 + 2 + 1 + 20
        assert_eq!(cfg.sigma_in_dim(), 91);
        assert_eq!(cfg.color_in_dim(), 16 + 64 + 4);
    }

    #[test]
    fn test_mode_widths_differ() {
        // Mode A and Mode B models feed different concatenation widths into
        // the density net.
        let full = NeRFConfig::default();
        let plain = NeRFConfig {
            exp_eye: false,
            ..NeRFConfig::default()
        };
        assert_eq!(plain.sigma_in_dim(), 36 + 32);
        assert!(full.sigma_in_dim() > plain.sigma_in_dim());
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = NeRFConfig {
            asr_model: AsrModel::DeepSpeech,
            torso: true,
            ..NeRFConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: NeRFConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.asr_model, AsrModel::DeepSpeech);
        assert!(back.torso);
        assert_eq!(back.audio_dim, cfg.audio_dim);
    }

    #[test]
    fn test_grid_output_dims() {
        let cfg = NeRFConfig::default();
        assert_eq!(cfg.plane_grid().output_dim(), 12);
        assert_eq!(cfg.torso_grid().output_dim(), 32);
        assert_eq!(cfg.plane_grid().desired_resolution, 512);
    }
}
