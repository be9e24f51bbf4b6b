//! The audio-conditioned radiance network.
//!
//! Maps 3D query points to density and view-dependent color, conditioned on
//! an audio embedding, eye openness, an audio index signal and a lip latent,
//! each modulated by a learned per-point attention gate. A separate
//! deformation + color pipeline handles the torso region, keyed on the head
//! pose and three learned anchor points.
//!
//! The ray-marching renderer and the optimizer are external: the renderer
//! drives [`NeRFNetwork::forward`] / [`NeRFNetwork::density`] /
//! [`NeRFNetwork::forward_torso`], the optimizer consumes
//! [`NeRFNetwork::get_params`].

use candle_core::{Module, Tensor, Var};
use candle_nn::{self as nn, VarBuilder, VarMap};

use crate::config::NeRFConfig;
use crate::encoding::{FrequencyEncoder, GridEncoder2d, SphereEncoder};
use crate::model::audio::{AudioAttNet, AudioNet};
use crate::model::lip::LipEncoder;
use crate::model::mlp::Mlp;
use crate::{Error, Result};

/// Color/alpha sigmoids are stretched by this margin so targets at exactly
/// 0 or 1 do not require saturated logits.
const SIGMOID_EPS: f64 = 0.001;

/// Initial anchor points in head-local homogeneous coordinates.
const ANCHOR_INIT: [[f32; 4]; 3] = [
    [0.01, 0.01, 0.1, 1.0],
    [-0.1, -0.1, 0.1, 1.0],
    [0.1, -0.1, 0.1, 1.0],
];

/// `sigmoid(h) * (1 + 2ε) - ε`, mapping logits into `[-ε, 1+ε]`.
fn clamped_sigmoid(h: &Tensor) -> candle_core::Result<Tensor> {
    nn::ops::sigmoid(h)?.affine(1.0 + 2.0 * SIGMOID_EPS, -SIGMOID_EPS)
}

fn softplus(x: &Tensor) -> candle_core::Result<Tensor> {
    (x.exp()? + 1.0)?.log()
}

/// Broadcast a per-batch conditioning row `[1, D]` across `N` query points,
/// gated by an attention net evaluated on the point encoding.
///
/// Returns the gated `[N, D]` signal and the raw `[N, D]` gate. `bounded`
/// passes the gate through a sigmoid first.
fn broadcast_gate(
    enc_x: &Tensor,
    signal: &Tensor,
    att: &Mlp,
    bounded: bool,
) -> candle_core::Result<(Tensor, Tensor)> {
    let gate = att.forward(enc_x)?;
    let gate = if bounded {
        nn::ops::sigmoid(&gate)?
    } else {
        gate
    };
    let gated = gate.broadcast_mul(signal)?;
    Ok((gated, gate))
}

fn broadcast_rows(t: &Tensor, n: usize) -> candle_core::Result<Tensor> {
    t.repeat((n, 1))
}

/// Output of [`NeRFNetwork::density`].
#[derive(Debug)]
pub struct DensityOutput {
    /// Non-negative volume density, `[N]`.
    pub sigma: Tensor,
    /// Geometric latent consumed by the color head, `[N, geo_feat_dim]`.
    pub geo_feat: Tensor,
    /// L2 norm of the raw audio channel gate, `[N, 1]`.
    pub ambient_aud: Tensor,
    /// Eye attention gate, `[N, 1]`; `None` outside full conditioning.
    pub ambient_eye: Option<Tensor>,
}

/// Output of [`NeRFNetwork::forward`].
#[derive(Debug)]
pub struct RadianceOutput {
    pub sigma: Tensor,
    /// RGB in `[-ε, 1+ε]`, `[N, 3]`.
    pub color: Tensor,
    pub ambient_aud: Tensor,
    pub ambient_eye: Option<Tensor>,
    /// Per-point uncertainty, `[N, 1]`; zeros in testing mode.
    pub uncertainty: Tensor,
}

/// Output of [`NeRFNetwork::forward_torso`].
#[derive(Debug)]
pub struct TorsoOutput {
    pub alpha: Tensor,
    pub color: Tensor,
    /// Predicted 2D displacement, `[N, 2]`.
    pub dx: Tensor,
}

/// One optimizer parameter group with its learning rate and weight decay.
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub name: String,
    pub vars: Vec<Var>,
    pub lr: f64,
    pub weight_decay: f64,
}

/// Eye/index/lip conditioning heads, built only with `exp_eye`.
#[derive(Debug, Clone)]
struct EyeConditioning {
    eye_att_net: Mlp,
    audio_index_att_net: Mlp,
    lip_att_net: Mlp,
    lip_encoder: LipEncoder,
}

/// Torso deformation + color sub-network, built only in torso mode.
#[derive(Debug, Clone)]
struct TorsoNetwork {
    anchor_points: Var,
    deform_encoder: FrequencyEncoder,
    anchor_encoder: FrequencyEncoder,
    encoder: GridEncoder2d,
    deform_net: Mlp,
    net: Mlp,
    individual_codes: Option<Var>,
}

/// Per-frame camera pose refinement offsets (translation / axis-angle).
#[derive(Debug, Clone)]
struct CameraOffsets {
    dt: Var,
    dr: Var,
}

/// Triplane-hashgrid radiance network with multi-modal gated conditioning.
#[derive(Debug, Clone)]
pub struct NeRFNetwork {
    cfg: NeRFConfig,

    // audio path
    audio_embedding: Option<nn::Embedding>,
    audio_net: AudioNet,
    audio_att_net: Option<AudioAttNet>,

    // spatial encoders
    encoder_xy: GridEncoder2d,
    encoder_yz: GridEncoder2d,
    encoder_xz: GridEncoder2d,
    encoder_dir: SphereEncoder,

    // heads
    sigma_net: Mlp,
    color_net: Mlp,
    unc_net: Mlp,
    aud_ch_att_net: Mlp,
    eye: Option<EyeConditioning>,
    torso: Option<TorsoNetwork>,

    // identity / camera parameters
    individual_codes: Option<Var>,
    camera_offsets: Option<CameraOffsets>,

    testing: bool,
}

impl NeRFNetwork {
    /// Build the network. `vb` must be rooted at the `VarMap` root so the
    /// prefixes seen by [`Self::get_params`] match construction paths.
    pub fn new(cfg: &NeRFConfig, vb: VarBuilder) -> Result<Self> {
        let dev = vb.device().clone();
        let in_dim = cfg.in_dim();
        let audio_in_dim = cfg.audio_in_dim();

        let audio_embedding = if cfg.audio_embedding {
            Some(nn::embedding(
                audio_in_dim,
                audio_in_dim,
                vb.pp("embedding"),
            )?)
        } else {
            None
        };
        let audio_net = AudioNet::new(
            audio_in_dim,
            cfg.audio_dim,
            cfg.audio_win_size,
            vb.pp("audio_net"),
        )?;
        let audio_att_net = if cfg.audio_attention {
            Some(AudioAttNet::new(
                cfg.audio_dim,
                cfg.audio_smoothing_window,
                vb.pp("audio_att_net"),
            )?)
        } else {
            None
        };

        let plane = cfg.plane_grid();
        let encoder_xy = GridEncoder2d::new(&plane, vb.pp("encoder_xy"))?;
        let encoder_yz = GridEncoder2d::new(&plane, vb.pp("encoder_yz"))?;
        let encoder_xz = GridEncoder2d::new(&plane, vb.pp("encoder_xz"))?;
        let encoder_dir = SphereEncoder::new(4);

        let sigma_net = Mlp::new(
            cfg.sigma_in_dim(),
            1 + cfg.geo_feat_dim,
            cfg.sigma_hidden_dim,
            cfg.sigma_num_layers,
            vb.pp("sigma_net"),
        )?;
        let color_net = Mlp::new(
            cfg.color_in_dim(),
            3,
            cfg.color_hidden_dim,
            cfg.color_num_layers,
            vb.pp("color_net"),
        )?;
        let unc_net = Mlp::new(in_dim, 1, 32, 2, vb.pp("unc_net"))?;
        let aud_ch_att_net = Mlp::new(in_dim, cfg.audio_dim, 64, 2, vb.pp("aud_ch_att_net"))?;

        let eye = if cfg.exp_eye {
            Some(EyeConditioning {
                eye_att_net: Mlp::new(in_dim, 1, 16, 2, vb.pp("eye_att_net"))?,
                audio_index_att_net: Mlp::new(
                    in_dim,
                    cfg.audio_index_dim,
                    16,
                    2,
                    vb.pp("audio_index_att_net"),
                )?,
                lip_att_net: Mlp::new(in_dim, cfg.lip_latent_dim, 32, 2, vb.pp("lip_att_net"))?,
                lip_encoder: LipEncoder::new(
                    cfg.lip_feature_dim,
                    cfg.lip_latent_dim,
                    vb.pp("lip_encoder"),
                )?,
            })
        } else {
            None
        };

        let torso = if cfg.torso {
            let deform_encoder = FrequencyEncoder::new(2, 8);
            let anchor_encoder = FrequencyEncoder::new(6, 3);
            let encoder = GridEncoder2d::new(&cfg.torso_grid(), vb.pp("torso_encoder"))?;
            let cond_dim =
                deform_encoder.output_dim() + anchor_encoder.output_dim() + cfg.individual_dim_torso;
            let deform_net = Mlp::new(cond_dim, 2, 32, 3, vb.pp("torso_deform_net"))?;
            let net = Mlp::new(
                encoder.output_dim() + cond_dim,
                4,
                32,
                3,
                vb.pp("torso_net"),
            )?;
            let individual_codes = if cfg.individual_dim_torso > 0 {
                let init =
                    Tensor::randn(0f32, 0.1, (cfg.individual_num, cfg.individual_dim_torso), &dev)?;
                Some(Var::from_tensor(&init)?)
            } else {
                None
            };
            Some(TorsoNetwork {
                anchor_points: Var::from_tensor(&Tensor::new(&ANCHOR_INIT, &dev)?)?,
                deform_encoder,
                anchor_encoder,
                encoder,
                deform_net,
                net,
                individual_codes,
            })
        } else {
            None
        };

        let individual_codes = if cfg.individual_dim > 0 {
            let init = Tensor::randn(0f32, 0.1, (cfg.individual_num, cfg.individual_dim), &dev)?;
            Some(Var::from_tensor(&init)?)
        } else {
            None
        };
        let camera_offsets = if cfg.train_camera && cfg.num_training_frames > 0 {
            Some(CameraOffsets {
                dt: Var::zeros((cfg.num_training_frames, 3), vb.dtype(), &dev)?,
                dr: Var::zeros((cfg.num_training_frames, 3), vb.dtype(), &dev)?,
            })
        } else {
            None
        };

        tracing::debug!(
            in_dim,
            sigma_in = cfg.sigma_in_dim(),
            torso = cfg.torso,
            exp_eye = cfg.exp_eye,
            "built NeRFNetwork"
        );

        Ok(Self {
            cfg: cfg.clone(),
            audio_embedding,
            audio_net,
            audio_att_net,
            encoder_xy,
            encoder_yz,
            encoder_xz,
            encoder_dir,
            sigma_net,
            color_net,
            unc_net,
            aud_ch_att_net,
            eye,
            torso,
            individual_codes,
            camera_offsets,
            testing: false,
        })
    }

    /// Toggle testing mode (uncertainty becomes identically zero).
    pub fn set_testing(&mut self, testing: bool) {
        self.testing = testing;
    }

    /// Per-identity latent code table, if the model carries one.
    pub fn individual_codes(&self) -> Option<&Var> {
        self.individual_codes.as_ref()
    }

    /// Triplane encoding of `x: [N, 3]` in `[-bound, bound]^3`.
    ///
    /// Fixed projection and concatenation order: `[x,y] → xy`, `[y,z] → yz`,
    /// `[x,z] → xz`. Output `[N, 3 * plane_dim]`.
    pub fn encode_x(&self, x: &Tensor, bound: f64) -> Result<Tensor> {
        let xy = x.narrow(1, 0, 2)?;
        let yz = x.narrow(1, 1, 2)?;
        let xz = Tensor::cat(&[&x.narrow(1, 0, 1)?, &x.narrow(1, 2, 1)?], 1)?;
        let feat_xy = self.encoder_xy.forward(&xy, bound)?;
        let feat_yz = self.encoder_yz.forward(&yz, bound)?;
        let feat_xz = self.encoder_xz.forward(&xz, bound)?;
        Ok(Tensor::cat(&[&feat_xy, &feat_yz, &feat_xz], 1)?)
    }

    /// Compress a raw audio feature window into an embedding.
    ///
    /// `None` in means no audio conditioning is available: `None` out.
    /// With attention enabled the input carries 8 consecutive windows
    /// `[8, dim_in, 16]` pooled to `[1, audio_dim]`; otherwise each window
    /// maps to its own embedding row.
    pub fn encode_audio(&self, a: Option<&Tensor>) -> Result<Option<Tensor>> {
        let Some(a) = a else { return Ok(None) };

        let a = match &self.audio_embedding {
            // [B, 16] token ids → [B, dim_in, 16]
            Some(emb) => emb.forward(a)?.transpose(1, 2)?.contiguous()?,
            None => a.clone(),
        };
        let enc_a = self.audio_net.forward(&a)?;
        let enc_a = match &self.audio_att_net {
            Some(att) => att.forward(&enc_a.unsqueeze(0)?)?,
            None => enc_a,
        };
        Ok(Some(enc_a))
    }

    /// Density and geometric latent for query points.
    ///
    /// Mode A (`e == None`): the audio embedding is gated by a raw per-point
    /// channel attention and fused with the point encoding. Mode B (`e`
    /// present, requires the `exp_eye` capability): the eye scalar, audio
    /// index and lip latent are each gated by their own sigmoid-bounded
    /// attention and concatenated as well.
    pub fn density(
        &self,
        x: &Tensor,
        enc_a: &Tensor,
        aud_index: Option<&Tensor>,
        e: Option<&Tensor>,
        enc_x: Option<&Tensor>,
        pre_lip: Option<&Tensor>,
    ) -> Result<DensityOutput> {
        let enc_x = match enc_x {
            Some(t) => t.clone(),
            None => self.encode_x(x, self.cfg.bound)?,
        };

        let (enc_w, aud_gate) = broadcast_gate(&enc_x, enc_a, &self.aud_ch_att_net, false)?;
        let ambient_aud = aud_gate.sqr()?.sum_keepdim(1)?.sqrt()?;

        let (h, ambient_eye) = match e {
            Some(e) => {
                let eye = self.eye.as_ref().ok_or_else(|| {
                    Error::Config("eye signal passed to a model built without exp_eye".into())
                })?;
                let aud_index = aud_index.ok_or_else(|| {
                    Error::Config("full conditioning requires an audio index".into())
                })?;
                let pre_lip = pre_lip.ok_or_else(|| {
                    Error::Config("full conditioning requires a lip feature".into())
                })?;

                let (e_gated, eye_gate) = broadcast_gate(&enc_x, e, &eye.eye_att_net, true)?;
                let (idx_gated, _) =
                    broadcast_gate(&enc_x, aud_index, &eye.audio_index_att_net, true)?;
                let lip_latent = eye.lip_encoder.forward(pre_lip)?;
                let (lip_gated, _) = broadcast_gate(&enc_x, &lip_latent, &eye.lip_att_net, true)?;

                (
                    Tensor::cat(&[&enc_x, &enc_w, &idx_gated, &e_gated, &lip_gated], 1)?,
                    Some(eye_gate),
                )
            }
            None => (Tensor::cat(&[&enc_x, &enc_w], 1)?, None),
        };

        let h = self.sigma_net.forward(&h)?;
        let sigma = h.narrow(1, 0, 1)?.squeeze(1)?.exp()?;
        let geo_feat = h.narrow(1, 1, self.cfg.geo_feat_dim)?;

        Ok(DensityOutput {
            sigma,
            geo_feat,
            ambient_aud,
            ambient_eye,
        })
    }

    /// Zeros in testing mode or with the uncertainty loss disabled, otherwise
    /// `softplus(unc_net(enc_x))` on a gradient-detached point encoding so the
    /// uncertainty head never backpropagates into the geometry encoders.
    pub fn predict_uncertainty(&self, enc_x: &Tensor) -> Result<Tensor> {
        let n = enc_x.dim(0)?;
        if self.testing || !self.cfg.uncertainty_loss {
            return Ok(Tensor::zeros((n, 1), enc_x.dtype(), enc_x.device())?);
        }
        let raw = self.unc_net.forward(&enc_x.detach())?;
        Ok(softplus(&raw)?)
    }

    /// Full head forward pass: density, then view-dependent color and
    /// uncertainty.
    ///
    /// - `x`: `[N, 3]` points in `[-bound, bound]^3`
    /// - `d`: `[N, 3]` unit view directions
    /// - `enc_a`: `[1, audio_dim]` audio embedding
    /// - `c`: `[1, individual_dim]` identity code, required iff the model was
    ///   built with `individual_dim > 0`
    pub fn forward(
        &self,
        x: &Tensor,
        d: &Tensor,
        enc_a: &Tensor,
        aud_index: Option<&Tensor>,
        c: Option<&Tensor>,
        e: Option<&Tensor>,
        pre_lip: Option<&Tensor>,
    ) -> Result<RadianceOutput> {
        let n = x.dim(0)?;
        let enc_x = self.encode_x(x, self.cfg.bound)?;
        let dens = self.density(x, enc_a, aud_index, e, Some(&enc_x), pre_lip)?;

        let enc_d = self.encoder_dir.forward(d)?;
        let h = match c {
            Some(c) => Tensor::cat(&[&enc_d, &dens.geo_feat, &broadcast_rows(c, n)?], 1)?,
            None => Tensor::cat(&[&enc_d, &dens.geo_feat], 1)?,
        };
        let color = clamped_sigmoid(&self.color_net.forward(&h)?)?;
        let uncertainty = self.predict_uncertainty(&enc_x)?;

        Ok(RadianceOutput {
            sigma: dens.sigma,
            color,
            ambient_aud: dens.ambient_aud,
            ambient_eye: dens.ambient_eye,
            uncertainty,
        })
    }

    /// Torso deformation + color pipeline.
    ///
    /// - `x`: `[N, 2]` points in `[-1, 1]^2`
    /// - `poses`: `[1, 4, 4]` rigid head pose
    /// - `c`: `[1, individual_dim_torso]` identity code
    pub fn forward_torso(
        &self,
        x: &Tensor,
        poses: &Tensor,
        c: Option<&Tensor>,
    ) -> Result<TorsoOutput> {
        let torso = self.torso.as_ref().ok_or_else(|| {
            Error::Config("forward_torso on a model built without the torso network".into())
        })?;
        let n = x.dim(0)?;
        let x = (x * self.cfg.torso_shrink)?;

        // Rigid inverse of the head pose: [Rᵀ, -Rᵀt; 0 0 0 1].
        let pose = poses.squeeze(0)?;
        let rot = pose.narrow(0, 0, 3)?.narrow(1, 0, 3)?;
        let trans = pose.narrow(0, 0, 3)?.narrow(1, 3, 1)?.contiguous()?;
        let rot_inv = rot.t()?.contiguous()?;
        let t_inv = rot_inv.matmul(&trans)?.neg()?;
        let top = Tensor::cat(&[&rot_inv, &t_inv], 1)?;
        let bottom = Tensor::new(&[[0f32, 0.0, 0.0, 1.0]], x.device())?;
        let inv_pose = Tensor::cat(&[&top, &bottom], 0)?;

        // Anchor points into the posed frame, then perspective divide.
        let wrapped = torso
            .anchor_points
            .as_tensor()
            .matmul(&inv_pose.t()?.contiguous()?)?; // [3, 4]
        let anchor_w = wrapped.narrow(1, 3, 1)?;
        let anchor_z = wrapped.narrow(1, 2, 1)?;
        let anchor_proj = wrapped
            .narrow(1, 0, 2)?
            .broadcast_div(&anchor_w)?
            .broadcast_div(&anchor_z)?
            .reshape((1, 6))?;

        let enc_px = torso.deform_encoder.forward(&x)?;
        let enc_anchor = broadcast_rows(&torso.anchor_encoder.forward(&anchor_proj)?, n)?;
        let h = match c {
            Some(c) => Tensor::cat(&[&enc_px, &enc_anchor, &broadcast_rows(c, n)?], 1)?,
            None => Tensor::cat(&[&enc_px, &enc_anchor], 1)?,
        };

        let dx = torso.deform_net.forward(&h)?;
        let deformed = (&x + &dx)?.clamp(-1.0, 1.0)?;
        let enc_t = torso.encoder.forward(&deformed, 1.0)?;

        let h = torso.net.forward(&Tensor::cat(&[&enc_t, &h], 1)?)?;
        let alpha = clamped_sigmoid(&h.narrow(1, 0, 1)?)?;
        let color = clamped_sigmoid(&h.narrow(1, 1, 3)?)?;

        Ok(TorsoOutput { alpha, color, dx })
    }

    /// Assemble optimizer parameter groups.
    ///
    /// Torso mode trains only the torso sub-network (grid at `lr`, nets and
    /// anchors at `lr_net`); full-head mode trains the audio path, triplane
    /// encoders and heads, plus the optional attention/embedding/identity/
    /// camera groups. `vars` must be the `VarMap` the network was built from.
    pub fn get_params(&self, vars: &VarMap, lr: f64, lr_net: f64, wd: f64) -> Vec<ParamGroup> {
        let group = |name: &str, lr: f64, wd: f64| ParamGroup {
            name: name.to_string(),
            vars: vars_with_prefix(vars, name),
            lr,
            weight_decay: wd,
        };

        if let Some(torso) = &self.torso {
            let mut params = vec![
                group("torso_encoder", lr, 0.0),
                group("torso_deform_net", lr_net, wd),
                group("torso_net", lr_net, wd),
                ParamGroup {
                    name: "anchor_points".to_string(),
                    vars: vec![torso.anchor_points.clone()],
                    lr: lr_net,
                    weight_decay: wd,
                },
            ];
            if let Some(codes) = &torso.individual_codes {
                params.push(ParamGroup {
                    name: "individual_codes_torso".to_string(),
                    vars: vec![codes.clone()],
                    lr: lr_net,
                    weight_decay: wd,
                });
            }
            return params;
        }

        let mut params = vec![
            group("audio_net", lr_net, wd),
            group("encoder_xy", lr, 0.0),
            group("encoder_yz", lr, 0.0),
            group("encoder_xz", lr, 0.0),
            group("sigma_net", lr_net, wd),
            group("color_net", lr_net, wd),
        ];
        if self.audio_att_net.is_some() {
            params.push(group("audio_att_net", lr_net * 5.0, 1e-4));
        }
        if self.audio_embedding.is_some() {
            params.push(group("embedding", lr, 0.0));
        }
        if let Some(codes) = &self.individual_codes {
            params.push(ParamGroup {
                name: "individual_codes".to_string(),
                vars: vec![codes.clone()],
                lr: lr_net,
                weight_decay: wd,
            });
        }
        if let Some(cam) = &self.camera_offsets {
            params.push(ParamGroup {
                name: "camera_dt".to_string(),
                vars: vec![cam.dt.clone()],
                lr: 1e-5,
                weight_decay: 0.0,
            });
            params.push(ParamGroup {
                name: "camera_dr".to_string(),
                vars: vec![cam.dr.clone()],
                lr: 1e-5,
                weight_decay: 0.0,
            });
        }
        params.push(group("aud_ch_att_net", lr_net, wd));
        params.push(group("unc_net", lr_net, wd));
        if self.eye.is_some() {
            params.push(group("eye_att_net", lr_net, wd));
            params.push(group("audio_index_att_net", lr_net, wd));
            params.push(group("lip_att_net", lr_net, wd));
            params.push(group("lip_encoder", lr_net, wd));
        }
        params
    }
}

/// All `VarMap` entries under `prefix`, sorted by name for stable ordering.
fn vars_with_prefix(vars: &VarMap, prefix: &str) -> Vec<Var> {
    let data = vars.data().lock().unwrap();
    let mut named: Vec<(String, Var)> = data
        .iter()
        .filter(|(name, _)| {
            name.as_str() == prefix || name.starts_with(&format!("{prefix}."))
        })
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    named.into_iter().map(|(_, var)| var).collect()
}
