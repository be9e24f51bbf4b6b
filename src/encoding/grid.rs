//! Multi-level 2D grid encoder with hashed or tiled tables.
//!
//! Each level owns a learned feature table and a square lattice at a
//! geometrically growing resolution. A query point is bilinearly interpolated
//! from the 4 surrounding lattice corners. Coarse levels whose full lattice
//! fits in the table are addressed densely (tiled); finer levels fall back to
//! the instant-ngp XOR hash.
//!
//! Interpolation weights stay on the autodiff graph, so gradients reach both
//! the feature tables and the query coordinates (the torso deformation relies
//! on the latter). Corner indices are integral and computed off-graph.

use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::config::GridConfig;

const HASH_PRIME: u32 = 2_654_435_761;

fn corner_hash(i: u32, j: u32, table_size: u32) -> u32 {
    (i ^ j.wrapping_mul(HASH_PRIME)) % table_size
}

/// One resolution level: lattice size plus its (possibly hashed) table rows.
#[derive(Debug, Clone, Copy)]
struct Level {
    resolution: usize,
    rows: usize,
}

impl Level {
    /// Dense row-major index when the lattice fits the table, XOR hash otherwise.
    fn index(&self, i: u32, j: u32) -> u32 {
        if self.rows == self.resolution * self.resolution {
            i * self.resolution as u32 + j
        } else {
            corner_hash(i, j, self.rows as u32)
        }
    }
}

/// Multi-level 2D hash/tiled grid encoder.
#[derive(Debug, Clone)]
pub struct GridEncoder2d {
    tables: Vec<Tensor>,
    levels: Vec<Level>,
    level_dim: usize,
}

impl GridEncoder2d {
    pub fn new(cfg: &GridConfig, vb: VarBuilder) -> Result<Self> {
        let table_size = 1usize << cfg.log2_hashmap_size;
        // Geometric growth from base to desired resolution.
        let growth = if cfg.num_levels > 1 {
            ((cfg.desired_resolution as f64).ln() - (cfg.base_resolution as f64).ln())
                / (cfg.num_levels - 1) as f64
        } else {
            0.0
        };

        let mut levels = Vec::with_capacity(cfg.num_levels);
        let mut tables = Vec::with_capacity(cfg.num_levels);
        for l in 0..cfg.num_levels {
            let resolution =
                ((cfg.base_resolution as f64) * (growth * l as f64).exp()).floor() as usize;
            let resolution = resolution.max(2);
            let rows = (resolution * resolution).min(table_size);
            let table = vb.get_with_hints(
                (rows, cfg.level_dim),
                &format!("level{l}"),
                Init::Uniform {
                    lo: -1e-4,
                    up: 1e-4,
                },
            )?;
            levels.push(Level { resolution, rows });
            tables.push(table);
        }

        Ok(Self {
            tables,
            levels,
            level_dim: cfg.level_dim,
        })
    }

    /// Encoded feature width: `num_levels * level_dim`.
    pub fn output_dim(&self) -> usize {
        self.levels.len() * self.level_dim
    }

    /// Encode `x: [N, 2]` in `[-bound, bound]^2` to `[N, num_levels * level_dim]`.
    pub fn forward(&self, x: &Tensor, bound: f64) -> Result<Tensor> {
        let (n, _) = x.dims2()?;
        let dev = x.device();

        // Normalize to [0, 1]; out-of-range points snap to the boundary cell.
        let x01 = ((x + bound)? * (0.5 / bound))?.clamp(0.0, 1.0)?;

        let mut features = Vec::with_capacity(self.levels.len());
        for (level, table) in self.levels.iter().zip(self.tables.iter()) {
            let scale = (level.resolution - 1) as f64;
            let pos = (&x01 * scale)?; // [N, 2] in [0, R-1]

            // Corner cells from a host-side snapshot; indices carry no gradient.
            let pos_host = pos.to_vec2::<f32>()?;
            let top = (level.resolution - 2) as f32;
            let mut base = Vec::with_capacity(2 * n);
            let mut idx00 = Vec::with_capacity(n);
            let mut idx10 = Vec::with_capacity(n);
            let mut idx01 = Vec::with_capacity(n);
            let mut idx11 = Vec::with_capacity(n);
            for p in &pos_host {
                let i0 = p[0].floor().clamp(0.0, top);
                let j0 = p[1].floor().clamp(0.0, top);
                base.push(i0);
                base.push(j0);
                let (i0, j0) = (i0 as u32, j0 as u32);
                idx00.push(level.index(i0, j0));
                idx10.push(level.index(i0 + 1, j0));
                idx01.push(level.index(i0, j0 + 1));
                idx11.push(level.index(i0 + 1, j0 + 1));
            }

            let base = Tensor::from_vec(base, (n, 2), dev)?;
            let w = (pos - base)?.clamp(0.0, 1.0)?; // [N, 2]
            let wx = w.narrow(1, 0, 1)?;
            let wy = w.narrow(1, 1, 1)?;
            let ux = wx.affine(-1.0, 1.0)?; // 1 - wx
            let uy = wy.affine(-1.0, 1.0)?;

            let gather = |idx: Vec<u32>| -> Result<Tensor> {
                let idx = Tensor::from_vec(idx, n, dev)?;
                table.index_select(&idx, 0)
            };
            let f00 = gather(idx00)?;
            let f10 = gather(idx10)?;
            let f01 = gather(idx01)?;
            let f11 = gather(idx11)?;

            let feat = (f00.broadcast_mul(&(&ux * &uy)?)?
                + f10.broadcast_mul(&(&wx * &uy)?)?)?;
            let feat = (feat + f01.broadcast_mul(&(&ux * &wy)?)?)?;
            let feat = (feat + f11.broadcast_mul(&(&wx * &wy)?)?)?;
            features.push(feat);
        }

        Tensor::cat(&features, 1)
    }
}
