//! Operator convolutions and their residual forms

use super::{operator_blocks, GraphNorm};
use crate::primitives::{check_for_nan, mean_with_padding, relu, uniform_var, NodeMask};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor, Var};

/// `√2 / 2`, bound of the uniform initialisation.
pub(crate) const INV_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Graph convolution over stacked operators.
///
/// ```text
/// spread = [x, mean(x), x·op_1, …, x·op_k]     (batch, in·(k+2), nodes)
/// out    = W · spread + b                       (batch, out, nodes)
/// ```
///
/// `mean(x)` is the per-graph mean over valid nodes, repeated on every node.
/// With `ops = None` only the first two blocks are used and `k` must be 0.
pub struct GraphOpConv {
    in_fm: usize,
    out_fm: usize,
    nb_op: usize,
    /// `(1, out_fm, in_fm * (nb_op + 2))`
    weight: Var,
    /// `(1, out_fm, 1)`
    bias: Var,
}

impl GraphOpConv {
    pub fn new(in_fm: usize, out_fm: usize, nb_op: usize, device: &Device) -> Result<Self> {
        let weight = uniform_var(
            -INV_SQRT2,
            INV_SQRT2,
            &[1, out_fm, in_fm * (nb_op + 2)],
            device,
        )?;
        let bias = uniform_var(-INV_SQRT2, INV_SQRT2, &[1, out_fm, 1], device)?;
        Ok(Self {
            in_fm,
            out_fm,
            nb_op,
            weight,
            bias,
        })
    }

    /// Build from explicit parameters: `weight (1, out, in * (nb_op + 2))`
    /// and `bias (1, out, 1)`.
    pub fn from_tensors(weight: &Tensor, bias: &Tensor, nb_op: usize) -> Result<Self> {
        let (_, out_fm, width) = weight.dims3()?;
        if width % (nb_op + 2) != 0 || bias.dims() != [1, out_fm, 1] {
            return Err(GnnError::Shape(format!(
                "weight {:?} / bias {:?} do not describe a {}-operator convolution",
                weight.dims(),
                bias.dims(),
                nb_op
            )));
        }
        Ok(Self {
            in_fm: width / (nb_op + 2),
            out_fm,
            nb_op,
            weight: Var::from_tensor(weight)?,
            bias: Var::from_tensor(bias)?,
        })
    }

    pub fn out_fm(&self) -> usize {
        self.out_fm
    }

    pub fn forward(&self, ops: Option<&Tensor>, emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
        let (b, in_fm, n) = emb.dims3()?;
        if in_fm != self.in_fm {
            return Err(GnnError::Shape(format!(
                "GraphOpConv expects {} feature maps, got {}",
                self.in_fm, in_fm
            )));
        }

        let avg = mean_with_padding(emb, mask)?
            .unsqueeze(2)?
            .broadcast_as((b, in_fm, n))?;

        let mut spread = vec![emb.clone(), avg];
        match ops {
            None if self.nb_op != 0 => {
                return Err(GnnError::Shape(format!(
                    "GraphOpConv built for {} operators got none",
                    self.nb_op
                )));
            }
            None => {}
            Some(ops) => {
                let blocks = operator_blocks(ops, emb)?;
                if blocks != self.nb_op {
                    return Err(GnnError::Shape(format!(
                        "GraphOpConv built for {} operators got {}",
                        self.nb_op, blocks
                    )));
                }
                let spread_ops = emb
                    .contiguous()?
                    .matmul(&ops.contiguous()?)
                    .map_err(|e| GnnError::Tensor(format!("gconv spread failed: {}", e)))?;
                for k in 0..blocks {
                    spread.push(spread_ops.narrow(2, k * n, n)?);
                }
            }
        }
        let spread = Tensor::cat(&spread, 1)?.contiguous()?;

        self.weight
            .as_tensor()
            .broadcast_matmul(&spread)
            .and_then(|t| t.broadcast_add(self.bias.as_tensor()))
            .map_err(|e| GnnError::Tensor(format!("gconv affine failed: {}", e)))
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

fn half_width(out_fm: usize) -> Result<usize> {
    if out_fm % 2 != 0 {
        return Err(GnnError::Config(format!(
            "residual convolution needs an even number of output feature maps, got {}",
            out_fm
        )));
    }
    Ok(out_fm / 2)
}

/// Residual graph convolution: `[gc(x) || relu(gc'(x))]`.
pub struct ResGOpConv {
    lin: GraphOpConv,
    nlin: GraphOpConv,
}

impl ResGOpConv {
    pub fn new(in_fm: usize, out_fm: usize, nb_op: usize, device: &Device) -> Result<Self> {
        let half = half_width(out_fm)?;
        Ok(Self {
            lin: GraphOpConv::new(in_fm, half, nb_op, device)?,
            nlin: GraphOpConv::new(in_fm, half, nb_op, device)?,
        })
    }

    pub fn out_fm(&self) -> usize {
        self.lin.out_fm() + self.nlin.out_fm()
    }

    /// Fails with `NumericalDivergence` if either branch or the output holds
    /// a NaN.
    pub fn forward(&self, ops: Option<&Tensor>, emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
        let linear = self.lin.forward(ops, emb, mask)?;
        check_for_nan(&linear, "resgconv: linear")?;

        let nlinear = self.nlin.forward(ops, emb, mask)?;
        check_for_nan(&nlinear, "resgconv: nlinear")?;
        let nlinear = relu(&nlinear)?;

        let out = Tensor::cat(&[&linear, &nlinear], 1)?;
        check_for_nan(&out, "resgconv: output")?;
        Ok(out)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.lin.trainable_vars();
        vars.extend(self.nlin.trainable_vars());
        vars
    }
}

/// Residual graph convolution with a [`GraphNorm`] on each branch:
/// `[gn(gc(x)) || relu(gn'(gc'(x)))]`.
pub struct ResGOpConvNorm {
    lin: GraphOpConv,
    nlin: GraphOpConv,
    gn_lin: GraphNorm,
    gn_nlin: GraphNorm,
}

impl ResGOpConvNorm {
    pub fn new(in_fm: usize, out_fm: usize, nb_op: usize, device: &Device) -> Result<Self> {
        let half = half_width(out_fm)?;
        Ok(Self {
            lin: GraphOpConv::new(in_fm, half, nb_op, device)?,
            nlin: GraphOpConv::new(in_fm, half, nb_op, device)?,
            gn_lin: GraphNorm::new(half, device)?,
            gn_nlin: GraphNorm::new(half, device)?,
        })
    }

    pub fn out_fm(&self) -> usize {
        self.lin.out_fm() + self.nlin.out_fm()
    }

    pub fn forward(&self, ops: Option<&Tensor>, emb: &Tensor, mask: &NodeMask) -> Result<Tensor> {
        let linear = self.gn_lin.forward(&self.lin.forward(ops, emb, mask)?)?;
        check_for_nan(&linear, "resgconv_sn: linear")?;

        let nlinear = self.gn_nlin.forward(&self.nlin.forward(ops, emb, mask)?)?;
        check_for_nan(&nlinear, "resgconv_sn: nlinear")?;
        let nlinear = relu(&nlinear)?;

        let out = Tensor::cat(&[&linear, &nlinear], 1)?;
        check_for_nan(&out, "resgconv_sn: output")?;
        Ok(out)
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.lin.trainable_vars();
        vars.extend(self.nlin.trainable_vars());
        vars.extend(self.gn_lin.trainable_vars());
        vars.extend(self.gn_nlin.trainable_vars());
        vars
    }
}
