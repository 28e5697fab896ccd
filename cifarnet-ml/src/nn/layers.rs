//! Trainable and structural layers: convolution, pooling, flatten, dense and
//! dropout, each with an explicit backward pass.
//!
//! Image tensors are channels-last (`[n, height, width, channels]`).
//! Convolutions use stride 1 and no padding; pooling windows do not overlap
//! and drop any trailing row/column that does not fill a window.

use crate::error::MlError;
use crate::nn::activation::Activation;
use crate::nn::tensor::Tensor;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// A trainable parameter buffer and its accumulated gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Vec<f32>,
    #[serde(skip)]
    pub grad: Vec<f32>,
}

impl Param {
    pub fn new(value: Vec<f32>) -> Self {
        let grad = vec![0.0; value.len()];
        Self { value, grad }
    }

    /// Glorot-uniform initialization.
    fn glorot(len: usize, fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let value = (0..len).map(|_| rng.gen_range(-limit..limit)).collect();
        Self::new(value)
    }

    pub fn zero_grad(&mut self) {
        self.grad.clear();
        self.grad.resize(self.value.len(), 0.0);
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    fn ensure_grad(&mut self) {
        if self.grad.len() != self.value.len() {
            self.zero_grad();
        }
    }
}

/// Values saved by a training-mode forward pass for use in `backward`.
#[derive(Debug, Clone)]
struct ActivationCache {
    input: Tensor,
    z: Vec<f32>,
    a: Vec<f32>,
}

fn image_dims(shape: &[usize], layer: &str) -> Result<(usize, usize, usize), MlError> {
    match shape {
        [h, w, c] => Ok((*h, *w, *c)),
        other => Err(MlError::shape(format!(
            "{layer} expects (height, width, channels) samples, got {other:?}"
        ))),
    }
}

fn missing_cache(layer: &str) -> MlError {
    MlError::training(format!("{layer}: backward called without a training forward pass"))
}

fn check_grad_shape(grad: &Tensor, expected: &[usize], layer: &str) -> Result<(), MlError> {
    if grad.shape() != expected {
        return Err(MlError::shape(format!(
            "{layer}: gradient shape {:?} does not match output shape {expected:?}",
            grad.shape()
        )));
    }
    Ok(())
}

/// 2-D convolution, stride 1, valid padding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub in_channels: usize,
    pub activation: Activation,
    /// Layout `[kernel_h, kernel_w, in_channels, filters]`.
    pub kernel: Param,
    pub bias: Param,
    #[serde(skip)]
    cache: Option<ActivationCache>,
}

impl Conv2d {
    pub fn new(
        in_channels: usize,
        filters: usize,
        kernel_size: (usize, usize),
        activation: Activation,
        rng: &mut StdRng,
    ) -> Self {
        let (kh, kw) = kernel_size;
        let kernel = Param::glorot(
            kh * kw * in_channels * filters,
            kh * kw * in_channels,
            kh * kw * filters,
            rng,
        );
        Self {
            filters,
            kernel_size,
            in_channels,
            activation,
            kernel,
            bias: Param::new(vec![0.0; filters]),
            cache: None,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>, MlError> {
        let (h, w, c) = image_dims(input, "Conv2d")?;
        let (kh, kw) = self.kernel_size;
        if c != self.in_channels {
            return Err(MlError::shape(format!(
                "Conv2d expects {} input channels, got {c}",
                self.in_channels
            )));
        }
        if h < kh || w < kw {
            return Err(MlError::shape(format!(
                "Conv2d kernel {kh}x{kw} does not fit a {h}x{w} input"
            )));
        }
        Ok(vec![h - kh + 1, w - kw + 1, self.filters])
    }

    fn pre_activation(&self, input: &Tensor) -> Result<Tensor, MlError> {
        let out_sample = self.output_shape(input.sample_shape())?;
        let (h, w, c) = image_dims(input.sample_shape(), "Conv2d")?;
        let (oh, ow, f) = (out_sample[0], out_sample[1], self.filters);
        let (kh, kw) = self.kernel_size;
        let n = input.batch_len();
        let x = input.data();
        let kernel = &self.kernel.value;

        let mut z = vec![0.0f32; n * oh * ow * f];
        for b in 0..n {
            let xb = &x[b * h * w * c..(b + 1) * h * w * c];
            for oy in 0..oh {
                for ox in 0..ow {
                    let o = ((b * oh + oy) * ow + ox) * f;
                    let out = &mut z[o..o + f];
                    out.copy_from_slice(&self.bias.value);
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let px = ((oy + ky) * w + ox + kx) * c;
                            for ic in 0..c {
                                let v = xb[px + ic];
                                let kr = ((ky * kw + kx) * c + ic) * f;
                                for (acc, &wv) in out.iter_mut().zip(&kernel[kr..kr + f]) {
                                    *acc += v * wv;
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut shape = vec![n];
        shape.extend(out_sample);
        Tensor::new(shape, z)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, MlError> {
        let cache = self.cache.take().ok_or_else(|| missing_cache("Conv2d"))?;
        let (h, w, c) = image_dims(cache.input.sample_shape(), "Conv2d")?;
        let n = cache.input.batch_len();
        let out_sample = self.output_shape(cache.input.sample_shape())?;
        let (oh, ow, f) = (out_sample[0], out_sample[1], self.filters);
        check_grad_shape(grad, &[n, oh, ow, f], "Conv2d")?;
        let (kh, kw) = self.kernel_size;

        let mut gz = vec![0.0f32; grad.len()];
        self.activation
            .backward(&cache.z, &cache.a, grad.data(), &mut gz, f);

        self.kernel.ensure_grad();
        self.bias.ensure_grad();
        let Param {
            value: kernel,
            grad: kernel_grad,
        } = &mut self.kernel;
        let bias_grad = &mut self.bias.grad;
        let x = cache.input.data();
        let mut dx = vec![0.0f32; x.len()];

        for b in 0..n {
            let base = b * h * w * c;
            for oy in 0..oh {
                for ox in 0..ow {
                    let o = ((b * oh + oy) * ow + ox) * f;
                    let g = &gz[o..o + f];
                    for (db, &gv) in bias_grad.iter_mut().zip(g) {
                        *db += gv;
                    }
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let px = base + ((oy + ky) * w + ox + kx) * c;
                            for ic in 0..c {
                                let xi = px + ic;
                                let v = x[xi];
                                let kr = ((ky * kw + kx) * c + ic) * f;
                                let mut acc = 0.0;
                                for j in 0..f {
                                    kernel_grad[kr + j] += v * g[j];
                                    acc += kernel[kr + j] * g[j];
                                }
                                dx[xi] += acc;
                            }
                        }
                    }
                }
            }
        }

        Tensor::new(cache.input.shape().to_vec(), dx)
    }
}

/// Non-overlapping max pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub pool_size: (usize, usize),
    #[serde(skip)]
    cache: Option<(Vec<usize>, Vec<usize>)>,
}

impl MaxPool2d {
    pub fn new(pool_size: (usize, usize)) -> Self {
        Self {
            pool_size,
            cache: None,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>, MlError> {
        let (h, w, c) = image_dims(input, "MaxPool2d")?;
        let (ph, pw) = self.pool_size;
        if ph == 0 || pw == 0 || h < ph || w < pw {
            return Err(MlError::shape(format!(
                "MaxPool2d window {ph}x{pw} does not fit a {h}x{w} input"
            )));
        }
        Ok(vec![h / ph, w / pw, c])
    }

    /// Pooled output plus, for every output value, the flat input index it came from.
    fn pool(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>), MlError> {
        let out_sample = self.output_shape(input.sample_shape())?;
        let (h, w, c) = image_dims(input.sample_shape(), "MaxPool2d")?;
        let (oh, ow) = (out_sample[0], out_sample[1]);
        let (ph, pw) = self.pool_size;
        let n = input.batch_len();
        let x = input.data();

        let mut out = vec![0.0f32; n * oh * ow * c];
        let mut argmax = vec![0usize; out.len()];
        for b in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let mut best_idx = ((b * h + oy * ph) * w + ox * pw) * c + ch;
                        for dy in 0..ph {
                            for dx in 0..pw {
                                let idx = ((b * h + oy * ph + dy) * w + ox * pw + dx) * c + ch;
                                if x[idx] > x[best_idx] {
                                    best_idx = idx;
                                }
                            }
                        }
                        let o = ((b * oh + oy) * ow + ox) * c + ch;
                        out[o] = x[best_idx];
                        argmax[o] = best_idx;
                    }
                }
            }
        }

        let mut shape = vec![n];
        shape.extend(out_sample);
        Ok((Tensor::new(shape, out)?, argmax))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, MlError> {
        let (input_shape, argmax) = self.cache.take().ok_or_else(|| missing_cache("MaxPool2d"))?;
        if grad.len() != argmax.len() {
            return Err(MlError::shape(format!(
                "MaxPool2d: gradient has {} values, expected {}",
                grad.len(),
                argmax.len()
            )));
        }
        let mut dx = Tensor::zeros(input_shape);
        let d = dx.data_mut();
        for (&src, &g) in argmax.iter().zip(grad.data()) {
            d[src] += g;
        }
        Ok(dx)
    }
}

/// Collapses each sample into a vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flatten {
    #[serde(skip)]
    cache: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>, MlError> {
        if input.is_empty() {
            return Err(MlError::shape("Flatten needs a non-scalar sample shape"));
        }
        Ok(vec![input.iter().product()])
    }

    fn flatten(input: &Tensor) -> Result<Tensor, MlError> {
        input
            .clone()
            .reshape(vec![input.batch_len(), input.sample_len()])
    }
}

/// Fully connected layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub units: usize,
    pub in_features: usize,
    pub activation: Activation,
    /// Layout `[in_features, units]`.
    pub kernel: Param,
    pub bias: Param,
    #[serde(skip)]
    cache: Option<ActivationCache>,
}

impl Dense {
    pub fn new(in_features: usize, units: usize, activation: Activation, rng: &mut StdRng) -> Self {
        Self {
            units,
            in_features,
            activation,
            kernel: Param::glorot(in_features * units, in_features, units, rng),
            bias: Param::new(vec![0.0; units]),
            cache: None,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>, MlError> {
        match input {
            [features] if *features == self.in_features => Ok(vec![self.units]),
            other => Err(MlError::shape(format!(
                "Dense expects samples of shape [{}], got {other:?}",
                self.in_features
            ))),
        }
    }

    fn pre_activation(&self, input: &Tensor) -> Result<Tensor, MlError> {
        self.output_shape(input.sample_shape())?;
        let n = input.batch_len();
        let units = self.units;
        let kernel = &self.kernel.value;
        let mut z = vec![0.0f32; n * units];
        for b in 0..n {
            let row = &mut z[b * units..(b + 1) * units];
            row.copy_from_slice(&self.bias.value);
            for (i, &v) in input.sample(b).iter().enumerate() {
                for (acc, &wv) in row.iter_mut().zip(&kernel[i * units..(i + 1) * units]) {
                    *acc += v * wv;
                }
            }
        }
        Tensor::new(vec![n, units], z)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, MlError> {
        let cache = self.cache.take().ok_or_else(|| missing_cache("Dense"))?;
        let n = cache.input.batch_len();
        let (fin, units) = (self.in_features, self.units);
        check_grad_shape(grad, &[n, units], "Dense")?;

        let mut gz = vec![0.0f32; grad.len()];
        self.activation
            .backward(&cache.z, &cache.a, grad.data(), &mut gz, units);

        self.kernel.ensure_grad();
        self.bias.ensure_grad();
        let Param {
            value: kernel,
            grad: kernel_grad,
        } = &mut self.kernel;
        let mut dx = vec![0.0f32; n * fin];
        for b in 0..n {
            let g = &gz[b * units..(b + 1) * units];
            for (db, &gv) in self.bias.grad.iter_mut().zip(g) {
                *db += gv;
            }
            let x = cache.input.sample(b);
            for i in 0..fin {
                let row = i * units;
                let mut acc = 0.0;
                for j in 0..units {
                    kernel_grad[row + j] += x[i] * g[j];
                    acc += kernel[row + j] * g[j];
                }
                dx[b * fin + i] = acc;
            }
        }
        Tensor::new(cache.input.shape().to_vec(), dx)
    }
}

/// Inverted dropout: zeroes `rate` of the values during training and scales
/// the survivors by `1 / (1 - rate)`; identity at inference time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f32,
    #[serde(skip)]
    cache: Option<Vec<f32>>,
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self, MlError> {
        if !(rate > 0.0 && rate < 1.0) {
            return Err(MlError::config(format!(
                "dropout rate must lie in (0, 1), got {rate}"
            )));
        }
        Ok(Self { rate, cache: None })
    }
}

/// One stage of a [`Sequential`](crate::nn::model::Sequential) model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
    Dense(Dense),
    Dropout(Dropout),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conv2d(_) => "Conv2D",
            Self::MaxPool2d(_) => "MaxPooling2D",
            Self::Flatten(_) => "Flatten",
            Self::Dense(_) => "Dense",
            Self::Dropout(_) => "Dropout",
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>, MlError> {
        match self {
            Self::Conv2d(l) => l.output_shape(input),
            Self::MaxPool2d(l) => l.output_shape(input),
            Self::Flatten(l) => l.output_shape(input),
            Self::Dense(l) => l.output_shape(input),
            Self::Dropout(_) => Ok(input.to_vec()),
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Self::Conv2d(l) => l.kernel.len() + l.bias.len(),
            Self::Dense(l) => l.kernel.len() + l.bias.len(),
            _ => 0,
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        match self {
            Self::Conv2d(l) => vec![&mut l.kernel, &mut l.bias],
            Self::Dense(l) => vec![&mut l.kernel, &mut l.bias],
            _ => Vec::new(),
        }
    }

    /// Inference pass: no caching, dropout disabled.
    pub fn infer(&self, input: &Tensor) -> Result<Tensor, MlError> {
        match self {
            Self::Conv2d(l) => {
                let z = l.pre_activation(input)?;
                activate(l.activation, &z, l.filters)
            }
            Self::Dense(l) => {
                let z = l.pre_activation(input)?;
                activate(l.activation, &z, l.units)
            }
            Self::MaxPool2d(l) => Ok(l.pool(input)?.0),
            Self::Flatten(_) => Flatten::flatten(input),
            Self::Dropout(_) => Ok(input.clone()),
        }
    }

    /// Training pass: caches what `backward` needs and samples dropout masks.
    pub fn forward_train(&mut self, input: &Tensor, rng: &mut StdRng) -> Result<Tensor, MlError> {
        match self {
            Self::Conv2d(l) => {
                let z = l.pre_activation(input)?;
                let a = activate(l.activation, &z, l.filters)?;
                l.cache = Some(ActivationCache {
                    input: input.clone(),
                    z: z.into_data(),
                    a: a.data().to_vec(),
                });
                Ok(a)
            }
            Self::Dense(l) => {
                let z = l.pre_activation(input)?;
                let a = activate(l.activation, &z, l.units)?;
                l.cache = Some(ActivationCache {
                    input: input.clone(),
                    z: z.into_data(),
                    a: a.data().to_vec(),
                });
                Ok(a)
            }
            Self::MaxPool2d(l) => {
                let (out, argmax) = l.pool(input)?;
                l.cache = Some((input.shape().to_vec(), argmax));
                Ok(out)
            }
            Self::Flatten(l) => {
                l.cache = Some(input.shape().to_vec());
                Flatten::flatten(input)
            }
            Self::Dropout(l) => {
                let keep = 1.0 - l.rate;
                let mask: Vec<f32> = (0..input.len())
                    .map(|_| {
                        if rng.r#gen::<f32>() < l.rate {
                            0.0
                        } else {
                            1.0 / keep
                        }
                    })
                    .collect();
                let data = input.data().iter().zip(&mask).map(|(v, m)| v * m).collect();
                l.cache = Some(mask);
                Tensor::new(input.shape().to_vec(), data)
            }
        }
    }

    /// Propagates `grad` (w.r.t. this layer's output) back to its input,
    /// accumulating parameter gradients along the way.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor, MlError> {
        match self {
            Self::Conv2d(l) => l.backward(grad),
            Self::Dense(l) => l.backward(grad),
            Self::MaxPool2d(l) => l.backward(grad),
            Self::Flatten(l) => {
                let shape = l.cache.take().ok_or_else(|| missing_cache("Flatten"))?;
                grad.clone().reshape(shape)
            }
            Self::Dropout(l) => {
                let mask = l.cache.take().ok_or_else(|| missing_cache("Dropout"))?;
                if mask.len() != grad.len() {
                    return Err(MlError::shape("Dropout: gradient does not match mask"));
                }
                let data = grad.data().iter().zip(&mask).map(|(g, m)| g * m).collect();
                Tensor::new(grad.shape().to_vec(), data)
            }
        }
    }
}

fn activate(activation: Activation, z: &Tensor, width: usize) -> Result<Tensor, MlError> {
    let mut out = vec![0.0f32; z.len()];
    activation.apply(z.data(), &mut out, width);
    Tensor::new(z.shape().to_vec(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Scalar objective `sum(output * upstream)` used for gradient checks.
    fn objective(layer: &Layer, input: &Tensor, upstream: &[f32]) -> f32 {
        let out = layer.infer(input).unwrap();
        out.data().iter().zip(upstream).map(|(o, p)| o * p).sum()
    }

    fn random_tensor(shape: Vec<usize>, rng: &mut StdRng) -> Tensor {
        let len = shape.iter().product();
        Tensor::new(shape, (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()).unwrap()
    }

    fn check_input_gradient(mut layer: Layer, input: Tensor, rng: &mut StdRng) {
        let out = layer.forward_train(&input, rng).unwrap();
        let upstream: Vec<f32> = (0..out.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let grad_out = Tensor::new(out.shape().to_vec(), upstream.clone()).unwrap();
        let grad_in = layer.backward(&grad_out).unwrap();
        assert_eq!(grad_in.shape(), input.shape());

        let eps = 1e-2;
        for i in (0..input.len()).step_by(7) {
            let mut plus = input.clone();
            plus.data_mut()[i] += eps;
            let mut minus = input.clone();
            minus.data_mut()[i] -= eps;
            let numeric =
                (objective(&layer, &plus, &upstream) - objective(&layer, &minus, &upstream)) / (2.0 * eps);
            let analytic = grad_in.data()[i];
            assert!(
                (numeric - analytic).abs() < 1e-2 * (1.0 + analytic.abs()),
                "{} input grad {i}: numeric {numeric} vs analytic {analytic}",
                layer.kind()
            );
        }
    }

    #[test]
    fn test_conv_output_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let conv = Conv2d::new(3, 16, (3, 3), Activation::Relu, &mut rng);
        assert_eq!(conv.output_shape(&[32, 32, 3]).unwrap(), vec![30, 30, 16]);
        assert!(conv.output_shape(&[32, 32, 1]).is_err());
        assert!(conv.output_shape(&[2, 2, 3]).is_err());
    }

    #[test]
    fn test_pool_output_shape_floors() {
        let pool = MaxPool2d::new((2, 2));
        assert_eq!(pool.output_shape(&[13, 13, 32]).unwrap(), vec![6, 6, 32]);
    }

    #[test]
    fn test_conv_input_gradient() {
        let mut rng = StdRng::seed_from_u64(7);
        let conv = Conv2d::new(2, 3, (3, 3), Activation::Tanh, &mut rng);
        let input = random_tensor(vec![2, 5, 5, 2], &mut rng);
        check_input_gradient(Layer::Conv2d(conv), input, &mut rng);
    }

    #[test]
    fn test_dense_input_gradient() {
        let mut rng = StdRng::seed_from_u64(11);
        let dense = Dense::new(6, 4, Activation::Sigmoid, &mut rng);
        let input = random_tensor(vec![3, 6], &mut rng);
        check_input_gradient(Layer::Dense(dense), input, &mut rng);
    }

    #[test]
    fn test_dense_kernel_gradient() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Layer::Dense(Dense::new(4, 3, Activation::Tanh, &mut rng));
        let input = random_tensor(vec![2, 4], &mut rng);
        let out = layer.forward_train(&input, &mut rng).unwrap();
        let upstream: Vec<f32> = (0..out.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        layer
            .backward(&Tensor::new(out.shape().to_vec(), upstream.clone()).unwrap())
            .unwrap();

        let analytic = match &layer {
            Layer::Dense(d) => d.kernel.grad.clone(),
            _ => unreachable!(),
        };
        let eps = 1e-2;
        for i in 0..analytic.len() {
            let mut plus = layer.clone();
            let mut minus = layer.clone();
            if let (Layer::Dense(p), Layer::Dense(m)) = (&mut plus, &mut minus) {
                p.kernel.value[i] += eps;
                m.kernel.value[i] -= eps;
            }
            let numeric =
                (objective(&plus, &input, &upstream) - objective(&minus, &input, &upstream)) / (2.0 * eps);
            assert!((numeric - analytic[i]).abs() < 1e-2 * (1.0 + analytic[i].abs()));
        }
    }

    #[test]
    fn test_maxpool_routes_gradient_to_max() {
        let input = Tensor::new(vec![1, 2, 2, 1], vec![0.1, 0.7, 0.3, 0.2]).unwrap();
        let mut layer = Layer::MaxPool2d(MaxPool2d::new((2, 2)));
        let mut rng = StdRng::seed_from_u64(0);
        let out = layer.forward_train(&input, &mut rng).unwrap();
        assert_eq!(out.data(), &[0.7]);
        let grad = layer
            .backward(&Tensor::new(vec![1, 1, 1, 1], vec![2.0]).unwrap())
            .unwrap();
        assert_eq!(grad.data(), &[0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dropout_is_identity_at_inference() {
        let layer = Layer::Dropout(Dropout::new(0.5).unwrap());
        let input = Tensor::new(vec![1, 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(layer.infer(&input).unwrap(), input);
    }

    #[test]
    fn test_dropout_training_mask_scales_survivors() {
        let mut layer = Layer::Dropout(Dropout::new(0.25).unwrap());
        let mut rng = StdRng::seed_from_u64(3);
        let input = Tensor::new(vec![1, 400], vec![1.0; 400]).unwrap();
        let out = layer.forward_train(&input, &mut rng).unwrap();
        let zeros = out.data().iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 50 && zeros < 150, "dropped {zeros} of 400");
        for &v in out.data() {
            assert!(v == 0.0 || (v - 1.0 / 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dropout_rejects_invalid_rate() {
        assert!(Dropout::new(0.0).is_err());
        assert!(Dropout::new(1.0).is_err());
    }

    #[test]
    fn test_backward_without_forward_errors() {
        let mut layer = Layer::Flatten(Flatten::new());
        let grad = Tensor::zeros(vec![1, 4]);
        assert!(matches!(layer.backward(&grad), Err(MlError::Training(_))));
    }
}
