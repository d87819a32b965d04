//! Burn record codec for model and optimizer state.
//!
//! Records are written with `BinBytesRecorder` at full precision. The byte
//! format does not depend on the backend, so a policy trained on
//! `Autodiff<B>` can be decoded straight into an inference module on `B`.
//!
//! Burn panics on truncated bytes and on records that do not fit the
//! template. Decoding catches those panics and reports them as
//! [`StoreError::Codec`], so a corrupt store entry triggers a reload instead
//! of killing the thread.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::error::StoreError;

type Codec = BinBytesRecorder<FullPrecisionSettings>;

fn codec_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Codec(e.to_string())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a decode step, turning a burn panic into a codec error.
fn guarded<T>(what: &str, decode: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
    catch_unwind(AssertUnwindSafe(decode)).unwrap_or_else(|payload| {
        let msg = panic_message(payload);
        log::warn!("{what} decode failed: {msg}");
        Err(StoreError::Codec(format!("{what}: {msg}")))
    })
}

/// Serialize a module's parameters.
pub fn encode_module<B: Backend, M: Module<B>>(module: &M) -> Result<Vec<u8>, StoreError> {
    Recorder::<B>::record(&Codec::default(), module.clone().into_record(), ()).map_err(codec_err)
}

/// Load parameters into `template`, which fixes the architecture.
pub fn decode_module<B: Backend, M: Module<B>>(
    template: M,
    bytes: &[u8],
    device: &B::Device,
) -> Result<M, StoreError> {
    guarded("module", || {
        let record: M::Record =
            Recorder::<B>::load(&Codec::default(), bytes.to_vec(), device).map_err(codec_err)?;
        Ok(template.load_record(record))
    })
}

/// Serialize optimizer state (e.g. Adam moments).
pub fn encode_optimizer<B, M, O>(optimizer: &O) -> Result<Vec<u8>, StoreError>
where
    B: AutodiffBackend,
    M: burn::module::AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    Recorder::<B>::record(&Codec::default(), optimizer.to_record(), ()).map_err(codec_err)
}

/// Restore optimizer state into `optimizer`.
pub fn decode_optimizer<B, M, O>(
    optimizer: O,
    bytes: &[u8],
    device: &B::Device,
) -> Result<O, StoreError>
where
    B: AutodiffBackend,
    M: burn::module::AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    guarded("optimizer", || {
        let record: O::Record =
            Recorder::<B>::load(&Codec::default(), bytes.to_vec(), device).map_err(codec_err)?;
        Ok(optimizer.load_record(record))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{
        rows_tensor, to_vec, GaussianPolicy, MlpPolicy, MlpPolicyConfig, MlpValue, MlpValueConfig,
        ValueFunction,
    };
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::{AdamConfig, GradientsParams};

    type Inner = NdArray<f32>;
    type TestBackend = Autodiff<Inner>;

    #[test]
    fn test_module_round_trip_across_backends() {
        let device = Default::default();
        let config = MlpPolicyConfig::new(3, 2).with_hidden(vec![8]);
        let trained: MlpPolicy<TestBackend> = config.init(&device);

        let bytes = encode_module(&trained).unwrap();
        let restored: MlpPolicy<Inner> = decode_module(config.init(&device), &bytes, &device).unwrap();

        let obs = [0.3, -0.2, 0.9];
        let expected = to_vec(trained.forward(rows_tensor(&obs, 1, 3, &device)).mean);
        let actual = to_vec(restored.forward(rows_tensor(&obs, 1, 3, &device)).mean);
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let device = Default::default();
        let template: MlpValue<Inner> = MlpValueConfig::new(3).init(&device);
        let err = decode_module(template, &[1, 2, 3], &device).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_truncated_record_fails() {
        let device = Default::default();
        let config = MlpValueConfig::new(3).with_hidden(vec![8]);
        let value: MlpValue<Inner> = config.init(&device);
        let bytes = encode_module(&value).unwrap();

        let err = decode_module(config.init::<Inner>(&device), &bytes[..bytes.len() / 2], &device).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_architecture_mismatch_fails() {
        let device = Default::default();
        let deep: MlpValue<Inner> = MlpValueConfig::new(3).with_hidden(vec![8, 8]).init(&device);
        let bytes = encode_module(&deep).unwrap();

        let shallow: MlpValue<Inner> = MlpValueConfig::new(3).with_hidden(vec![8]).init(&device);
        let err = decode_module(shallow, &bytes, &device).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_garbage_optimizer_state_fails() {
        type Value = MlpValue<TestBackend>;
        let device = Default::default();
        let optimizer = AdamConfig::new().init::<TestBackend, Value>();
        let result = decode_optimizer::<TestBackend, Value, _>(optimizer, &[9, 9, 9, 9], &device);
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }

    #[test]
    fn test_optimizer_round_trip() {
        type Value = MlpValue<TestBackend>;
        let device = Default::default();
        let obs = [1.0, 2.0];
        let grads_for = |value: &Value| {
            let loss = value.forward(rows_tensor(&obs, 1, 2, &device)).powf_scalar(2.0).mean();
            GradientsParams::from_grads(loss.backward(), value)
        };

        let value: Value = MlpValueConfig::new(2).with_hidden(vec![4]).init(&device);
        let mut optimizer = AdamConfig::new().init::<TestBackend, Value>();
        let grads = grads_for(&value);
        let value = optimizer.step(1e-2, value, grads);

        let bytes = encode_optimizer::<TestBackend, Value, _>(&optimizer).unwrap();
        let fresh = AdamConfig::new().init::<TestBackend, Value>();
        let mut restored = decode_optimizer::<TestBackend, Value, _>(fresh, &bytes, &device).unwrap();

        // Same moments, same gradients: the second step must match.
        let a = optimizer.step(1e-2, value.clone(), grads_for(&value));
        let b = restored.step(1e-2, value.clone(), grads_for(&value));
        let out_a = to_vec(a.forward(rows_tensor(&obs, 1, 2, &device)));
        let out_b = to_vec(b.forward(rows_tensor(&obs, 1, 2, &device)));
        assert!((out_a[0] - out_b[0]).abs() < 1e-6);
    }
}
