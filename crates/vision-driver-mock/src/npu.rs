//! Simulated accelerator runtime, networks and output decoder.
//!
//! The runtime writes a handful of synthetic detections into the bound
//! output tensor on every run, using the little wire format below, which
//! [`MockPostprocessor`] decodes:
//!
//! ```text
//! u32 count | count × { f32 x, f32 y, f32 w, f32 h, f32 confidence, u32 class }
//! ```
//!
//! All fields little endian.

use crate::fault::FaultInjector;
use crate::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;
use vision_hal::{
    network_key, BufferInfo, Detection, DmaBuffer, HalError, HalErrorKind, NetworkInstance,
    NpuRuntime, PostprocessKind, Postprocessor,
};

const HEADER_LEN: usize = 4;
const RECORD_LEN: usize = 24;

/// Output tensor size able to carry `max_detections` records.
#[must_use]
pub const fn detection_tensor_len(max_detections: usize) -> usize {
    HEADER_LEN + max_detections * RECORD_LEN
}

/// Writes `detections` into `out`, truncating to what fits. Returns the
/// number of records written.
pub fn encode_detections(detections: &[Detection], out: &mut [u8]) -> usize {
    if out.len() < HEADER_LEN {
        return 0;
    }
    let fit = ((out.len() - HEADER_LEN) / RECORD_LEN).min(detections.len());
    out[..HEADER_LEN].copy_from_slice(&(fit as u32).to_le_bytes());
    for (i, d) in detections.iter().take(fit).enumerate() {
        let rec = &mut out[HEADER_LEN + i * RECORD_LEN..HEADER_LEN + (i + 1) * RECORD_LEN];
        let fields = [d.x_center, d.y_center, d.width, d.height, d.confidence];
        for (j, v) in fields.iter().enumerate() {
            rec[j * 4..j * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        rec[20..24].copy_from_slice(&d.class_index.to_le_bytes());
    }
    fit
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
}

fn read_f32(bytes: &[u8], at: usize) -> Option<f32> {
    read_u32(bytes, at).map(f32::from_bits)
}

/// Parses the format written by [`encode_detections`].
pub fn decode_detections(bytes: &[u8]) -> Result<Vec<Detection>, HalError> {
    let malformed = || HalError::new("postprocess", HalErrorKind::Transfer, "truncated output tensor");
    let count = read_u32(bytes, 0).ok_or_else(malformed)? as usize;
    (0..count)
        .map(|i| {
            let at = HEADER_LEN + i * RECORD_LEN;
            Ok(Detection {
                x_center: read_f32(bytes, at).ok_or_else(malformed)?,
                y_center: read_f32(bytes, at + 4).ok_or_else(malformed)?,
                width: read_f32(bytes, at + 8).ok_or_else(malformed)?,
                height: read_f32(bytes, at + 12).ok_or_else(malformed)?,
                confidence: read_f32(bytes, at + 16).ok_or_else(malformed)?,
                class_index: read_u32(bytes, at + 20).ok_or_else(malformed)?,
            })
        })
        .collect()
}

// =============================================================================
// Network
// =============================================================================

/// Compiled model stand-in with configurable descriptor tables.
#[derive(Debug, Clone)]
pub struct MockNetwork {
    name: Option<String>,
    inputs: Vec<BufferInfo>,
    outputs: Vec<BufferInfo>,
}

impl MockNetwork {
    /// Network with explicit descriptor tables.
    pub fn new(name: Option<&str>, inputs: Vec<BufferInfo>, outputs: Vec<BufferInfo>) -> Self {
        Self {
            name: name.map(str::to_owned),
            inputs,
            outputs,
        }
    }

    /// Single user input of `input_len` bytes and single user output of
    /// `output_len` bytes.
    pub fn detector(name: &str, input_len: usize, output_len: usize) -> Self {
        Self::new(
            Some(name),
            vec![BufferInfo::user("input_0", input_len)],
            vec![BufferInfo::user("output_0", output_len)],
        )
    }
}

impl NetworkInstance for MockNetwork {
    fn network_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn input_buffers(&self) -> &[BufferInfo] {
        &self.inputs
    }

    fn output_buffers(&self) -> &[BufferInfo] {
        &self.outputs
    }
}

// =============================================================================
// Runtime
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Binding {
    input: Option<(DmaBuffer, usize)>,
    output: Option<(DmaBuffer, usize)>,
}

/// Accelerator runtime that fakes inference.
pub struct MockNpuRuntime {
    bindings: Mutex<HashMap<usize, Binding>>,
    rng: MockRng,
    inference_time: Duration,
    max_detections: usize,
    runtime_inits: AtomicUsize,
    network_inits: AtomicUsize,
    runs: AtomicUsize,
    bind_faults: FaultInjector,
    run_faults: FaultInjector,
}

impl MockNpuRuntime {
    /// Instant runtime with a fixed seed.
    pub fn new() -> Self {
        Self::with_timing(Duration::ZERO, Some(7))
    }

    /// Runtime that takes `inference_time` per run; `seed` fixes the
    /// synthetic detections.
    pub fn with_timing(inference_time: Duration, seed: Option<u64>) -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            rng: MockRng::new(seed),
            inference_time,
            max_detections: 3,
            runtime_inits: AtomicUsize::new(0),
            network_inits: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            bind_faults: FaultInjector::new("npu", "set_user_buffer"),
            run_faults: FaultInjector::new("npu", "run"),
        }
    }

    /// Calls to `init_runtime`.
    pub fn runtime_inits(&self) -> usize {
        self.runtime_inits.load(Ordering::SeqCst)
    }

    /// Calls to `init_network`, over every network.
    pub fn network_inits(&self) -> usize {
        self.network_inits.load(Ordering::SeqCst)
    }

    /// Completed inference runs.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Makes every buffer binding fail.
    pub fn fail_bindings(&self, fail: bool) {
        self.bind_faults.set(fail);
    }

    /// Makes every run fail.
    pub fn fail_runs(&self, fail: bool) {
        self.run_faults.set(fail);
    }

    /// Input currently bound to `network`.
    pub fn bound_input(&self, network: &dyn NetworkInstance) -> Option<(DmaBuffer, usize)> {
        self.bindings
            .lock()
            .get(&network_key(network))
            .and_then(|b| b.input)
    }

    fn synthetic_detections(&self) -> Vec<Detection> {
        let count = self.rng.gen_range(0..=self.max_detections);
        (0..count)
            .map(|_| Detection {
                x_center: self.rng.gen_range(0.2..0.8),
                y_center: self.rng.gen_range(0.2..0.8),
                width: self.rng.gen_range(0.05..0.3),
                height: self.rng.gen_range(0.05..0.3),
                confidence: self.rng.gen_range(0.5..1.0),
                class_index: 0,
            })
            .collect()
    }
}

impl Default for MockNpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl NpuRuntime for MockNpuRuntime {
    fn init_runtime(&self) {
        self.runtime_inits.fetch_add(1, Ordering::SeqCst);
    }

    fn init_network(&self, network: &dyn NetworkInstance) {
        self.network_inits.fetch_add(1, Ordering::SeqCst);
        self.bindings
            .lock()
            .entry(network_key(network))
            .or_default();
        debug!(network = network.network_name().unwrap_or("?"), "network initialized");
    }

    fn set_user_input(
        &self,
        network: &dyn NetworkInstance,
        index: usize,
        buf: DmaBuffer,
        len: usize,
    ) -> Result<(), HalError> {
        self.bind_faults.check()?;
        if index != 0 {
            return Err(HalError::new(
                "npu",
                HalErrorKind::InvalidParameter,
                format!("input index {index} out of range"),
            ));
        }
        self.bindings
            .lock()
            .entry(network_key(network))
            .or_default()
            .input = Some((buf, len));
        Ok(())
    }

    fn set_user_output(
        &self,
        network: &dyn NetworkInstance,
        index: usize,
        buf: DmaBuffer,
        len: usize,
    ) -> Result<(), HalError> {
        self.bind_faults.check()?;
        if index != 0 {
            return Err(HalError::new(
                "npu",
                HalErrorKind::InvalidParameter,
                format!("output index {index} out of range"),
            ));
        }
        self.bindings
            .lock()
            .entry(network_key(network))
            .or_default()
            .output = Some((buf, len));
        Ok(())
    }

    fn run(&self, network: &dyn NetworkInstance) -> Result<(), HalError> {
        self.run_faults.check()?;
        let binding = self
            .bindings
            .lock()
            .get(&network_key(network))
            .copied()
            .unwrap_or_default();
        let (Some(_), Some((out, out_len))) = (binding.input, binding.output) else {
            return Err(HalError::new(
                "npu",
                HalErrorKind::NotReady,
                "run without bound input and output",
            ));
        };

        if !self.inference_time.is_zero() {
            thread::sleep(self.inference_time);
        }
        let detections = self.synthetic_detections();
        // SAFETY: the caller owns the output buffer for the duration of run().
        let bytes = unsafe { out.as_mut_slice() };
        let len = out_len.min(bytes.len());
        encode_detections(&detections, &mut bytes[..len]);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Postprocessor
// =============================================================================

/// Decoder for the synthetic output format.
#[derive(Debug, Clone)]
pub struct MockPostprocessor {
    kind: PostprocessKind,
    runs: usize,
}

impl MockPostprocessor {
    /// Decoder reporting itself as `kind`.
    pub fn new(kind: PostprocessKind) -> Self {
        Self { kind, runs: 0 }
    }

    /// Decoded tensors so far.
    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl Postprocessor for MockPostprocessor {
    fn kind(&self) -> PostprocessKind {
        self.kind
    }

    fn run(&mut self, output: &[u8]) -> Result<Vec<Detection>, HalError> {
        self.runs += 1;
        decode_detections(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, conf: f32) -> Detection {
        Detection {
            x_center: x,
            y_center: 0.5,
            width: 0.1,
            height: 0.2,
            confidence: conf,
            class_index: 3,
        }
    }

    #[test]
    fn detections_survive_the_wire_format() {
        let dets = vec![det(0.25, 0.9), det(0.75, 0.6)];
        let mut out = vec![0u8; detection_tensor_len(4)];
        assert_eq!(encode_detections(&dets, &mut out), 2);

        let mut pp = MockPostprocessor::new(PostprocessKind::YoloV2);
        assert_eq!(pp.run(&out).unwrap(), dets);
        assert_eq!(pp.runs(), 1);
    }

    #[test]
    fn encoding_truncates_to_tensor_size() {
        let dets = vec![det(0.1, 0.9); 5];
        let mut out = vec![0u8; detection_tensor_len(2) + 3];
        assert_eq!(encode_detections(&dets, &mut out), 2);
        assert_eq!(decode_detections(&out).unwrap().len(), 2);
    }

    #[test]
    fn truncated_tensor_is_an_error() {
        let mut out = vec![0u8; detection_tensor_len(1)];
        encode_detections(&[det(0.5, 0.5)], &mut out);
        assert!(decode_detections(&out[..10]).is_err());
        assert!(decode_detections(&[]).is_err());
    }

    #[test]
    fn run_writes_detections_into_bound_output() {
        let runtime = MockNpuRuntime::new();
        let net = MockNetwork::detector("det", 16, detection_tensor_len(3));
        let input = DmaBuffer::alloc(16).unwrap();
        let output = DmaBuffer::alloc(detection_tensor_len(3)).unwrap();

        assert!(runtime.run(&net).is_err());

        runtime.init_network(&net);
        runtime.set_user_input(&net, 0, input, 16).unwrap();
        runtime
            .set_user_output(&net, 0, output, output.len())
            .unwrap();
        runtime.run(&net).unwrap();

        let dets = decode_detections(unsafe { output.as_slice() }).unwrap();
        assert!(dets.len() <= 3);
        assert!(dets.iter().all(|d| (0.0..=1.0).contains(&d.x_center)));
        assert_eq!(runtime.runs(), 1);
        assert_eq!(runtime.bound_input(&net), Some((input, 16)));
    }

    #[test]
    fn binding_index_is_checked() {
        let runtime = MockNpuRuntime::new();
        let net = MockNetwork::detector("det", 16, 16);
        let buf = DmaBuffer::alloc(16).unwrap();
        assert!(runtime.set_user_input(&net, 1, buf, 16).is_err());
        runtime.fail_bindings(true);
        assert!(runtime.set_user_output(&net, 0, buf, 16).is_err());
    }
}
