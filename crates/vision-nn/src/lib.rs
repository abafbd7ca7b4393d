//! Model registry multiplexing several networks over one accelerator runtime.
//!
//! Several compiled models can be registered against a single [`NpuRuntime`]
//! and a single pair of I/O buffers. At most one model is active at a time;
//! per-model runtime initialization happens lazily the first time a model is
//! selected, and exactly once.
//!
//! # Buffer sizing
//!
//! Registration scans each model's input and output descriptor tables for the
//! first user-allocated tensor. Its size is recorded and folded into the
//! registry-wide maxima ([`ModelRegistry::max_input_size`] /
//! [`ModelRegistry::max_output_size`]), which the application uses to size
//! the shared I/O buffers. Models with more than one user tensor per
//! direction are accepted but only their first tensor is bound; a warning is
//! logged at registration.
//!
//! # Concurrency
//!
//! All mutation goes through `&mut self`. Registration happens during
//! single-threaded setup, after which the registry is moved into the task
//! that runs inference, so there is no shared mutable access to guard.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = ModelRegistry::new(runtime);
//! registry.init();
//! let handle = registry.register(ModelConfig::new(&network, PostprocessKind::YoloV2))?;
//! registry.select(handle)?;
//! registry.prepare_io(input, input.len(), output, output.len())?;
//! registry.run_active()?;
//! ```

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use vision_hal::{BufferInfo, DmaBuffer, HalError, NetworkInstance, NpuRuntime, PostprocessKind};

/// Maximum number of models a registry holds.
pub const MAX_MODELS: usize = 4;

const UNNAMED: &str = "unnamed";

/// Errors returned by [`ModelRegistry`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NnServiceError {
    /// The runtime has not been initialized, or no model is active.
    #[error("nn service not initialized")]
    NotInitialized,

    /// A handle, config or buffer length was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// All [`MAX_MODELS`] slots are taken.
    #[error("model registry full ({max} models)", max = MAX_MODELS)]
    RegistryFull,

    /// The model exposes no user-allocated tensor in one direction.
    #[error("model '{model}' has no user-allocated {direction} buffer")]
    NoUserBuffers {
        /// Resolved model name.
        model: String,
        /// `"input"` or `"output"`.
        direction: &'static str,
    },

    /// The runtime refused a binding or failed an inference run.
    #[error("{operation} failed: {source}")]
    Io {
        /// What was being attempted.
        operation: &'static str,
        /// Underlying runtime error.
        #[source]
        source: HalError,
    },
}

/// Index of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelHandle(usize);

impl ModelHandle {
    /// Registration order, starting at 0.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration request for one model.
#[derive(Clone, Copy)]
pub struct ModelConfig<'a> {
    /// Display name; falls back to the network's own name.
    pub name: Option<&'a str>,
    /// Compiled model. `None` is rejected at registration.
    pub network: Option<&'a dyn NetworkInstance>,
    /// Decoder for this model's output.
    pub postprocess: PostprocessKind,
}

impl<'a> ModelConfig<'a> {
    /// Config for `network` without an explicit name.
    pub fn new(network: &'a dyn NetworkInstance, postprocess: PostprocessKind) -> Self {
        Self {
            name: None,
            network: Some(network),
            postprocess,
        }
    }

    /// Sets an explicit name.
    #[must_use]
    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// One registered model.
pub struct ModelRecord<'a> {
    handle: ModelHandle,
    name: String,
    network: &'a dyn NetworkInstance,
    postprocess: PostprocessKind,
    input_size: usize,
    output_size: usize,
    input_count: usize,
    output_count: usize,
    initialized: bool,
}

impl<'a> ModelRecord<'a> {
    /// Handle assigned at registration.
    #[must_use]
    pub fn handle(&self) -> ModelHandle {
        self.handle
    }

    /// Resolved name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compiled model.
    #[must_use]
    pub fn network(&self) -> &'a dyn NetworkInstance {
        self.network
    }

    /// Output decoder tag.
    #[must_use]
    pub fn postprocess(&self) -> PostprocessKind {
        self.postprocess
    }

    /// Bytes of the first user input tensor.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Bytes of the first user output tensor.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Number of user input tensors.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.input_count
    }

    /// Number of user output tensors.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Whether per-model runtime initialization has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl fmt::Debug for ModelRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRecord")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("postprocess", &self.postprocess)
            .field("input_size", &self.input_size)
            .field("output_size", &self.output_size)
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// First user-allocated tensor size and the number of user tensors.
fn user_buffers(table: &[BufferInfo]) -> Option<(usize, usize)> {
    let first = table.iter().find(|b| b.user_allocated)?;
    let count = table.iter().filter(|b| b.user_allocated).count();
    Some((first.len, count))
}

/// Registry of models sharing one accelerator runtime.
pub struct ModelRegistry<'a> {
    runtime: Arc<dyn NpuRuntime>,
    ready: bool,
    models: Vec<ModelRecord<'a>>,
    active: Option<usize>,
    max_input_size: usize,
    max_output_size: usize,
}

impl<'a> ModelRegistry<'a> {
    /// Creates an empty, uninitialized registry over `runtime`.
    pub fn new(runtime: Arc<dyn NpuRuntime>) -> Self {
        Self {
            runtime,
            ready: false,
            models: Vec::with_capacity(MAX_MODELS),
            active: None,
            max_input_size: 0,
            max_output_size: 0,
        }
    }

    /// Brings up the accelerator runtime. Later calls are no-ops.
    pub fn init(&mut self) {
        if self.ready {
            debug!("nn runtime already initialized");
            return;
        }
        self.runtime.init_runtime();
        self.ready = true;
        info!("nn runtime initialized");
    }

    /// Whether [`init`](Self::init) has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Registers a model and returns its handle.
    ///
    /// The first registered model becomes active.
    pub fn register(&mut self, config: ModelConfig<'a>) -> Result<ModelHandle, NnServiceError> {
        if !self.ready {
            return Err(NnServiceError::NotInitialized);
        }
        let network = config.network.ok_or_else(|| {
            NnServiceError::InvalidArgument("model config has no network instance".into())
        })?;
        if self.models.len() >= MAX_MODELS {
            return Err(NnServiceError::RegistryFull);
        }

        let name = config
            .name
            .or_else(|| network.network_name())
            .unwrap_or(UNNAMED)
            .to_string();

        let (input_size, input_count) = user_buffers(network.input_buffers()).ok_or_else(|| {
            NnServiceError::NoUserBuffers {
                model: name.clone(),
                direction: "input",
            }
        })?;
        let (output_size, output_count) =
            user_buffers(network.output_buffers()).ok_or_else(|| NnServiceError::NoUserBuffers {
                model: name.clone(),
                direction: "output",
            })?;

        if input_count > 1 || output_count > 1 {
            warn!(
                model = %name,
                input_count,
                output_count,
                "model has several user buffers per direction; only the first is bound"
            );
        }

        let handle = ModelHandle(self.models.len());
        self.max_input_size = self.max_input_size.max(input_size);
        self.max_output_size = self.max_output_size.max(output_size);

        info!(
            %handle,
            model = %name,
            input_size,
            output_size,
            postprocess = ?config.postprocess,
            "model registered"
        );

        self.models.push(ModelRecord {
            handle,
            name,
            network,
            postprocess: config.postprocess,
            input_size,
            output_size,
            input_count,
            output_count,
            initialized: false,
        });
        if self.active.is_none() {
            self.active = Some(handle.0);
        }
        Ok(handle)
    }

    /// Makes `handle` the active model, initializing it on first selection.
    pub fn select(&mut self, handle: ModelHandle) -> Result<(), NnServiceError> {
        if !self.ready {
            return Err(NnServiceError::NotInitialized);
        }
        let record = self.models.get_mut(handle.0).ok_or_else(|| {
            NnServiceError::InvalidArgument(format!("unknown model handle {handle}"))
        })?;

        if !record.initialized {
            self.runtime.init_network(record.network);
            record.initialized = true;
            info!(%handle, model = %record.name, "model initialized");
        }
        self.active = Some(handle.0);
        Ok(())
    }

    /// Binds the shared I/O buffers into the active model.
    ///
    /// `input_len` / `output_len` are the usable lengths of the buffers and
    /// must cover the active model's tensors.
    pub fn prepare_io(
        &mut self,
        input: DmaBuffer,
        input_len: usize,
        output: DmaBuffer,
        output_len: usize,
    ) -> Result<(), NnServiceError> {
        let active = self.active.ok_or(NnServiceError::NotInitialized)?;
        self.select(ModelHandle(active))?;

        let record = &self.models[active];
        if input_len < record.input_size || input_len > input.len() {
            return Err(NnServiceError::InvalidArgument(format!(
                "input length {input_len} (model needs {}, buffer holds {})",
                record.input_size,
                input.len()
            )));
        }
        if output_len < record.output_size || output_len > output.len() {
            return Err(NnServiceError::InvalidArgument(format!(
                "output length {output_len} (model needs {}, buffer holds {})",
                record.output_size,
                output.len()
            )));
        }

        self.runtime
            .set_user_input(record.network, 0, input, input_len)
            .map_err(|source| NnServiceError::Io {
                operation: "bind input",
                source,
            })?;
        self.runtime
            .set_user_output(record.network, 0, output, output_len)
            .map_err(|source| NnServiceError::Io {
                operation: "bind output",
                source,
            })
    }

    /// Runs one inference on the active model.
    pub fn run_active(&self) -> Result<(), NnServiceError> {
        let record = self.active().ok_or(NnServiceError::NotInitialized)?;
        if !record.initialized {
            return Err(NnServiceError::NotInitialized);
        }
        self.runtime
            .run(record.network)
            .map_err(|source| NnServiceError::Io {
                operation: "inference",
                source,
            })
    }

    /// The active model, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ModelRecord<'a>> {
        self.active.map(|i| &self.models[i])
    }

    /// The model registered under `handle`.
    #[must_use]
    pub fn get(&self, handle: ModelHandle) -> Option<&ModelRecord<'a>> {
        self.models.get(handle.0)
    }

    /// Largest first-user-input size over every registered model.
    #[must_use]
    pub fn max_input_size(&self) -> usize {
        self.max_input_size
    }

    /// Largest first-user-output size over every registered model.
    #[must_use]
    pub fn max_output_size(&self) -> usize {
        self.max_output_size
    }

    /// Number of registered models.
    #[must_use]
    pub fn count(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use vision_driver_mock::{MockNetwork, MockNpuRuntime};

    fn registry<'a>(runtime: &Arc<MockNpuRuntime>) -> ModelRegistry<'a> {
        let mut reg = ModelRegistry::new(runtime.clone());
        reg.init();
        reg
    }

    fn leak(net: MockNetwork) -> &'static MockNetwork {
        Box::leak(Box::new(net))
    }

    #[test]
    fn test_requires_init() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let net = MockNetwork::detector("det", 100, 10);
        let mut reg = ModelRegistry::new(runtime.clone());

        assert_eq!(
            reg.register(ModelConfig::new(&net, PostprocessKind::YoloV2))
                .unwrap_err(),
            NnServiceError::NotInitialized
        );
        assert_eq!(
            reg.select(ModelHandle(0)).unwrap_err(),
            NnServiceError::NotInitialized
        );

        reg.init();
        reg.init();
        assert_eq!(runtime.runtime_inits(), 1);
    }

    #[test]
    fn test_missing_network_is_invalid() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);
        let config = ModelConfig {
            name: Some("ghost"),
            network: None,
            postprocess: PostprocessKind::YoloV2,
        };
        assert!(matches!(
            reg.register(config),
            Err(NnServiceError::InvalidArgument(_))
        ));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_registry_capacity() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);

        for i in 0..MAX_MODELS {
            let net = leak(MockNetwork::detector("det", 100 + i, 10));
            let handle = reg
                .register(ModelConfig::new(net, PostprocessKind::YoloV2))
                .unwrap();
            assert_eq!(handle.index(), i);
        }

        let extra = leak(MockNetwork::detector("extra", 1, 1));
        assert_eq!(
            reg.register(ModelConfig::new(extra, PostprocessKind::YoloV2))
                .unwrap_err(),
            NnServiceError::RegistryFull
        );
        assert_eq!(reg.count(), MAX_MODELS);
        assert_eq!(reg.max_input_size(), 103);
        assert_eq!(reg.active().unwrap().handle().index(), 0);
    }

    #[test]
    fn test_no_user_buffers_leaves_count_unchanged() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);

        let no_input = MockNetwork::new(
            Some("no_in"),
            vec![BufferInfo::internal("in", 64)],
            vec![BufferInfo::user("out", 8)],
        );
        let no_output = MockNetwork::new(Some("no_out"), vec![BufferInfo::user("in", 64)], vec![]);

        assert_eq!(
            reg.register(ModelConfig::new(&no_input, PostprocessKind::YoloV2))
                .unwrap_err(),
            NnServiceError::NoUserBuffers {
                model: "no_in".into(),
                direction: "input"
            }
        );
        assert_eq!(
            reg.register(ModelConfig::new(&no_output, PostprocessKind::YoloV2))
                .unwrap_err(),
            NnServiceError::NoUserBuffers {
                model: "no_out".into(),
                direction: "output"
            }
        );
        assert_eq!(reg.count(), 0);
        assert!(reg.active().is_none());
    }

    #[test]
    fn test_name_fallback() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);

        let named = MockNetwork::detector("yolo_tiny", 10, 10);
        let anonymous = MockNetwork::new(
            None,
            vec![BufferInfo::user("in", 10)],
            vec![BufferInfo::user("out", 10)],
        );

        let a = reg
            .register(ModelConfig::new(&named, PostprocessKind::YoloV2).with_name("person"))
            .unwrap();
        let b = reg
            .register(ModelConfig::new(&named, PostprocessKind::YoloV2))
            .unwrap();
        let c = reg
            .register(ModelConfig::new(&anonymous, PostprocessKind::CenterNet))
            .unwrap();

        assert_eq!(reg.get(a).unwrap().name(), "person");
        assert_eq!(reg.get(b).unwrap().name(), "yolo_tiny");
        assert_eq!(reg.get(c).unwrap().name(), "unnamed");
        assert_eq!(reg.get(c).unwrap().postprocess(), PostprocessKind::CenterNet);
    }

    #[test]
    #[traced_test]
    fn test_multi_buffer_model_is_flagged() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);

        let net = MockNetwork::new(
            Some("two_heads"),
            vec![BufferInfo::internal("scratch", 4), BufferInfo::user("in", 32)],
            vec![BufferInfo::user("boxes", 16), BufferInfo::user("scores", 64)],
        );
        let handle = reg
            .register(ModelConfig::new(&net, PostprocessKind::YoloV8))
            .unwrap();

        let record = reg.get(handle).unwrap();
        assert_eq!(record.input_size(), 32);
        assert_eq!(record.output_size(), 16);
        assert_eq!(record.input_count(), 1);
        assert_eq!(record.output_count(), 2);
        assert!(logs_contain("only the first is bound"));
    }

    #[test]
    fn test_select_initializes_once() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);
        let a = MockNetwork::detector("a", 10, 10);
        let b = MockNetwork::detector("b", 10, 10);
        let ha = reg
            .register(ModelConfig::new(&a, PostprocessKind::YoloV2))
            .unwrap();
        let hb = reg
            .register(ModelConfig::new(&b, PostprocessKind::YoloV2))
            .unwrap();

        assert!(!reg.get(ha).unwrap().is_initialized());
        reg.select(ha).unwrap();
        reg.select(ha).unwrap();
        assert_eq!(runtime.network_inits(), 1);

        reg.select(hb).unwrap();
        reg.select(ha).unwrap();
        reg.select(hb).unwrap();
        assert_eq!(runtime.network_inits(), 2);
        assert_eq!(reg.active().unwrap().handle(), hb);

        assert!(matches!(
            reg.select(ModelHandle(7)),
            Err(NnServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_prepare_io() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);
        let input = DmaBuffer::alloc(128).unwrap();
        let output = DmaBuffer::alloc(64).unwrap();

        assert_eq!(
            reg.prepare_io(input, 128, output, 64).unwrap_err(),
            NnServiceError::NotInitialized
        );

        let net = MockNetwork::detector("det", 100, 50);
        reg.register(ModelConfig::new(&net, PostprocessKind::YoloV2))
            .unwrap();

        assert!(matches!(
            reg.prepare_io(input, 99, output, 64),
            Err(NnServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.prepare_io(input, 128, output, 49),
            Err(NnServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.prepare_io(input, 256, output, 64),
            Err(NnServiceError::InvalidArgument(_))
        ));

        // lazy select ran on the first valid-state call
        assert!(reg.active().unwrap().is_initialized());
        assert_eq!(runtime.network_inits(), 1);

        reg.prepare_io(input, 100, output, 50).unwrap();
        reg.run_active().unwrap();
        assert_eq!(runtime.runs(), 1);

        runtime.fail_bindings(true);
        assert!(matches!(
            reg.prepare_io(input, 100, output, 50),
            Err(NnServiceError::Io {
                operation: "bind input",
                ..
            })
        ));
    }

    #[test]
    fn test_run_requires_initialized_active_model() {
        let runtime = Arc::new(MockNpuRuntime::new());
        let mut reg = registry(&runtime);
        assert_eq!(reg.run_active().unwrap_err(), NnServiceError::NotInitialized);

        let net = MockNetwork::detector("det", 10, 10);
        let handle = reg
            .register(ModelConfig::new(&net, PostprocessKind::YoloV2))
            .unwrap();
        assert_eq!(reg.run_active().unwrap_err(), NnServiceError::NotInitialized);

        reg.select(handle).unwrap();
        runtime.fail_runs(true);
        assert!(matches!(
            reg.run_active(),
            Err(NnServiceError::Io {
                operation: "inference",
                ..
            })
        ));
    }
}
