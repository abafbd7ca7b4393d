//! Neural-network accelerator runtime.
//!
//! A [`NetworkInstance`] is a compiled model owned by the application; the
//! [`NpuRuntime`] binds I/O memory into it and executes it. Instances are
//! handed to the runtime by reference on every call, so the runtime never
//! outlives or owns a model.

use crate::dma::DmaBuffer;
use crate::error::HalError;

/// One entry of a network's input or output descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    /// Tensor name.
    pub name: String,
    /// Size in bytes.
    pub len: usize,
    /// True when the application must provide the memory for this tensor.
    pub user_allocated: bool,
}

impl BufferInfo {
    /// Descriptor for an application-provided tensor.
    pub fn user(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
            user_allocated: true,
        }
    }

    /// Descriptor for a tensor placed by the runtime itself.
    pub fn internal(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
            user_allocated: false,
        }
    }
}

/// Compiled model as seen by the application.
pub trait NetworkInstance: Send + Sync {
    /// Name embedded in the compiled model, if any.
    fn network_name(&self) -> Option<&str>;

    /// Input descriptor table; empty when the model exposes none.
    fn input_buffers(&self) -> &[BufferInfo];

    /// Output descriptor table; empty when the model exposes none.
    fn output_buffers(&self) -> &[BufferInfo];
}

/// Accelerator runtime shared by every registered model.
pub trait NpuRuntime: Send + Sync {
    /// Global runtime bring-up. Called once before anything else.
    fn init_runtime(&self);

    /// Per-model initialization (weights relocation, epoch setup).
    fn init_network(&self, network: &dyn NetworkInstance);

    /// Binds `buf[..len]` as user input `index` of `network`.
    fn set_user_input(
        &self,
        network: &dyn NetworkInstance,
        index: usize,
        buf: DmaBuffer,
        len: usize,
    ) -> Result<(), HalError>;

    /// Binds `buf[..len]` as user output `index` of `network`.
    fn set_user_output(
        &self,
        network: &dyn NetworkInstance,
        index: usize,
        buf: DmaBuffer,
        len: usize,
    ) -> Result<(), HalError>;

    /// Runs one inference synchronously on the currently bound buffers.
    fn run(&self, network: &dyn NetworkInstance) -> Result<(), HalError>;
}

/// Stable identity of a network instance, usable as a map key by runtimes
/// that track per-network bindings.
#[must_use]
pub fn network_key(network: &dyn NetworkInstance) -> usize {
    network as *const dyn NetworkInstance as *const () as usize
}
