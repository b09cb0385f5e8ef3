use core::time::Duration;

use tileplan_ir::KernelDefinition;

use crate::{DeviceProperties, ExecutionError, LaunchError, ResourceLimitError, TensorData};

/// A device able to compile and execute kernel definitions.
pub trait Runtime {
    /// A compiled kernel, ready to be executed many times.
    type Kernel;

    /// The runtime name.
    fn name(&self) -> &'static str;

    /// Properties of the device the kernels run on.
    fn properties(&self) -> &DeviceProperties;

    /// Lower a kernel definition for this device.
    fn compile(&self, kernel: KernelDefinition) -> Result<Self::Kernel, LaunchError>;

    /// Execute a compiled kernel on the given bindings, in slot order, and return the elapsed
    /// device time.
    fn execute(
        &self,
        kernel: &Self::Kernel,
        bindings: &mut [TensorData],
    ) -> Result<Duration, ExecutionError>;
}

/// Check that a kernel fits in the resources of a device.
pub fn validate_resources(
    properties: &DeviceProperties,
    kernel: &KernelDefinition,
) -> Result<(), ResourceLimitError> {
    let max_threads = properties.topology_properties().max_units_per_cube;
    if kernel.cube_dim > max_threads {
        return Err(ResourceLimitError::CubeDim {
            requested: kernel.cube_dim,
            max: max_threads,
        });
    }

    let max_shared = properties.memory_properties().max_shared_memory_size;
    let requested = kernel.shared_mem_bytes();
    if requested > max_shared {
        return Err(ResourceLimitError::SharedMemory {
            requested,
            max: max_shared,
        });
    }

    Ok(())
}
