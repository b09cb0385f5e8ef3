use std::time::Instant;

use core::time::Duration;
use spin::Mutex;
use tileplan_ir::{Elem, KernelDefinition, MmaConfig, RegisterLayout};
use tileplan_runtime::{
    DeviceProperties, ExecutionError, Feature, LaunchError, MemoryDeviceProperties, Runtime,
    TensorData, TopologyProperties,
    config::{Logger, compilation::CompilationLogLevel, profiling::ProfilingLogLevel},
};

use crate::{CpuKernel, compiler, compute};

/// Threads executing in lockstep on the reference device.
pub const PLANE_SIZE: u32 = 32;

/// Describes the device the reference runtime emulates.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Register layout of the `m16n8k16` tensor-core operands.
    pub layout: RegisterLayout,
    /// Shared memory per block, in bytes.
    pub max_shared_memory_size: usize,
    /// Maximum threads per block.
    pub max_units_per_cube: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            layout: RegisterLayout::PtxM16N8K16,
            max_shared_memory_size: 48 * 1024,
            max_units_per_cube: 1024,
        }
    }
}

impl RuntimeOptions {
    /// Device properties: `m16n8k16` with f16 and bf16 inputs accumulated in f32.
    pub fn properties(&self) -> DeviceProperties {
        let mut properties = DeviceProperties::new(
            &[],
            MemoryDeviceProperties::new(self.max_shared_memory_size),
            TopologyProperties::new(PLANE_SIZE, self.max_units_per_cube),
        );

        for input in [Elem::F16, Elem::BF16] {
            properties.register_feature(Feature::Mma(MmaConfig {
                a_type: input,
                b_type: input,
                cd_type: Elem::F32,
                m: 16,
                n: 8,
                k: 16,
                layout: self.layout,
            }));
        }

        properties
    }
}

/// Interprets kernels on the host, one block at a time.
#[derive(Debug)]
pub struct CpuRuntime {
    properties: DeviceProperties,
    logger: Mutex<Logger>,
}

impl Default for CpuRuntime {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

impl CpuRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        Self::from_properties(options.properties())
    }

    /// Emulate a device with arbitrary properties.
    pub fn from_properties(properties: DeviceProperties) -> Self {
        Self {
            properties,
            logger: Mutex::new(Logger::new()),
        }
    }
}

impl Runtime for CpuRuntime {
    type Kernel = CpuKernel;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn compile(&self, kernel: KernelDefinition) -> Result<CpuKernel, LaunchError> {
        let mut logger = self.logger.lock();
        if logger.log_level_compilation() != CompilationLogLevel::Disabled {
            logger.log_compilation(&kernel);
        }
        core::mem::drop(logger);

        compiler::compile(&self.properties, kernel)
    }

    fn execute(
        &self,
        kernel: &CpuKernel,
        bindings: &mut [TensorData],
    ) -> Result<Duration, ExecutionError> {
        let start = Instant::now();
        let executed = compute::execute(kernel, bindings)?;
        let elapsed = start.elapsed();

        let mut logger = self.logger.lock();
        match logger.log_level_profiling() {
            ProfilingLogLevel::Disabled => {}
            ProfilingLogLevel::Basic => {
                logger.log_profiling(&format!("{} took {elapsed:?}", kernel.name()));
            }
            ProfilingLogLevel::Full => {
                let definition = kernel.definition();
                logger.log_profiling(&format!(
                    "{} took {elapsed:?}: {} blocks of {} threads, {executed} nodes executed",
                    kernel.name(),
                    definition.cube_count.num_cubes(),
                    definition.cube_dim,
                ));
            }
        }

        Ok(elapsed)
    }
}
