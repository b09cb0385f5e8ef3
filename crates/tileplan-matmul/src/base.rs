use std::time::Duration;

use tileplan_runtime::{CorrectnessCheck, Runtime, TensorData, config::GlobalConfig};

use crate::components::{AccuracyError, MatmulLaunchError, MatmulPlan, TilingParams, build_plan};

/// Result of a launched matmul.
#[derive(Debug, Clone)]
pub struct MatmulOutput {
    /// The `m x n` product.
    pub data: TensorData,
    /// Device time of the execution.
    pub elapsed: Duration,
}

/// Build the plan for the runtime's device, then compile and execute it on `lhs` and `rhs`.
///
/// The parameters are validated before anything is emitted; runtime errors are returned as is.
pub fn launch<R: Runtime>(
    runtime: &R,
    params: TilingParams,
    lhs: &TensorData,
    rhs: &TensorData,
) -> Result<MatmulOutput, MatmulLaunchError> {
    let plan = build_plan(params, runtime.properties())?;
    launch_plan(runtime, plan, lhs, rhs)
}

/// Compile and execute an already built plan.
pub fn launch_plan<R: Runtime>(
    runtime: &R,
    plan: MatmulPlan,
    lhs: &TensorData,
    rhs: &TensorData,
) -> Result<MatmulOutput, MatmulLaunchError> {
    let config = plan.config;
    let name = plan.kernel.name.clone();
    let kernel = runtime.compile(plan.kernel)?;

    let out = TensorData::zeros(
        vec![config.m() as usize, config.n() as usize],
        config.elems().output,
    );
    let mut bindings = [lhs.clone(), rhs.clone(), out];
    let elapsed = runtime.execute(&kernel, &mut bindings)?;
    log::info!("Launched {name} on {} in {elapsed:?}", runtime.name());

    let [_, _, data] = bindings;
    Ok(MatmulOutput { data, elapsed })
}

/// Compare `out` with the reference product of `check` and fail when the mean squared error is
/// above `tolerance`. Returns the error.
pub fn check_accuracy<C: CorrectnessCheck>(
    check: &C,
    lhs: &TensorData,
    rhs: &TensorData,
    out: &TensorData,
    tolerance: f64,
) -> Result<f64, MatmulLaunchError> {
    let metric = check.mean_squared_error(lhs, rhs, out)?;

    // NaN never passes.
    if metric <= tolerance {
        log::debug!("Mean squared error {metric} within {tolerance}");
        Ok(metric)
    } else {
        Err(AccuracyError { metric, tolerance }.into())
    }
}

/// [`check_accuracy`] with the tolerance of the global configuration.
pub fn check_configured_accuracy<C: CorrectnessCheck>(
    check: &C,
    lhs: &TensorData,
    rhs: &TensorData,
    out: &TensorData,
) -> Result<f64, MatmulLaunchError> {
    check_accuracy(check, lhs, rhs, out, GlobalConfig::get().plan.tolerance)
}
