use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tileplan_cpu::{CpuRuntime, ReferenceCheck, RuntimeOptions};
use tileplan_ir::{CubeCount, Elem, MmaConfig, RegisterLayout, TileSize, verify};
use tileplan_matmul::{
    check_accuracy, check_configured_accuracy,
    components::{
        LayoutMappingError, MatmulAvailabilityError, MatmulElems, MatmulLaunchError,
        MatmulSetupError, TilingParams, build_plan,
    },
    launch, launch_plan,
};
use tileplan_runtime::{
    DeviceProperties, Feature, MemoryDeviceProperties, Runtime, TensorData, TopologyProperties,
};

const TOLERANCE: f64 = 1e-2;

/// 128x128x128 on 64x128 blocks, 64-deep K-slices and 4 warps.
fn scenario(n: u32) -> TilingParams {
    TilingParams {
        block_m: 64,
        block_n: 128,
        block_k: 64,
        threads_per_block: 128,
        warp_tile_n: None,
        ..TilingParams::new(128, n, 128)
    }
}

fn inputs(params: &TilingParams, seed: u64) -> (TensorData, TensorData) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (m, n, k) = (params.m as usize, params.n as usize, params.k as usize);
    let mut sample =
        |len: usize| -> Vec<f32> { (0..len).map(|_| rng.random_range(-1.0..1.0)).collect() };

    let lhs = sample(m * k);
    let rhs = sample(k * n);
    let elem = params.elems.input;

    (
        TensorData::from_f32(&lhs, vec![m, k], elem),
        TensorData::from_f32(&rhs, vec![k, n], elem),
    )
}

fn assert_accurate(runtime: &CpuRuntime, params: TilingParams) -> TensorData {
    let (lhs, rhs) = inputs(&params, 42);

    let output = launch(runtime, params, &lhs, &rhs).unwrap();
    check_accuracy(&ReferenceCheck, &lhs, &rhs, &output.data, TOLERANCE).unwrap();

    output.data
}

#[test]
fn square_problem_matches_reference() {
    let runtime = CpuRuntime::default();
    let params = scenario(128);

    let config = params.validate().unwrap();
    assert_eq!(config.cube_count(), CubeCount::new(1, 2));

    let out = assert_accurate(&runtime, params);
    assert_eq!(out.shape(), &[128, 128]);
    assert_eq!(out.elem(), Elem::F32);
}

#[test]
fn wide_problem_launches_one_block_per_tile() {
    let runtime = CpuRuntime::default();
    let params = scenario(512);

    let plan = build_plan(params, runtime.properties()).unwrap();
    assert_eq!(plan.kernel.cube_count, CubeCount::new(4, 2));
    assert_eq!(plan.kernel.cube_count.num_cubes(), 8);

    let out = assert_accurate(&runtime, params);
    assert_eq!(out.shape(), &[128, 512]);
}

#[test]
fn default_tiling_matches_reference() {
    assert_accurate(&CpuRuntime::default(), TilingParams::new(256, 256, 64));
}

#[test]
fn lane_bits_device_matches_reference() {
    let runtime = CpuRuntime::new(RuntimeOptions {
        layout: RegisterLayout::LaneBitsM16N8K16,
        ..Default::default()
    });

    assert_accurate(&runtime, scenario(128));
}

#[test]
fn output_is_cast_in_the_epilogue() {
    let params = TilingParams {
        elems: MatmulElems {
            input: Elem::BF16,
            accumulator: Elem::F32,
            output: Elem::F16,
        },
        ..scenario(128)
    };

    let runtime = CpuRuntime::default();
    let (lhs, rhs) = inputs(&params, 11);

    let out = launch(&runtime, params, &lhs, &rhs).unwrap().data;

    assert_eq!(out.elem(), Elem::F16);
    check_configured_accuracy(&ReferenceCheck, &lhs, &rhs, &out).unwrap();
}

#[test]
fn launches_are_deterministic() {
    let runtime = CpuRuntime::default();
    let params = scenario(128);
    let (lhs, rhs) = inputs(&params, 7);

    let plan = build_plan(params, runtime.properties()).unwrap();
    let first = launch_plan(&runtime, plan.clone(), &lhs, &rhs).unwrap();
    let second = launch_plan(&runtime, plan, &lhs, &rhs).unwrap();

    assert_eq!(first.data.as_bytes(), second.data.as_bytes());
}

#[test]
fn built_plan_is_verified() {
    let runtime = CpuRuntime::default();

    for params in [
        scenario(128),
        scenario(512),
        TilingParams::new(256, 256, 64),
    ] {
        let plan = build_plan(params, runtime.properties()).unwrap();
        assert_eq!(verify(&plan.kernel.graph), Ok(()));
        assert_eq!(
            plan.kernel.shared_mem_bytes(),
            plan.config.shared_memory_bytes()
        );
    }
}

#[test]
fn indivisible_warp_tile_is_rejected_before_building() {
    let params = TilingParams {
        warp_tile_n: Some(48),
        ..scenario(128)
    };

    let err = build_plan(params, CpuRuntime::default().properties()).unwrap_err();

    let err = match err {
        MatmulSetupError::InvalidConfig(err) => err,
        other => panic!("Expected a configuration error, got {other:?}"),
    };
    assert_eq!(err.invariant(), "block_n % warp_tile_n == 0");
    assert_eq!(err.values(), &[("block_n", 128), ("warp_tile_n", 48)]);
}

#[test]
fn configuration_errors_surface_through_launch() {
    let runtime = CpuRuntime::default();
    let params = TilingParams {
        block_k: 48,
        ..scenario(128)
    };
    let (lhs, rhs) = inputs(&scenario(128), 0);

    let err = launch(&runtime, params, &lhs, &rhs).unwrap_err();

    assert!(matches!(
        err,
        MatmulLaunchError::Setup(MatmulSetupError::InvalidConfig(_))
    ));
}

#[test]
fn missing_tensor_core_instruction_is_unavailable() {
    let params = TilingParams {
        elems: MatmulElems {
            input: Elem::BF16,
            accumulator: Elem::F16,
            output: Elem::F32,
        },
        ..scenario(128)
    };

    let err = build_plan(params, CpuRuntime::default().properties()).unwrap_err();

    assert!(matches!(
        err,
        MatmulSetupError::Unavailable(MatmulAvailabilityError::MmaInstructionUnavailable {
            input: Elem::BF16,
            output: Elem::F16,
            ..
        })
    ));
}

#[test]
fn staged_tiles_must_fit_in_shared_memory() {
    let runtime = CpuRuntime::new(RuntimeOptions {
        max_shared_memory_size: 16 * 1024,
        ..Default::default()
    });

    let err = build_plan(scenario(128), runtime.properties()).unwrap_err();

    assert!(matches!(
        err,
        MatmulSetupError::Unavailable(MatmulAvailabilityError::SharedMemoryTooBig {
            requested: 24576,
            max: 16384
        })
    ));
}

#[test]
fn layout_of_another_tile_size_is_rejected() {
    let size = TileSize::new(16, 8, 8);
    let properties = DeviceProperties::new(
        &[Feature::Mma(MmaConfig {
            a_type: Elem::F16,
            b_type: Elem::F16,
            cd_type: Elem::F32,
            m: 16,
            n: 8,
            k: 8,
            layout: RegisterLayout::PtxM16N8K16,
        })],
        MemoryDeviceProperties::new(48 * 1024),
        TopologyProperties::new(32, 1024),
    );
    let params = TilingParams {
        tc_k: 8,
        ..scenario(128)
    };

    let err = build_plan(params, &properties).unwrap_err();

    assert!(matches!(
        err,
        MatmulSetupError::Layout(LayoutMappingError::Undefined {
            layout: RegisterLayout::PtxM16N8K16,
            size: found,
            plane_dim: 32,
        }) if found == size
    ));
}

#[test]
fn inaccurate_output_is_reported() {
    let params = scenario(128);
    let (lhs, rhs) = inputs(&params, 3);
    let zeros = TensorData::zeros(vec![128, 128], Elem::F32);

    let err = check_accuracy(&ReferenceCheck, &lhs, &rhs, &zeros, TOLERANCE).unwrap_err();

    let err = match err {
        MatmulLaunchError::Accuracy(err) => err,
        other => panic!("Expected an accuracy error, got {other:?}"),
    };
    assert!(err.metric > TOLERANCE);
}
