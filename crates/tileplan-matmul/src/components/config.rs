use serde::{Deserialize, Serialize};
use tileplan_ir::{CubeCount, Elem, TileSize};

use crate::components::ConfigurationError;

/// Number of lanes per warp along the output columns.
pub const LANES_X: u32 = 8;
/// Number of lanes per warp along the output rows.
pub const LANES_Y: u32 = 4;

/// Element types of a matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulElems {
    /// Element type of both inputs and of the staged tiles.
    pub input: Elem,
    /// Element type the tensor core accumulates in.
    pub accumulator: Elem,
    /// Element type of the output, the epilogue casts to it.
    pub output: Elem,
}

impl Default for MatmulElems {
    fn default() -> Self {
        Self {
            input: Elem::F16,
            accumulator: Elem::F32,
            output: Elem::F32,
        }
    }
}

/// User-chosen tiling parameters, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingParams {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub block_m: u32,
    pub block_n: u32,
    pub block_k: u32,
    pub threads_per_block: u32,
    #[serde(default = "default_warp_size")]
    pub warp_size: u32,
    pub tc_m: u32,
    pub tc_n: u32,
    pub tc_k: u32,
    pub tm: u32,
    pub tn: u32,
    /// Width of the tile owned by one warp. Defaults to `block_n`.
    #[serde(default)]
    pub warp_tile_n: Option<u32>,
    #[serde(default)]
    pub elems: MatmulElems,
}

fn default_warp_size() -> u32 {
    32
}

impl TilingParams {
    /// Parameters for an `m x n x k` problem on `m16n8k16` tensor cores, with the tile sizes of
    /// the reference kernel: 128x128 blocks, 32-deep K-slices and 8 warps.
    pub fn new(m: u32, n: u32, k: u32) -> Self {
        Self {
            m,
            n,
            k,
            block_m: 128,
            block_n: 128,
            block_k: 32,
            threads_per_block: 256,
            warp_size: 32,
            tc_m: 16,
            tc_n: 8,
            tc_k: 16,
            tm: 4,
            tn: 4,
            warp_tile_n: Some(64),
            elems: MatmulElems::default(),
        }
    }

    /// Parse parameters from a TOML document with snake_case keys.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Validate the parameters and derive every tiling constant.
    pub fn validate(self) -> Result<TilingConfig, ConfigurationError> {
        TilingConfig::new(self)
    }
}

/// Validated tiling constants. Immutable, shared by every plan component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingConfig {
    params: TilingParams,
    warp_tile_m: u32,
    warp_tile_n: u32,
}

fn check(
    holds: bool,
    invariant: &'static str,
    values: &[(&'static str, u32)],
) -> Result<(), ConfigurationError> {
    match holds {
        true => Ok(()),
        false => Err(ConfigurationError::new(invariant, values)),
    }
}

/// Check that a product of parameters is addressable with `u32` indices.
fn fits(
    product: u64,
    invariant: &'static str,
    values: &[(&'static str, u32)],
) -> Result<u32, ConfigurationError> {
    u32::try_from(product).map_err(|_| ConfigurationError::new(invariant, values))
}

impl TilingConfig {
    fn new(params: TilingParams) -> Result<Self, ConfigurationError> {
        let TilingParams {
            m,
            n,
            k,
            block_m,
            block_n,
            block_k,
            threads_per_block: threads,
            warp_size,
            tc_m,
            tc_n,
            tc_k,
            tm,
            tn,
            ..
        } = params;

        for (name, value) in [
            ("m", m),
            ("n", n),
            ("k", k),
            ("block_m", block_m),
            ("block_n", block_n),
            ("block_k", block_k),
            ("threads_per_block", threads),
            ("tc_m", tc_m),
            ("tc_n", tc_n),
            ("tc_k", tc_k),
            ("tm", tm),
            ("tn", tn),
            ("warp_tile_n", params.warp_tile_n.unwrap_or(block_n)),
        ] {
            check(value > 0, "value > 0", &[(name, value)])?;
        }

        check(warp_size == 32, "warp_size == 32", &[("warp_size", warp_size)])?;
        check(
            threads % warp_size == 0,
            "threads_per_block % warp_size == 0",
            &[("threads_per_block", threads), ("warp_size", warp_size)],
        )?;

        check(m % block_m == 0, "m % block_m == 0", &[("m", m), ("block_m", block_m)])?;
        check(n % block_n == 0, "n % block_n == 0", &[("n", n), ("block_n", block_n)])?;
        check(k % block_k == 0, "k % block_k == 0", &[("k", k), ("block_k", block_k)])?;

        for (invariant, lhs, rhs) in [
            ("m * k <= u32::MAX", ("m", m), ("k", k)),
            ("k * n <= u32::MAX", ("k", k), ("n", n)),
            ("m * n <= u32::MAX", ("m", m), ("n", n)),
        ] {
            fits(u64::from(lhs.1) * u64::from(rhs.1), invariant, &[lhs, rhs])?;
        }
        fits(
            (u64::from(block_m) + u64::from(block_n)) * u64::from(block_k),
            "(block_m + block_n) * block_k <= u32::MAX",
            &[
                ("block_m", block_m),
                ("block_n", block_n),
                ("block_k", block_k),
            ],
        )?;

        check(
            threads % block_n == 0,
            "threads_per_block % block_n == 0",
            &[("threads_per_block", threads), ("block_n", block_n)],
        )?;
        check(
            threads % block_k == 0,
            "threads_per_block % block_k == 0",
            &[("threads_per_block", threads), ("block_k", block_k)],
        )?;
        // Both staged tiles are addressable from here on.
        check(
            (block_n * block_k) % threads == 0,
            "(block_n * block_k) % threads_per_block == 0",
            &[
                ("block_n", block_n),
                ("block_k", block_k),
                ("threads_per_block", threads),
            ],
        )?;
        check(
            (block_m * block_k) % threads == 0,
            "(block_m * block_k) % threads_per_block == 0",
            &[
                ("block_m", block_m),
                ("block_k", block_k),
                ("threads_per_block", threads),
            ],
        )?;

        let warps = threads / warp_size;
        let warp_tile_n = params.warp_tile_n.unwrap_or(block_n);
        check(
            block_n % warp_tile_n == 0,
            "block_n % warp_tile_n == 0",
            &[("block_n", block_n), ("warp_tile_n", warp_tile_n)],
        )?;

        let block_area = u64::from(block_n) * u64::from(block_m);
        let warp_width = u64::from(warps) * u64::from(warp_tile_n);
        check(
            block_area % warp_width == 0,
            "(block_n * block_m) % (warps_per_block * warp_tile_n) == 0",
            &[
                ("block_n", block_n),
                ("block_m", block_m),
                ("warps_per_block", warps),
                ("warp_tile_n", warp_tile_n),
            ],
        )?;

        let warp_tile_m = block_area / warp_width;
        check(
            warp_tile_m > 0 && u64::from(block_m) % warp_tile_m == 0,
            "block_m % warp_tile_m == 0",
            &[
                ("block_m", block_m),
                ("warp_tile_m", u32::try_from(warp_tile_m).unwrap_or(u32::MAX)),
            ],
        )?;
        // Divides block_m, so it fits.
        let warp_tile_m = warp_tile_m as u32;

        let warps_x = block_n / warp_tile_n;
        let warps_y = block_m / warp_tile_m;
        check(
            u64::from(warps_x) * u64::from(warps_y) == u64::from(warps),
            "warps_in_block_x * warps_in_block_y == warps_per_block",
            &[
                ("warps_in_block_x", warps_x),
                ("warps_in_block_y", warps_y),
                ("warps_per_block", warps),
            ],
        )?;

        check(
            LANES_X * LANES_Y == warp_size,
            "lanes_x * lanes_y == warp_size",
            &[("lanes_x", LANES_X), ("lanes_y", LANES_Y), ("warp_size", warp_size)],
        )?;
        check(
            u64::from(warp_tile_n) % (u64::from(LANES_X) * u64::from(tn)) == 0,
            "warp_tile_n % (lanes_x * tn) == 0",
            &[("warp_tile_n", warp_tile_n), ("lanes_x", LANES_X), ("tn", tn)],
        )?;
        check(
            u64::from(warp_tile_m) % (u64::from(LANES_Y) * u64::from(tm)) == 0,
            "warp_tile_m % (lanes_y * tm) == 0",
            &[("warp_tile_m", warp_tile_m), ("lanes_y", LANES_Y), ("tm", tm)],
        )?;

        check(
            warp_tile_m % tc_m == 0,
            "warp_tile_m % tc_m == 0",
            &[("warp_tile_m", warp_tile_m), ("tc_m", tc_m)],
        )?;
        check(
            warp_tile_n % tc_n == 0,
            "warp_tile_n % tc_n == 0",
            &[("warp_tile_n", warp_tile_n), ("tc_n", tc_n)],
        )?;
        check(
            block_k % tc_k == 0,
            "block_k % tc_k == 0",
            &[("block_k", block_k), ("tc_k", tc_k)],
        )?;

        Ok(Self {
            params,
            warp_tile_m,
            warp_tile_n,
        })
    }

    pub fn params(&self) -> &TilingParams {
        &self.params
    }

    pub fn m(&self) -> u32 {
        self.params.m
    }

    pub fn n(&self) -> u32 {
        self.params.n
    }

    pub fn k(&self) -> u32 {
        self.params.k
    }

    pub fn block_m(&self) -> u32 {
        self.params.block_m
    }

    pub fn block_n(&self) -> u32 {
        self.params.block_n
    }

    pub fn block_k(&self) -> u32 {
        self.params.block_k
    }

    pub fn threads_per_block(&self) -> u32 {
        self.params.threads_per_block
    }

    pub fn warp_size(&self) -> u32 {
        self.params.warp_size
    }

    pub fn elems(&self) -> MatmulElems {
        self.params.elems
    }

    /// Native shape of the tensor-core instruction.
    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.params.tc_m, self.params.tc_n, self.params.tc_k)
    }

    pub fn warps_per_block(&self) -> u32 {
        self.params.threads_per_block / self.params.warp_size
    }

    pub fn warp_tile_m(&self) -> u32 {
        self.warp_tile_m
    }

    pub fn warp_tile_n(&self) -> u32 {
        self.warp_tile_n
    }

    pub fn warps_in_block_x(&self) -> u32 {
        self.params.block_n / self.warp_tile_n
    }

    pub fn warps_in_block_y(&self) -> u32 {
        self.params.block_m / self.warp_tile_m
    }

    pub fn lanes_per_warp_x(&self) -> u32 {
        LANES_X
    }

    pub fn lanes_per_warp_y(&self) -> u32 {
        LANES_Y
    }

    /// Register tiles one thread would cover along the columns of its warp tile.
    pub fn iters_per_warp_n(&self) -> u32 {
        self.warp_tile_n / (LANES_X * self.params.tn)
    }

    /// Register tiles one thread would cover along the rows of its warp tile.
    pub fn iters_per_warp_m(&self) -> u32 {
        self.warp_tile_m / (LANES_Y * self.params.tm)
    }

    /// Tensor-core tiles per warp along the rows.
    pub fn tc_tiles_m(&self) -> u32 {
        self.warp_tile_m / self.params.tc_m
    }

    /// Tensor-core tiles per warp along the columns.
    pub fn tc_tiles_n(&self) -> u32 {
        self.warp_tile_n / self.params.tc_n
    }

    /// Iterations of the outer reduction.
    pub fn k_tiles(&self) -> u32 {
        self.params.k / self.params.block_k
    }

    /// Iterations of the inner reduction, one tensor-core step each.
    pub fn k_chunks(&self) -> u32 {
        self.params.block_k / self.params.tc_k
    }

    /// Blocks along x cover the columns of the output, blocks along y its rows.
    pub fn cube_count(&self) -> CubeCount {
        CubeCount::new(
            self.params.n / self.params.block_n,
            self.params.m / self.params.block_m,
        )
    }

    /// Elements each thread copies per staged lhs tile.
    pub fn lhs_stage_chunks(&self) -> u32 {
        self.params.block_m * self.params.block_k / self.params.threads_per_block
    }

    /// Elements each thread copies per staged rhs tile.
    pub fn rhs_stage_chunks(&self) -> u32 {
        self.params.block_n * self.params.block_k / self.params.threads_per_block
    }

    /// Shared memory used by the two staged tiles.
    pub fn shared_memory_bytes(&self) -> usize {
        let elems = (self.params.block_m + self.params.block_n) * self.params.block_k;
        elems as usize * self.params.elems.input.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> TilingParams {
        TilingParams {
            m: 128,
            n: 128,
            k: 128,
            block_m: 64,
            block_n: 128,
            block_k: 64,
            threads_per_block: 128,
            warp_tile_n: None,
            ..TilingParams::new(128, 128, 128)
        }
    }

    #[test]
    fn derives_warp_layout() {
        let config = scenario().validate().unwrap();

        assert_eq!(config.warps_per_block(), 4);
        assert_eq!(config.warp_tile_n(), 128);
        assert_eq!(config.warp_tile_m(), 16);
        assert_eq!(config.warps_in_block_x(), 1);
        assert_eq!(config.warps_in_block_y(), 4);
        assert_eq!(config.tc_tiles_m(), 1);
        assert_eq!(config.tc_tiles_n(), 16);
        assert_eq!(config.iters_per_warp_n(), 4);
        assert_eq!(config.iters_per_warp_m(), 1);
        assert_eq!(config.k_tiles(), 2);
        assert_eq!(config.k_chunks(), 4);
        assert_eq!(config.cube_count(), CubeCount::new(1, 2));
        assert_eq!(config.shared_memory_bytes(), (64 + 128) * 64 * 2);
    }

    #[test]
    fn default_parameters_are_valid() {
        let config = TilingParams::new(256, 256, 64).validate().unwrap();

        assert_eq!(config.warp_tile_m(), 32);
        assert_eq!(config.warps_in_block_x(), 2);
        assert_eq!(config.warps_in_block_y(), 4);
        assert_eq!(config.tc_tiles_m(), 2);
        assert_eq!(config.tc_tiles_n(), 8);
    }

    #[test]
    fn warp_counts_always_multiply_to_warps_per_block() {
        for threads in [64, 128, 256] {
            for warp_tile_n in [32, 64, 128] {
                let params = TilingParams {
                    threads_per_block: threads,
                    warp_tile_n: Some(warp_tile_n),
                    ..TilingParams::new(256, 256, 64)
                };
                if let Ok(config) = params.validate() {
                    assert_eq!(
                        config.warps_in_block_x() * config.warps_in_block_y(),
                        config.warps_per_block()
                    );
                }
            }
        }
    }

    #[test]
    fn warp_tile_must_divide_block() {
        let params = TilingParams {
            warp_tile_n: Some(48),
            ..scenario()
        };
        let err = params.validate().unwrap_err();

        assert_eq!(err.invariant(), "block_n % warp_tile_n == 0");
        assert_eq!(err.values(), &[("block_n", 128), ("warp_tile_n", 48)]);
        assert_eq!(
            err.to_string(),
            "`block_n % warp_tile_n == 0` doesn't hold with block_n=128, warp_tile_n=48"
        );
    }

    #[test]
    fn zero_fields_are_rejected() {
        let params = TilingParams { tc_k: 0, ..scenario() };

        assert_eq!(params.validate().unwrap_err().values(), &[("tc_k", 0)]);
    }

    #[test]
    fn unaddressable_sizes_are_rejected() {
        let huge = 65536;
        let params = TilingParams {
            m: huge,
            n: huge,
            k: huge,
            block_m: huge,
            block_n: huge,
            block_k: huge,
            threads_per_block: huge,
            ..scenario()
        };

        let err = params.validate().unwrap_err();

        assert_eq!(err.invariant(), "m * k <= u32::MAX");
        assert_eq!(err.values(), &[("m", huge), ("k", huge)]);
    }

    #[test]
    fn oversized_staged_tiles_are_rejected() {
        let params = TilingParams {
            m: 65536,
            n: 32768,
            k: 49152,
            block_m: 65536,
            block_n: 32768,
            block_k: 49152,
            threads_per_block: 65536,
            ..scenario()
        };

        // m * k and k * n are addressable, the staged tiles are not.
        let err = params.validate().unwrap_err();

        assert_eq!(err.invariant(), "(block_m + block_n) * block_k <= u32::MAX");
    }

    #[test]
    fn remainder_tiles_are_rejected() {
        let params = TilingParams { m: 96, ..scenario() };

        assert_eq!(params.validate().unwrap_err().invariant(), "m % block_m == 0");
    }

    #[test]
    fn other_warp_sizes_are_rejected() {
        let params = TilingParams {
            warp_size: 64,
            ..scenario()
        };

        assert_eq!(params.validate().unwrap_err().invariant(), "warp_size == 32");
    }

    #[test]
    fn parses_toml() {
        let params = TilingParams::from_toml(
            r#"
            m = 128
            n = 512
            k = 128
            block_m = 64
            block_n = 128
            block_k = 64
            threads_per_block = 128
            tc_m = 16
            tc_n = 8
            tc_k = 16
            tm = 4
            tn = 4

            [elems]
            input = "bf16"
            accumulator = "f32"
            output = "f16"
            "#,
        )
        .unwrap();

        assert_eq!(params.warp_size, 32);
        assert_eq!(params.warp_tile_n, None);
        assert_eq!(params.elems.input, Elem::BF16);
        assert_eq!(params.validate().unwrap().cube_count(), CubeCount::new(4, 2));
    }
}
