use tileplan_ir::Expr;

use crate::components::TilingConfig;

/// Position of a thread inside its block: warp coordinates and lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIds {
    pub tid: Expr,
    pub warp_x: Expr,
    pub warp_y: Expr,
    pub lane: Expr,
}

impl UnitIds {
    /// Warps are laid out row-major over the block, `warps_in_block_x` per row.
    pub fn new(config: &TilingConfig, tid: Expr) -> Self {
        let warp = &tid / config.warp_size();
        let warps_x = config.warps_in_block_x();

        Self {
            warp_x: &warp % warps_x,
            warp_y: warp / warps_x,
            lane: &tid % config.warp_size(),
            tid,
        }
    }

    /// Ids of a literal thread, for host-side checks.
    pub fn of_thread(config: &TilingConfig, tid: u32) -> Self {
        Self::new(config, Expr::constant(tid))
    }

    /// Row of the warp tile inside the block tile.
    pub fn warp_row(&self, config: &TilingConfig) -> Expr {
        &self.warp_y * config.warp_tile_m()
    }

    /// Column of the warp tile inside the block tile.
    pub fn warp_col(&self, config: &TilingConfig) -> Expr {
        &self.warp_x * config.warp_tile_n()
    }
}
