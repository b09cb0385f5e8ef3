use hashbrown::HashSet;
use tileplan_ir::{Elem, MmaConfig, RegisterLayout, TileSize};

/// Capabilities a device can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// A tensor-core instruction, with the register layout of its operands on this device.
    Mma(MmaConfig),
}

/// Memory limits of a device.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDeviceProperties {
    /// Shared memory available to one block, in bytes.
    pub max_shared_memory_size: usize,
}

/// Execution topology of a device.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyProperties {
    /// Number of lanes executing in lockstep.
    pub plane_size: u32,
    /// Maximum number of threads in one block.
    pub max_units_per_cube: u32,
}

/// Properties of the device a plan is built for.
#[derive(Debug, Clone)]
pub struct DeviceProperties {
    set: HashSet<Feature>,
    memory: MemoryDeviceProperties,
    topology: TopologyProperties,
}

impl DeviceProperties {
    /// Create a new property set with the given features, memory and topology properties.
    pub fn new(
        features: &[Feature],
        memory_props: MemoryDeviceProperties,
        topology: TopologyProperties,
    ) -> Self {
        Self {
            set: features.iter().copied().collect(),
            memory: memory_props,
            topology,
        }
    }

    /// Check if the provided [feature](Feature) is supported by the device.
    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.set.contains(&feature)
    }

    /// Register a [feature](Feature) supported by the device.
    ///
    /// This should only be used by a runtime when initializing a device.
    pub fn register_feature(&mut self, feature: Feature) -> bool {
        self.set.insert(feature)
    }

    pub fn memory_properties(&self) -> &MemoryDeviceProperties {
        &self.memory
    }

    pub fn topology_properties(&self) -> &TopologyProperties {
        &self.topology
    }

    /// Every tensor-core configuration of the device.
    pub fn mma_configs(&self) -> impl Iterator<Item = &MmaConfig> {
        self.set.iter().map(|feature| match feature {
            Feature::Mma(config) => config,
        })
    }

    /// Register layout the device uses for a tensor-core configuration, if it supports it.
    pub fn mma_layout(
        &self,
        a_type: Elem,
        b_type: Elem,
        cd_type: Elem,
        size: TileSize,
    ) -> Option<RegisterLayout> {
        self.mma_configs()
            .find(|config| {
                config.a_type == a_type
                    && config.b_type == b_type
                    && config.cd_type == cd_type
                    && config.tile_size() == size
            })
            .map(|config| config.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(layout: RegisterLayout) -> MmaConfig {
        MmaConfig {
            a_type: Elem::F16,
            b_type: Elem::F16,
            cd_type: Elem::F32,
            m: 16,
            n: 8,
            k: 16,
            layout,
        }
    }

    #[test]
    fn layout_lookup_matches_types_and_size() {
        let props = DeviceProperties::new(
            &[Feature::Mma(config(RegisterLayout::PtxM16N8K16))],
            MemoryDeviceProperties::new(48 * 1024),
            TopologyProperties::new(32, 1024),
        );

        assert_eq!(
            props.mma_layout(Elem::F16, Elem::F16, Elem::F32, TileSize::new(16, 8, 16)),
            Some(RegisterLayout::PtxM16N8K16)
        );
        assert_eq!(
            props.mma_layout(Elem::BF16, Elem::BF16, Elem::F32, TileSize::new(16, 8, 16)),
            None
        );
        assert_eq!(
            props.mma_layout(Elem::F16, Elem::F16, Elem::F32, TileSize::new(16, 16, 16)),
            None
        );
    }

    #[test]
    fn registered_features_are_enabled() {
        let mut props = DeviceProperties::new(
            &[],
            MemoryDeviceProperties::new(48 * 1024),
            TopologyProperties::new(32, 1024),
        );
        let feature = Feature::Mma(config(RegisterLayout::LaneBitsM16N8K16));

        assert!(!props.feature_enabled(feature));
        assert!(props.register_feature(feature));
        assert!(!props.register_feature(feature));
        assert!(props.feature_enabled(feature));
        assert_eq!(
            props.mma_layout(Elem::F16, Elem::F16, Elem::F32, TileSize::new(16, 8, 16)),
            Some(RegisterLayout::LaneBitsM16N8K16)
        );
    }
}
