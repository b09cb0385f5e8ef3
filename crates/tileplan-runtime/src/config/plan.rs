/// Settings of the plan builders.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PlanConfig {
    /// Run the ordering verification on every built graph.
    #[serde(default = "default_true")]
    pub verify_graph: bool,

    /// Mean squared error above which an output is reported as inaccurate.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            verify_graph: true,
            tolerance: default_tolerance(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tolerance() -> f64 {
    1e-2
}
