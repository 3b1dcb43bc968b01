// config.rs
//
// Tunable parameters for a Machine, built with a fluent builder in the same
// style as the timing simulator's PipelineConfig.

/// Fixed base address where instructions are loaded; data occupies
/// `[0, BASE_PC)`. Per spec §3.
pub const BASE_PC: u32 = 16;

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub num_int_units: usize,
    pub num_load_units: usize,
    pub num_store_units: usize,
    pub rob_size: usize,
    pub btb_size: usize,
    pub base_pc: u32,
    pub load_store_latency: usize,
    pub alu_latency: usize,
    pub branch_latency: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_int_units: 2,
            num_load_units: 2,
            num_store_units: 2,
            rob_size: 16,
            btb_size: 8,
            base_pc: BASE_PC,
            load_store_latency: 3,
            alu_latency: 1,
            branch_latency: 1,
        }
    }
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rob_size(mut self, size: usize) -> Self {
        assert!(size > 0, "ROB size must be positive");
        self.rob_size = size;
        self
    }

    pub fn with_btb_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "BTB size must be a power of two");
        self.btb_size = size;
        self
    }

    pub fn with_int_units(mut self, n: usize) -> Self {
        assert!(n > 0, "at least one integer unit is required");
        self.num_int_units = n;
        self
    }

    pub fn with_load_units(mut self, n: usize) -> Self {
        assert!(n > 0, "at least one load unit is required");
        self.num_load_units = n;
        self
    }

    pub fn with_store_units(mut self, n: usize) -> Self {
        assert!(n > 0, "at least one store unit is required");
        self.num_store_units = n;
        self
    }

    pub fn with_base_pc(mut self, base_pc: u32) -> Self {
        self.base_pc = base_pc;
        self
    }
}
