/*!
    Controller configuration.

    Every tunable of the controller lives here with its production default, so a bare
    `ControllerConfig::new(cycle_us)` behaves exactly like the reference setup. The whole
    struct deserializes from TOML for deployments that keep machine parameters in files.
*/

use crate::error::{ControllerError, ControllerResult};
use serde::Deserialize;
use std::path::Path;
use tracing::info;


/// identity and position of one slave assumed present when no network-information file is given
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SlaveSpec {
    pub position: u16,
    pub vendor_id: u32,
    pub product_code: u32,
}

/// tunables of the EYOU adapter fault policy
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct EyouTunables {
    /// cycles to hold the control word after a treated status transition
    pub damping_cycles: u32,
    /// fault-reset attempts before the recovery branch is taken
    pub fault_reset_limit: u32,
    /// allow the non-standard shutdown command on a persistent fault
    ///
    /// Some drives recover only through this, others may be harmed by it; disable to stay
    /// in bounded fault-reset retries instead.
    pub force_recover: bool,
}
impl Default for EyouTunables {
    fn default() -> Self {
        Self {
            damping_cycles: 5,
            fault_reset_limit: 10,
            force_recover: true,
        }
    }
}

/// all controller parameters, with production defaults
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// cycle period in microseconds, the caller must tick at exactly this period
    pub cycle_us: u32,
    /// delay between all axes reaching operation-enabled and the synchronized motion start
    pub barrier_delay_ns: u64,
    /// cycles an axis keeps its target locked to the actual position after enabling
    pub csp_warmup_cycles: i32,
    /// clamp on the per-cycle target increment, in position counts
    pub max_delta_per_cycle: i32,
    /// profile velocity limit written at startup (object 0x6081)
    pub profile_velocity: u32,
    /// profile acceleration written at startup (object 0x6083)
    pub profile_acceleration: u32,
    /// profile deceleration written at startup (object 0x6084)
    pub profile_deceleration: u32,
    /// interpolation period exponent written at startup (object 0x60C2 sub 2)
    pub interpolation_exponent: i8,
    /// distributed-clock AssignActivate word programmed into every slave
    pub dc_assign_activate: u16,
    /// drive unrecognized slaves with the standard adapter instead of failing the bootstrap
    pub fallback_standard: bool,
    /// slave set assumed when no network-information file is given
    pub default_slaves: Vec<SlaveSpec>,
    pub eyou: EyouTunables,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_us: 4000,
            barrier_delay_ns: 1_000_000_000,
            csp_warmup_cycles: 10,
            max_delta_per_cycle: 400_000,
            profile_velocity: 100_000,
            profile_acceleration: 50_000,
            profile_deceleration: 50_000,
            interpolation_exponent: -3,
            dc_assign_activate: 0x0300,
            fallback_standard: true,
            default_slaves: (0 .. 3).map(|position| SlaveSpec {
                position,
                vendor_id: 0x0001_16c7,
                product_code: 0x003e_0402,
                }).collect(),
            eyou: EyouTunables::default(),
        }
    }
}

impl ControllerConfig {
    /// default configuration at the given cycle period
    pub fn new(cycle_us: u32) -> Self {
        Self {cycle_us, .. Self::default()}
    }

    /// load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> ControllerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ControllerError::Config(
                format!("failed to parse config {:?}: {}", path, e)))?;
        config.validate()?;
        info!(?path, cycle_us = config.cycle_us, "loaded controller configuration");
        Ok(config)
    }

    pub fn validate(&self) -> ControllerResult {
        if self.cycle_us == 0 {
            return Err(ControllerError::Param("cycle period must be non-zero"));
        }
        if self.max_delta_per_cycle <= 0 {
            return Err(ControllerError::Param("per-cycle delta clamp must be positive"));
        }
        if self.csp_warmup_cycles < 0 {
            return Err(ControllerError::Param("warmup cycle count cannot be negative"));
        }
        Ok(())
    }

    /// distributed-clock sync0 period derived from the cycle period
    pub fn sync0_period_ns(&self) -> u64 {
        self.cycle_us as u64 * 1000
    }

    /// interpolation period base in milliseconds, written at startup (object 0x60C2 sub 1)
    pub fn interpolation_base_ms(&self) -> u8 {
        (self.cycle_us / 1000) as u8
    }
}
