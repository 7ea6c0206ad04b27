/*!
    Servage is a multi-axis servo controller speaking the CiA-402 drive profile over a cyclic
    fieldbus master.

    The controller owns the hard-realtime side of a motion system: it advances every drive
    through the CiA-402 power state machine, programs and registers the PDO mappings (from a
    network-information file or from the adapter defaults), holds all targets until every
    axis is enabled and a settling delay has elapsed, then advances the group's targets in
    cyclic synchronous position mode, one clamped delta per cycle. The fieldbus master itself
    is out of scope and reached through the [FieldbusMaster] trait; a simulated one ships in
    [sim] so the whole stack runs without hardware.

    ## It mainly features

    - [Controller] for the bootstrap, the cyclic pipeline and the caller-facing surface
    - [DriveAdapter] and [AdapterRegistry] to let different vendor drives plug into the same
      state-machine surface
    - [FieldbusMaster] for protocol-safe access to the functions of the cyclic master

    ## Complete feature list

    - [x] cyclic pipeline: application time, receive, process, per-axis state step, queue, send
    - [x] CiA-402 power state machine per axis
        + [x] fault-reset pulse and bounded vendor retry policies
        + [x] warmup holding the target at the actual position after enabling
    - [x] synchronized motion start
        + [x] all-enabled detection
        + [x] fixed settling delay on a monotonic clock
    - [x] PDO mapping
        + [x] catalog of the standard CiA-402 objects
        + [x] registration with offsets-into-image binding, gap entries skipped
    - [x] network information (ENI)
        + [x] text form
        + [x] XML forms (`SlaveList`, `EtherCATInfo`)
    - [x] vendor adapters: EYOU, Delta, Yaskawa, Panasonic, standard fallback
    - [x] simulated master for tests and demos
    - [ ] autodiscovery of slaves from the running bus
*/

pub mod data;
#[allow(non_upper_case_globals)]
pub mod sdo;
pub mod error;
pub mod config;
pub mod master;
pub mod mapping;
pub mod adapter;
pub mod vendors;
pub mod eni;
pub mod axis;
pub mod barrier;
pub mod controller;
pub mod sim;

pub use crate::adapter::{AdapterRegistry, DriveAdapter, DriveControl, DriveStatus,
    MotorIdentity, StandardAdapter};
pub use crate::axis::{Axis, AxisDiag};
pub use crate::barrier::{Clock, SimClock, StartBarrier, SystemClock};
pub use crate::config::{ControllerConfig, EyouTunables, SlaveSpec};
pub use crate::controller::{Command, Controller};
pub use crate::data::Field;
pub use crate::eni::EniSlave;
pub use crate::error::{ControllerError, ControllerResult};
pub use crate::master::{FieldbusMaster, PdoEntryReg, SlaveHandle, SyncDirection, SyncInfo,
    Watchdog};
pub use crate::sdo::{ControlWord, OperationMode, PdoEntry, PdoMapping, StatusWord};
pub use crate::sim::{SimBus, SimMaster};
