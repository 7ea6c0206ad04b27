//! Drive the controller against the simulated master at a realtime-ish cadence.
//!
//! No hardware needed: the simulated drives walk the CiA-402 power states, the barrier
//! fires after its settling delay, and the axes advance their targets until the demo stops.

use std::time::Duration;
use servage::{AdapterRegistry, Controller, ControllerConfig, SimMaster};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    if let Err(error) = thread_priority::set_current_thread_priority(
            thread_priority::ThreadPriority::Max) {
        eprintln!("could not raise thread priority: {:?}", error);
    }

    let mut config = ControllerConfig::new(1_000);
    config.barrier_delay_ns = 200_000_000;

    let master = SimMaster::new();
    let bus = master.bus();
    let registry = AdapterRegistry::defaults();
    let mut controller = Controller::create(master, &registry, config, None)
        .expect("bootstrap failed");
    println!("{} axes configured", controller.count());

    controller.set_command(true, 1, 2_000);

    let period = Duration::from_micros(controller.config().cycle_us as u64);
    for cycle in 0 .. 2_000u32 {
        controller.tick();
        if cycle % 250 == 0 {
            println!("cycle {:5}  motion {}  positions {:?}",
                cycle,
                controller.motion_started(),
                (0 .. controller.count())
                    .map(|axis| controller.actual_position(axis))
                    .collect::<Vec<_>>());
        }
        std::thread::sleep(period);
    }

    controller.set_command(false, 0, 1);
    controller.tick();
    let log = bus.control_log(0);
    println!("final control word of axis 0: {:#06x?}", log.last());
    controller.shutdown();
}
