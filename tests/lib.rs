#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use servage::{
        eni, AdapterRegistry, Controller, ControllerConfig, ControllerError, SimClock,
        SimMaster, SlaveSpec, StandardAdapter,
        sim::SimBus,
        vendors::{EyouAdapter, PanasonicAdapter},
        };

    const CYCLE_NS: u64 = 4_000_000;

    /// controller over a simulated bus with `axes` default (standard-fallback) slaves
    fn simulated(axes: usize, config: ControllerConfig)
            -> (Controller<SimMaster>, SimBus, SimClock) {
        let master = SimMaster::new();
        let bus = master.bus();
        let clock = SimClock::new();
        let mut config = config;
        config.default_slaves = (0 .. axes as u16)
            .map(|position| SlaveSpec {
                position,
                vendor_id: 0x0001_16c7,
                product_code: 0x003e_0402,
                })
            .collect();
        let registry = AdapterRegistry::defaults();
        let controller = Controller::with_clock(
            master, &registry, config, None, Box::new(clock.clone())).unwrap();
        (controller, bus, clock)
    }

    /// one cycle at the configured period
    fn tick(controller: &mut Controller<SimMaster>, clock: &SimClock) {
        controller.tick();
        clock.advance(CYCLE_NS);
    }

    #[test]
    fn bootstrap_programs_the_bus() {
        let (controller, bus, _clock) = simulated(3, ControllerConfig::new(4000));
        assert_eq!(controller.count(), 3);
        assert!(controller.running());

        let state = bus.lock();
        assert!(state.activated);
        assert_eq!(state.reference_clock, Some(0));
        for slave in &state.slaves {
            // startup parameters: interpolation period, profile limits
            assert!(slave.sdo_writes.contains(&(0x60c2, 2, (-3i8) as u8 as u32)));
            assert!(slave.sdo_writes.contains(&(0x60c2, 1, 4)));
            assert!(slave.sdo_writes.contains(&(0x6081, 0, 100_000)));
            assert!(slave.sdo_writes.contains(&(0x6083, 0, 50_000)));
            assert!(slave.sdo_writes.contains(&(0x6084, 0, 50_000)));
            // distributed clock: sync0 at the cycle period
            assert_eq!(slave.dc, Some((0x0300, 4_000_000, 0)));
            assert_eq!(slave.syncs.len(), 4);
        }
    }

    #[test]
    fn registered_offsets_do_not_overlap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file,
            "=== Master 0, Slave 0 ===\n\
             Vendor Id: 0x00001097\n\
             Product code: 0x00002406\n\
             Distributed clocks: yes\n\
             === Master 0, Slave 1 ===\n\
             Vendor Id: 0x00000003\n\
             Product code: 0x11223344\n").unwrap();

        let master = SimMaster::new();
        let registry = AdapterRegistry::defaults();
        let controller = Controller::create(
            master, &registry, ControllerConfig::new(4000), Some(file.path())).unwrap();
        assert_eq!(controller.count(), 2);
        assert_eq!(controller.adapter_name(0), "EYOU Adapter");
        assert_eq!(controller.adapter_name(1), "Panasonic Adapter");

        // every bound entry occupies its own byte range
        let mut ranges = Vec::new();
        for axis in 0 .. controller.count() {
            let layout = &controller.axis(axis).unwrap().layout;
            for (entry, offset) in layout.rx.iter().zip(&layout.rx_offsets)
                    .chain(layout.tx.iter().zip(&layout.tx_offsets)) {
                match offset {
                    Some(offset) => ranges.push((*offset, *offset + entry.bytes() as u32)),
                    None => assert!(entry.is_gap(), "non-gap entry left unbound"),
                }
            }
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "overlap at {:?}", pair);
        }
        // the panasonic layout ends with unbound gap entries
        let panasonic = &controller.axis(1).unwrap().layout;
        assert!(panasonic.rx.last().unwrap().is_gap());
        assert_eq!(panasonic.rx_offsets.last(), Some(&None));
    }

    #[test]
    fn cold_start_single_axis() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        bus.script(0, &[0x40, 0x40, 0x21, 0x23, 0x27]);
        for _ in 0 .. 5 {
            tick(&mut controller, &clock);
        }
        assert_eq!(bus.control_log(0), vec![0x06, 0x06, 0x07, 0x0f, 0x0f]);
        let axis = controller.axis(0).unwrap();
        assert!(axis.servo_enabled);
        assert_eq!(axis.csp_warmup, 10);
        assert_eq!(axis.csp_target, axis.actual_position);
    }

    #[test]
    fn fault_reset_then_recovery() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        bus.script(0, &[0x0008, 0x0040]);
        tick(&mut controller, &clock);
        // faulted: the reset pulse ends the cycle on the fault-reset command
        assert_eq!(bus.control_log(0), vec![0x80]);
        tick(&mut controller, &clock);
        // fault cleared to switch-on-disabled: back to the shutdown command
        assert_eq!(bus.control_log(0), vec![0x80, 0x06]);
        assert!(! controller.axis(0).unwrap().servo_enabled);
    }

    #[test]
    fn enable_is_monotonic() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        for _ in 0 .. 10 {
            tick(&mut controller, &clock);
        }
        assert!(controller.axis(0).unwrap().servo_enabled);
        // even if the drive drops out of operation-enabled, the flag stays
        bus.set_status(0, 0x0040);
        bus.lock().slaves[0].drive.reactive = false;
        for _ in 0 .. 5 {
            tick(&mut controller, &clock);
        }
        let axis = controller.axis(0).unwrap();
        assert!(axis.servo_enabled);
        assert!(! axis.seen_enabled);
    }

    #[test]
    fn hold_at_actual_before_motion_start() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        bus.set_actual_position(0, 12_345);
        // no run command: the barrier never arms, targets keep tracking the actual
        for _ in 0 .. 50 {
            tick(&mut controller, &clock);
            let axis = controller.axis(0).unwrap();
            if axis.servo_enabled {
                assert_eq!(axis.csp_target, axis.actual_position);
            }
        }
        assert!(! controller.motion_started());
        assert_eq!(controller.actual_position(0), 12_345);
    }

    #[test]
    fn barrier_releases_all_axes_after_the_delay() {
        let (mut controller, bus, clock) = simulated(3, ControllerConfig::new(4000));
        // stagger the bring-up: each axis is scripted to linger in switch-on-disabled
        for (axis, linger) in [(0usize, 10u16), (1, 60), (2, 110)] {
            bus.script(axis, &vec![0x0250; linger as usize]);
        }
        controller.set_command(true, 1, 1_000);

        let mut armed_tick = None;
        let mut started_tick = None;
        for cycle in 0 .. 1_000u64 {
            tick(&mut controller, &clock);
            if armed_tick.is_none() && controller.all_enabled() {
                armed_tick = Some(cycle);
            }
            if controller.motion_started() {
                started_tick = Some(cycle);
                break;
            }
            // until the barrier fires every enabled axis holds at its actual position
            for axis in 0 .. 3 {
                let axis = controller.axis(axis).unwrap();
                if axis.servo_enabled {
                    assert_eq!(axis.csp_target, axis.actual_position);
                }
            }
        }
        let armed = armed_tick.expect("axes never all enabled");
        let started = started_tick.expect("motion never started");
        // 1 s delay at 4 ms cycles: released exactly 250 cycles after arming
        assert_eq!(started - armed, 250);
    }

    #[test]
    fn delta_advances_and_clamps() {
        let mut config = ControllerConfig::new(4000);
        config.max_delta_per_cycle = 40_000;
        config.barrier_delay_ns = 2 * CYCLE_NS;
        let (mut controller, bus, clock) = simulated(1, config);
        controller.set_command(true, 1, 100_000);

        for _ in 0 .. 30 {
            tick(&mut controller, &clock);
        }
        assert!(controller.motion_started());
        let log = bus.lock().slaves[0].drive.target_log.clone();
        // post-warmup ticks advance by exactly the clamp, never more
        let diffs: Vec<i32> = log.windows(2).map(|pair| pair[1] - pair[0]).collect();
        assert!(diffs.iter().all(|delta| delta.abs() <= 40_000));
        assert_eq!(&diffs[diffs.len() - 5 ..], &[40_000; 5]);

        // a stop command halts advancement without disturbing the barrier
        controller.set_command(false, 1, 100_000);
        tick(&mut controller, &clock);
        tick(&mut controller, &clock);
        let log = bus.lock().slaves[0].drive.target_log.clone();
        assert_eq!(log[log.len() - 1], log[log.len() - 2]);
        assert!(controller.motion_started());
    }

    #[test]
    fn eni_file_parse_and_io_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file,
            "=== Master 0, Slave 2 ===\n  \
             Vendor Id:    0x00001097\n  \
             Product code:  0x00002406\n  \
             Distributed clocks: yes\n").unwrap();
        let slaves = eni::parse_file(file.path()).unwrap();
        assert_eq!(slaves.len(), 1);
        assert_eq!(slaves[0].position, 2);
        assert_eq!(slaves[0].vendor_id, 0x1097);
        assert_eq!(slaves[0].product_code, 0x2406);
        assert!(slaves[0].has_dc);

        assert!(matches!(
            eni::parse_file(std::path::Path::new("/nonexistent/eni.xml")),
            Err(ControllerError::Io(_))));
    }

    #[test]
    fn registry_matches_vendors() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StandardAdapter));
        registry.register(Arc::new(EyouAdapter::default()));
        registry.register(Arc::new(PanasonicAdapter));

        assert_eq!(registry.find(0x0000_1097, 0x0000_2406).unwrap().name(), "EYOU Adapter");
        assert_eq!(registry.find(0x0000_0003, 0x1122_3344).unwrap().name(),
            "Panasonic Adapter");
        assert!(registry.find(0x0000_0042, 0x0000_0001).is_none());
    }

    #[test]
    fn axis_queries_return_sentinels_on_bad_index() {
        let (mut controller, _bus, clock) = simulated(1, ControllerConfig::new(4000));
        tick(&mut controller, &clock);
        assert_eq!(controller.status(7), 0);
        assert_eq!(controller.actual_position(7), 0);
        assert_eq!(controller.adapter_name(7), "");
        assert_eq!(controller.motor_info(7), "");
        assert_eq!(controller.diagnostics(7), Default::default());
        assert_eq!(controller.drive_status(7), Default::default());
        assert_eq!(controller.motor_info(0), "VID: 0x000116C7, PID: 0x003E0402");
        assert_eq!(controller.drive_status(0).status_word, controller.status(0));
    }

    #[test]
    fn shutdown_releases_and_stops_cycling() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        tick(&mut controller, &clock);
        controller.request_stop();
        assert!(! controller.running());
        controller.shutdown();
        assert!(bus.lock().released);
        let cycles = bus.lock().cycles;
        controller.tick();
        assert_eq!(bus.lock().cycles, cycles);
    }

    #[test]
    fn reset_restarts_the_prelude() {
        let (mut controller, bus, clock) = simulated(1, ControllerConfig::new(4000));
        for _ in 0 .. 10 {
            tick(&mut controller, &clock);
        }
        assert!(controller.axis(0).unwrap().servo_enabled);
        controller.reset(0);
        assert!(! controller.axis(0).unwrap().servo_enabled);
        // the drive re-walks the power states under the prelude
        bus.set_status(0, 0x0250);
        for _ in 0 .. 10 {
            tick(&mut controller, &clock);
        }
        assert!(controller.axis(0).unwrap().servo_enabled);
    }

    #[test]
    fn unknown_vendor_without_fallback_is_a_config_error() {
        let master = SimMaster::new();
        let mut config = ControllerConfig::new(4000);
        config.fallback_standard = false;
        config.default_slaves = vec![SlaveSpec {
            position: 0, vendor_id: 0xdead, product_code: 0xbeef,
            }];
        let registry = AdapterRegistry::defaults();
        assert!(matches!(
            Controller::create(master, &registry, config, None),
            Err(ControllerError::Config(_))));
    }
}
