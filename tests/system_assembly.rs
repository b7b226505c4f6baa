//! Exercises `System::create` purely through its public surface: wiring,
//! construction validation, and running a CP program on its own thread
//! rather than by calling `Cp::step` directly.

use std::time::Duration;

use cyber962_core::system::{System, SystemConfig};

fn config(central_processors: usize, input_output_units: usize) -> SystemConfig {
    SystemConfig {
        identifier: "assembly-test".into(),
        memory_bytes: 64 * 1024 * 1024,
        central_processors,
        input_output_units,
    }
}

#[test]
fn a_two_cp_three_iou_system_wires_the_documented_port_count() {
    let system = System::create(config(2, 3)).unwrap();
    assert_eq!(system.central_memory().port_count(), 5);
    assert!(system.central_processor(1).is_some());
    assert!(system.input_output_unit(2).is_some());
    assert!(system.input_output_unit(3).is_none());
}

#[test]
fn every_iou_is_fully_populated_with_peripheral_processors() {
    let system = System::create(config(1, 1)).unwrap();
    let iou = system.input_output_unit(0).unwrap();
    assert_eq!(iou.peripheral_processors().len(), cyber962_core::iou::PERIPHERAL_PROCESSOR_COUNT);
}

#[test]
fn rejects_zero_input_output_units() {
    assert!(System::create(config(1, 0)).is_err());
}

#[test]
fn rejects_zero_central_processors() {
    assert!(System::create(config(0, 1)).is_err());
}

#[test]
fn a_cp_thread_runs_an_immediate_enter_store_reload_program_to_completion() {
    let system = System::create(config(1, 1)).unwrap();
    let cp = system.central_processor(0).unwrap();

    // Scenario 1 from spec.md §8, loaded and run through the public
    // thread-driven API instead of calling `Cp::step` inline.
    cp.with_cp_mut(|cp| {
        cp.registers.set_a(2, 0x1000);
        cp.registers.set_a(3, 0x1000);
        let program = [0x3D, 0x21, 0x85, 0x20, 0x00, 0x00, 0x82, 0x30, 0x00, 0x00];
        cp.write_bytes(0, &program).unwrap();
    });

    cp.start();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let p = cp.with_cp(|cp| cp.registers.p);
        if p >= 10 || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cp.stop();

    cp.with_cp(|cp| {
        assert_eq!(cp.registers.x(0), 0);
        assert_eq!(cp.registers.x(1), 2);
    });
    assert_eq!(cp.last_fault(), None);
}

#[test]
fn an_illegal_opcode_latches_as_the_cps_last_fault() {
    let system = System::create(config(1, 1)).unwrap();
    let cp = system.central_processor(0).unwrap();

    cp.with_cp_mut(|cp| {
        // 0xFF names no instruction this core implements.
        cp.write_bytes(0, &[0xFF, 0x00]).unwrap();
    });

    cp.start();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while cp.last_fault().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    cp.stop();

    assert!(matches!(
        cp.last_fault(),
        Some(cyber962_core::Fault::IllegalInstruction { .. })
    ));
}
