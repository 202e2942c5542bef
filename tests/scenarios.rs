//! Integration tests for the six named scenarios, the boundary properties
//! and the round-trip properties, run against `FakePlatform`.

use std::sync::Arc;

use hyp_core_ctl::testing::FakePlatform;
use hyp_core_ctl::{CapId, Config, Controller, CpuSet};

fn new_controller(possible: CpuSet) -> (Arc<Controller>, Arc<FakePlatform>) {
    let platform = Arc::new(FakePlatform::new(possible));
    let controller = Controller::new(Config::default(), possible, platform.clone());
    (controller, platform)
}

fn populate_two_vcpus(ctrl: &Controller, cpu0: usize, cpu1: usize) {
    ctrl.populate_vcpu(CapId(1), cpu0).unwrap();
    ctrl.populate_vcpu(CapId(2), cpu1).unwrap();
    ctrl.mark_vcpus_running();
}

#[test]
fn scenario_1_baseline() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();

    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    assert_eq!(ctrl.our_isolated_cpus(), CpuSet::from_iter_cpus([4, 5]));
    assert_eq!(ctrl.final_reserved_cpus(), CpuSet::from_iter_cpus([4, 5]));
    assert!(platform.affinity_calls().is_empty());

    ctrl.shutdown();
}

#[test]
fn scenario_2_thermal_throttle() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    platform.set_throttled(4, true);
    ctrl.on_thermal(4, true);
    ctrl.settle();

    assert!(!ctrl.our_isolated_cpus().contains(4));
    assert_eq!(
        ctrl.final_reserved_cpus(),
        CpuSet::from_iter_cpus([0, 5]),
        "cpu0 is the lowest-id spare"
    );
    let snapshot = ctrl.vcpu_snapshot();
    assert_eq!(snapshot[0], (0, 4, 0));
    assert!(platform.affinity_calls().contains(&(CapId(1), 0)));

    ctrl.shutdown();
}

#[test]
fn scenario_3_thermal_unthrottle() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    platform.set_throttled(4, true);
    ctrl.on_thermal(4, true);
    ctrl.settle();

    platform.set_throttled(4, false);
    ctrl.on_thermal(4, false);
    ctrl.settle();

    assert_eq!(ctrl.final_reserved_cpus(), CpuSet::from_iter_cpus([4, 5]));
    let snapshot = ctrl.vcpu_snapshot();
    assert_eq!(snapshot[0], (0, 4, 4));
    assert!(platform.affinity_calls().contains(&(CapId(1), 4)));

    ctrl.shutdown();
}

#[test]
fn scenario_4_hotplug_offline_of_reserved() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    platform.set_online(5, false);
    ctrl.on_hotplug_offline(5);

    assert!(!ctrl.our_isolated_cpus().contains(5));
    assert_eq!(
        ctrl.final_reserved_cpus(),
        CpuSet::from_iter_cpus([4, 5]),
        "offline counts as reserved"
    );

    ctrl.shutdown();
}

#[test]
fn scenario_5_hotplug_online_of_reserved() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();
    platform.set_online(5, false);
    ctrl.on_hotplug_offline(5);

    platform.set_online(5, true);
    ctrl.on_hotplug_online(5);
    ctrl.settle();

    assert_eq!(ctrl.our_isolated_cpus(), CpuSet::from_iter_cpus([4, 5]));

    ctrl.shutdown();
}

#[test]
fn scenario_6_disable_then_reserve_cpus_change() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    ctrl.set_enable(false).unwrap();
    ctrl.settle();
    ctrl.reserve_cpus_write("6-7").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    assert!(platform.affinity_calls().contains(&(CapId(1), 6)));
    assert!(platform.affinity_calls().contains(&(CapId(2), 7)));
    let snapshot = ctrl.vcpu_snapshot();
    assert_eq!((snapshot[0].2, snapshot[1].2), (6, 7));
    assert_eq!(ctrl.final_reserved_cpus(), CpuSet::from_iter_cpus([6, 7]));

    ctrl.shutdown();
}

#[test]
fn boundary_reserve_cpus_weight_mismatch_rejected() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, _platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    assert!(ctrl.reserve_cpus_write("4-6").is_err());
    ctrl.shutdown();
}

#[test]
fn boundary_reserve_cpus_write_while_enabled_rejected() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, _platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();
    assert!(ctrl.reserve_cpus_write("6-7").is_err());
    ctrl.shutdown();
}

#[test]
fn boundary_enable_before_populated_rejected() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, _platform) = new_controller(possible);
    assert!(ctrl.set_enable(true).is_err());
    ctrl.shutdown();
}

#[test]
fn round_trip_enable_disable_enable() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, _platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();

    ctrl.set_enable(true).unwrap();
    ctrl.settle();
    ctrl.set_enable(false).unwrap();
    ctrl.settle();
    ctrl.set_enable(true).unwrap();
    ctrl.settle();

    assert_eq!(ctrl.final_reserved_cpus(), ctrl.reserve_cpus());
    ctrl.shutdown();
}

#[test]
fn invariant_undo_reservation_clears_isolation_and_freq_floors() {
    let possible = CpuSet::from_iter_cpus(0..8);
    let (ctrl, platform) = new_controller(possible);
    populate_two_vcpus(&ctrl, 4, 5);
    ctrl.reserve_cpus_write("4-5").unwrap();
    ctrl.hcc_min_freq_write("4:1200 5:1200").unwrap();

    ctrl.set_enable(true).unwrap();
    ctrl.settle();
    assert!(!platform.min_freq_calls().is_empty());

    ctrl.set_enable(false).unwrap();
    ctrl.settle();

    assert!(ctrl.our_isolated_cpus().is_empty());
    ctrl.shutdown();
}
