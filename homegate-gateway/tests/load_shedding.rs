mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{FakeDevice, LineHandle, METER, empty_registry, millis, secs};
use homegate_core::{DeviceId, DeviceRole, EnergyConfig};
use homegate_gateway::{Alarm, LoadShedder, Registry};

#[derive(Default)]
struct CountingAlarm(AtomicUsize);

impl Alarm for CountingAlarm {
    fn sound(&self, _freq_hz: u32, _duration: Duration) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

impl CountingAlarm {
    fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

fn energy() -> EnergyConfig {
    EnergyConfig {
        max_power_w: 3000,
        buffer_power_w: 200,
        cut_off_delay_s: 10,
        restore_delay_s: 60,
        ..EnergyConfig::default()
    }
}

struct Rig {
    registry: Registry,
    shedder: LoadShedder,
    alarm: CountingAlarm,
    energy: EnergyConfig,
    meter: LineHandle,
    t0: Instant,
}

impl Rig {
    /// Meter plus the given `(id, priority)` loads, all running.
    fn new(loads: &[(&str, u8)]) -> (Self, Vec<LineHandle>) {
        let mut registry = empty_registry();
        let (meter_device, meter) = FakeDevice::running(METER, DeviceRole::Unknown, 0, 0.0);
        registry.insert(Box::new(meter_device));

        let lines = loads
            .iter()
            .map(|(id, priority)| {
                let (device, line) = FakeDevice::running(id, DeviceRole::Load, *priority, 1000.0);
                registry.insert(Box::new(device));
                line
            })
            .collect();

        let rig = Self {
            registry,
            shedder: LoadShedder::new(millis(250)),
            alarm: CountingAlarm::default(),
            energy: energy(),
            meter,
            t0: Instant::now(),
        };
        (rig, lines)
    }

    async fn meter_reads(&mut self, power_w: f32) {
        self.meter.set_power(power_w);
        self.registry.poll_all().await;
    }

    /// Run checks every 250 ms over `[from_ms, to_ms]` after `t0`.
    async fn run(&mut self, from_ms: u64, to_ms: u64) {
        for ms in (from_ms..=to_ms).step_by(250) {
            let now = self.t0 + millis(ms);
            self.shedder
                .update(&mut self.registry, &self.energy, &self.alarm, now)
                .await;
        }
    }

    fn shed_ids(&self) -> Vec<String> {
        self.shedder
            .shed_records()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }
}

#[tokio::test]
async fn sustained_overload_sheds_exactly_one_load() {
    let (mut rig, lines) = Rig::new(&[("A_0", 20), ("B_0", 80), ("C_0", 50)]);
    rig.meter_reads(3500.0).await;

    rig.run(0, 11_000).await;

    assert_eq!(rig.shed_ids(), vec!["B_0"]);
    assert_eq!(lines[1].switch_calls(), vec![false]);
    assert!(lines[0].switch_calls().is_empty());
    assert!(lines[2].switch_calls().is_empty());
    assert_eq!(rig.shedder.shed_records()[0].shed_at, rig.t0 + millis(10_250));
    assert!(rig.shedder.is_overloaded());
}

#[tokio::test]
async fn cut_off_delay_must_be_exceeded() {
    let (mut rig, lines) = Rig::new(&[("A_0", 20)]);
    rig.meter_reads(3500.0).await;

    rig.run(0, 10_000).await;
    assert!(lines[0].switch_calls().is_empty());

    rig.run(10_250, 10_250).await;
    assert_eq!(lines[0].switch_calls(), vec![false]);
}

#[tokio::test]
async fn continued_overload_sheds_next_after_another_delay() {
    let (mut rig, lines) = Rig::new(&[("A_0", 20), ("B_0", 80), ("C_0", 50)]);
    rig.meter_reads(3500.0).await;

    rig.run(0, 20_250).await;
    assert_eq!(rig.shed_ids(), vec!["B_0"]);

    rig.run(20_500, 20_500).await;
    assert_eq!(rig.shed_ids(), vec!["B_0", "C_0"]);
    assert!(lines[0].switch_calls().is_empty());
}

#[tokio::test]
async fn restores_last_shed_first_one_per_delay() {
    let (mut rig, lines) = Rig::new(&[("B_0", 80), ("C_0", 50)]);
    rig.meter_reads(3500.0).await;
    rig.run(0, 20_500).await;
    assert_eq!(rig.shed_ids(), vec!["B_0", "C_0"]);

    rig.meter_reads(2500.0).await;
    assert!(!rig.registry.get_device(&DeviceId::from("C_0")).unwrap().state().on);

    // C was shed at 20.5 s; it must wait more than the restore delay.
    rig.run(20_750, 80_500).await;
    assert_eq!(rig.shed_ids(), vec!["B_0", "C_0"]);

    rig.run(80_750, 80_750).await;
    assert_eq!(rig.shed_ids(), vec!["B_0"]);
    assert_eq!(lines[1].switch_calls(), vec![false, true]);
    assert_eq!(rig.shedder.shed_records()[0].shed_at, rig.t0 + millis(80_750));

    rig.run(81_000, 140_750).await;
    assert_eq!(rig.shed_ids(), vec!["B_0"]);

    rig.run(141_000, 141_000).await;
    assert!(rig.shedder.shed_records().is_empty());
    assert_eq!(lines[0].switch_calls(), vec![false, true]);
}

#[tokio::test]
async fn no_restore_inside_buffer_band() {
    let (mut rig, lines) = Rig::new(&[("A_0", 30)]);
    rig.meter_reads(3500.0).await;
    rig.run(0, 10_250).await;
    assert_eq!(rig.shed_ids(), vec!["A_0"]);

    rig.meter_reads(2900.0).await;
    rig.run(10_500, 200_000).await;

    assert!(!rig.shedder.is_overloaded());
    assert_eq!(rig.shed_ids(), vec!["A_0"]);
    assert_eq!(lines[0].switch_calls(), vec![false]);
}

#[tokio::test]
async fn equal_priorities_shed_lowest_identifier_first() {
    let (mut rig, lines) = Rig::new(&[("CC_0", 40), ("AA_0", 40), ("BB_0", 40)]);
    rig.meter_reads(3500.0).await;

    rig.run(0, 10_250).await;

    assert_eq!(rig.shed_ids(), vec!["AA_0"]);
    assert_eq!(lines[1].switch_calls(), vec![false]);
}

#[tokio::test]
async fn ineligible_devices_are_never_shed() {
    let mut registry = empty_registry();
    let (meter_device, meter) = FakeDevice::running(METER, DeviceRole::Unknown, 0, 3500.0);
    registry.insert(Box::new(meter_device));

    let (critical, critical_line) = FakeDevice::running("FRIDGE_0", DeviceRole::Load, 0, 150.0);
    let (valve, valve_line) = FakeDevice::running("TRV_0", DeviceRole::Trv, 90, 0.0);
    let (idle, idle_line) = FakeDevice::new("OVEN_0", DeviceRole::Load, 90);
    registry.insert(Box::new(critical));
    registry.insert(Box::new(valve));
    registry.insert(Box::new(idle));
    meter.set_power(3500.0);
    registry.poll_all().await;

    let mut shedder = LoadShedder::new(millis(250));
    let alarm = CountingAlarm::default();
    let t0 = Instant::now();
    for s in 0..=30 {
        shedder.update(&mut registry, &energy(), &alarm, t0 + secs(s)).await;
    }

    assert!(shedder.shed_records().is_empty());
    assert!(critical_line.switch_calls().is_empty());
    assert!(valve_line.switch_calls().is_empty());
    assert!(idle_line.switch_calls().is_empty());
    assert!(shedder.is_overloaded());
}

#[tokio::test]
async fn failed_shed_leaves_no_record_and_retries() {
    let (mut rig, lines) = Rig::new(&[("A_0", 60)]);
    lines[0].lock().reject_commands = true;
    rig.meter_reads(3500.0).await;

    rig.run(0, 10_750).await;

    assert!(rig.shedder.shed_records().is_empty());
    assert_eq!(lines[0].switch_calls(), vec![false, false, false]);
}

#[tokio::test]
async fn failed_restore_keeps_entry_and_rearms() {
    let (mut rig, lines) = Rig::new(&[("A_0", 60)]);
    rig.meter_reads(3500.0).await;
    rig.run(0, 10_250).await;

    lines[0].lock().reject_commands = true;
    rig.meter_reads(1000.0).await;
    rig.run(10_500, 70_500).await;

    assert_eq!(rig.shed_ids(), vec!["A_0"]);
    assert_eq!(rig.shedder.shed_records()[0].shed_at, rig.t0 + millis(70_500));
    assert_eq!(lines[0].switch_calls(), vec![false, true]);
}

#[tokio::test]
async fn alarm_sounds_every_check_while_overloaded() {
    let (mut rig, _lines) = Rig::new(&[]);
    rig.meter_reads(3500.0).await;
    rig.run(0, 1_000).await;
    assert_eq!(rig.alarm.count(), 5);

    rig.energy.alarm_enabled = false;
    rig.run(1_250, 2_000).await;
    assert_eq!(rig.alarm.count(), 5);

    rig.meter_reads(100.0).await;
    rig.energy.alarm_enabled = true;
    rig.run(2_250, 3_000).await;
    assert_eq!(rig.alarm.count(), 5);
    assert!(!rig.shedder.is_overloaded());
}

#[tokio::test]
async fn checks_are_rate_limited() {
    let (mut rig, _lines) = Rig::new(&[]);
    rig.meter_reads(3500.0).await;

    for ms in 0..250 {
        let now = rig.t0 + millis(ms);
        rig.shedder
            .update(&mut rig.registry, &rig.energy, &rig.alarm, now)
            .await;
    }
    assert_eq!(rig.alarm.count(), 1);
}

#[tokio::test]
async fn missing_meter_reads_zero() {
    let mut registry = empty_registry();
    let (load, line) = FakeDevice::running("A_0", DeviceRole::Load, 60, 5000.0);
    registry.insert(Box::new(load));

    assert_eq!(registry.total_power(&DeviceId::from(METER)), 0.0);
    assert_eq!(registry.total_power(&DeviceId::from("A_0")), 5000.0);

    let mut shedder = LoadShedder::new(millis(250));
    let alarm = CountingAlarm::default();
    let t0 = Instant::now();
    for s in 0..=20 {
        shedder.update(&mut registry, &energy(), &alarm, t0 + secs(s)).await;
    }
    assert!(!shedder.is_overloaded());
    assert!(line.switch_calls().is_empty());
}

#[tokio::test]
async fn forget_drops_record() {
    let (mut rig, _lines) = Rig::new(&[("A_0", 60)]);
    rig.meter_reads(3500.0).await;
    rig.run(0, 10_250).await;

    let id = DeviceId::from("A_0");
    assert!(rig.shedder.is_shed(&id));
    assert!(rig.shedder.forget(&id));
    assert!(!rig.shedder.forget(&id));
    assert!(rig.shedder.shed_records().is_empty());
}
