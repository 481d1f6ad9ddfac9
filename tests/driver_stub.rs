use npu_drv_stub::drv::{self, Driver, ResourceKind, SqType};
use npu_drv_stub::ts::{Interrupt, REPORT_SLOT_SIZE, SimTaskScheduler};
use npu_drv_stub::{CreditPolicy, DrvError, ErrorKind, StubConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn setup(config: StubConfig) -> (Driver, Arc<SimTaskScheduler>) {
    let (driver, sim) = Driver::with_sim(config).unwrap();
    for handle in 0..driver.device_count() {
        driver.open_device(handle).unwrap();
    }
    (driver, sim)
}

fn send(driver: &Driver, device: u32, qos: u8, tag: u64) {
    let slot = driver.sq_mem_get(device, SqType::Normal, qos).unwrap();
    unsafe { slot.write(&tag.to_le_bytes()).unwrap() };
    driver.sq_msg_send(device, SqType::Normal, slot.addr()).unwrap();
}

fn tag_of(report: &drv::Report) -> u64 {
    u64::from_le_bytes(report.as_bytes()[..8].try_into().unwrap())
}

#[test]
fn submit_execute_report_round_trip() {
    let (driver, sim) = setup(StubConfig::new().with_max_devices(1));
    for tag in 0..10 {
        send(&driver, 0, 0, tag);
    }
    assert_eq!(sim.interrupt_count(0, Interrupt::TaskQueue), 10);
    assert_eq!(sim.execute(0).unwrap(), 10);
    assert_eq!(driver.report_interrupt(0).unwrap(), 10);

    for tag in 0..10 {
        let report = driver.cq_report_get(0, SqType::Normal).unwrap();
        assert_eq!(tag_of(&report), tag);
        driver.report_release(0, SqType::Normal).unwrap();
    }
    assert_eq!(driver.device(0).unwrap().reports().pending(), 0);
}

#[test]
fn consumer_blocks_until_report_arrives() {
    let (driver, sim) = setup(StubConfig::new().with_max_devices(1));
    let driver = Arc::new(driver);

    let consumer = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || driver.cq_report_get(0, SqType::Normal).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!consumer.is_finished());

    send(&driver, 0, 2, 0xfeed);
    sim.execute(0).unwrap();
    driver.report_interrupt(0).unwrap();

    let report = consumer.join().unwrap();
    assert_eq!(tag_of(&report), 0xfeed);
    assert_eq!(report.as_bytes()[8], 2);
}

#[test]
fn full_qos_ring_drains_in_one_pass() {
    let (driver, sim) = setup(StubConfig::new().with_max_devices(1));
    let dev = driver.device(0).unwrap();

    let slots: Vec<_> = (0..511).map(|_| dev.reserve(0).unwrap()).collect();
    let err = dev.reserve(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    // The first slot holds everything back until it is submitted last.
    for slot in &slots[1..] {
        dev.submit(slot.addr()).unwrap();
    }
    assert_eq!(sim.pending_commands(0, 0).unwrap(), 0);
    dev.submit(slots[0].addr()).unwrap();

    assert_eq!(sim.pending_commands(0, 0).unwrap(), 511);
    assert_eq!(sim.interrupt_count(0, Interrupt::TaskQueue), 1);
    let (head, tail) = dev.queue_cursors(0).unwrap();
    assert_eq!(head, tail);
}

#[test]
fn downstream_backpressure_and_recovery() {
    for policy in [CreditPolicy::Heuristic, CreditPolicy::EveryCycle] {
        let config = StubConfig::new()
            .with_max_devices(1)
            .with_ts_queue_sizes(4, 16)
            .with_credit_policy(policy);
        let (driver, sim) = setup(config);

        for tag in 0..3 {
            send(&driver, 0, 1, tag);
        }
        let slot = driver.sq_mem_get(0, SqType::Normal, 1).unwrap();
        let err = driver.sq_msg_send(0, SqType::Normal, slot.addr()).unwrap_err();
        assert!(matches!(err, DrvError::Inner(_)), "{policy:?}");

        assert_eq!(sim.execute(0).unwrap(), 3);
        driver.device(0).unwrap().drain(1).unwrap();
        assert_eq!(sim.pending_commands(0, 1).unwrap(), 1);
        assert_eq!(sim.interrupt_count(0, Interrupt::TaskQueue), 4);
    }
}

#[test]
fn report_queue_overflow_waits_for_consumer() {
    let config = StubConfig::new()
        .with_max_devices(1)
        .with_report_queue_size(4);
    let (driver, sim) = setup(config);
    for tag in 0..6 {
        send(&driver, 0, 0, tag);
    }
    sim.execute(0).unwrap();

    assert_eq!(driver.report_interrupt(0).unwrap(), 3);
    for tag in 0..3 {
        assert_eq!(tag_of(&driver.cq_report_get(0, SqType::Normal).unwrap()), tag);
    }
    assert_eq!(driver.report_interrupt(0).unwrap(), 3);
    for tag in 3..6 {
        assert_eq!(tag_of(&driver.cq_report_get(0, SqType::Normal).unwrap()), tag);
    }
    assert_eq!(driver.report_interrupt(0).unwrap(), 0);
}

#[test]
fn callback_mode_bypasses_queues() {
    let (driver, sim) = setup(StubConfig::new().with_max_devices(1));
    let a = driver.sq_mem_get(0, SqType::Callback, 0).unwrap();
    let b = driver.sq_mem_get(0, SqType::Callback, 0).unwrap();
    assert_eq!(a.addr(), b.addr());
    driver.sq_msg_send(0, SqType::Callback, a.addr()).unwrap();

    let report = driver.cq_report_get(0, SqType::Callback).unwrap();
    assert_eq!(report.as_bytes(), &[0u8; REPORT_SLOT_SIZE]);
    assert_eq!(sim.interrupt_count(0, Interrupt::TaskQueue), 0);
    assert_eq!(driver.device(0).unwrap().queue_cursors(0).unwrap(), (0, 0));
}

#[test]
fn devices_do_not_share_state() {
    let (driver, sim) = setup(StubConfig::new().with_max_devices(2));
    send(&driver, 1, 0, 42);
    assert_eq!(sim.pending_commands(0, 0).unwrap(), 0);
    assert_eq!(sim.pending_commands(1, 0).unwrap(), 1);

    // A slot of device 1 is unknown to device 0.
    let slot = driver.sq_mem_get(1, SqType::Normal, 0).unwrap();
    assert!(matches!(
        driver.sq_msg_send(0, SqType::Normal, slot.addr()),
        Err(DrvError::NotFound(_))
    ));

    assert_eq!(driver.resource_id_alloc(0, drv::ResourceIdType::Stream).unwrap(), 0);
    assert_eq!(driver.resource_id_alloc(1, drv::ResourceIdType::Stream).unwrap(), 0);
    let d0 = driver.device(0).unwrap();
    assert_eq!(d0.ids_in_use(ResourceKind::Stream), 1);
}

#[test]
fn memory_scenario_through_front_door() {
    let (driver, _sim) = setup(StubConfig::new().with_max_devices(1));
    let p1 = driver.mem_alloc(0, 64).unwrap();
    assert_eq!(p1, 0x1000_0000);
    let p2 = driver.mem_alloc(0, 64).unwrap();
    assert_eq!(p2, p1 + 512);
    driver.mem_free(0, p1).unwrap();
    driver.mem_free(0, p2).unwrap();
    assert_eq!(driver.mem_alloc(0, 1024).unwrap(), p1);

    assert!(matches!(driver.mem_free(0, p2), Err(DrvError::NotFound(_))));
    assert_eq!(driver.mem_alloc(0, 0).unwrap_err().kind(), ErrorKind::InvalidArgument);

    let dev = driver.device(0).unwrap();
    dev.memory().reset();
    assert_eq!(dev.memory().blocks().blocks().len(), 1);
}

#[test]
fn global_driver_is_shared() {
    let a = drv::acquire().unwrap();
    let b = drv::acquire().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.open_devices().len(), a.device_count() as usize);
    drv::release();
    let c = drv::acquire().unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    drv::release();
}

#[test]
fn global_driver_delivers_reports() {
    let (driver, sim) = drv::acquire_with_sim().unwrap();
    let slot = driver.sq_mem_get(0, SqType::Normal, 1).unwrap();
    unsafe { slot.write(&0xabcd_u64.to_le_bytes()).unwrap() };
    driver.sq_msg_send(0, SqType::Normal, slot.addr()).unwrap();

    assert_eq!(sim.execute(0).unwrap(), 1);
    assert_eq!(driver.report_interrupt(0).unwrap(), 1);
    let report = driver.cq_report_get(0, SqType::Normal).unwrap();
    assert_eq!(tag_of(&report), 0xabcd);
    assert_eq!(report.as_bytes()[8], 1);
}
