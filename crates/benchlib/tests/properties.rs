//! Cross-crate behavior: sessions, drivers and transports working together.

use std::sync::Arc;
use std::time::Duration;

use benchlib::keysight::e36xx::E3632A;
use benchlib::keysight::{E36xx, Key33220, U2751a};
use benchlib::kikusui::Pmx;
use benchlib::prologix::{Controller, ControllerConfig};
use benchlib::scpi::{Session, SessionConfig};
use benchlib::srs::Ds345;
use benchlib::{
    BenchResourceManager, DcPower, Error, ErrorKind, FunctionGenerator, Instrument,
    OperationMode, Switch, TriggerSource, Waveform,
};
use benchlib_test_harness::{MockTransport, ScpiSimulator};

const E3631A_IDN: &str = "Agilent Technologies,E3631A,0,2.1-5.0-1.0";
const KEY33220_IDN: &str = "Agilent Technologies,33220A,MY44012345,2.02-2.02-22-2";

#[tokio::test]
async fn concurrent_callers_never_interleave() {
    let sim = ScpiSimulator::new(E3631A_IDN).scope_header("INST:SEL");
    let psu = Arc::new(
        E36xx::builder()
            .build_with_transport(Box::new(sim.transport()))
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for round in 0..8u32 {
        let psu = Arc::clone(&psu);
        tasks.push(tokio::spawn(async move {
            let ch = (round % 3) as usize;
            let volts = if ch == 2 { -f64::from(round) } else { f64::from(round % 6) };
            psu.set_voltage_level(ch, volts).await.unwrap();
            psu.get_voltage_level(ch).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every payload is one whole line that selects its output first.
    for line in sim.wire_log().lines().iter().skip(1) {
        assert!(line.starts_with("INST:SEL "), "interleaved payload {line:?}");
        assert_eq!(line.matches(";:").count(), 1, "interleaved payload {line:?}");
    }
    assert_eq!(sim.wire_log().len(), 1 + 16);
}

#[tokio::test]
async fn alias_resolution_is_idempotent() {
    let sim = ScpiSimulator::new(KEY33220_IDN);
    let fgen = Key33220::builder()
        .alias("CH1", "Stimulus")
        .build_with_transport(Box::new(sim.transport()))
        .await
        .unwrap();

    let first = fgen.resolve_channel("Stimulus").unwrap();
    let second = fgen.resolve_channel("Stimulus").unwrap();
    assert_eq!(first, second);
    assert_eq!(fgen.resolve_channel("CH1").unwrap(), first);
    assert_eq!(
        fgen.resolve_channel("stimulus").unwrap_err().kind(),
        ErrorKind::UnknownChannel
    );
}

#[tokio::test]
async fn settings_round_trip_through_the_simulator() {
    let sim = ScpiSimulator::new("StanfordResearchSystems,DS345,32145,ver1.04")
        .with_register("MENA", "0");
    let fgen = Ds345::builder()
        .build_with_transport(Box::new(sim.transport()))
        .await
        .unwrap();

    fgen.set_waveform(0, Waveform::Square).await.unwrap();
    fgen.set_frequency(0, 12_345.678).await.unwrap();
    fgen.set_amplitude(0, 2.5).await.unwrap();
    fgen.set_burst_count(0, 7).await.unwrap();
    fgen.set_trigger_source(0, TriggerSource::External)
        .await
        .unwrap();
    fgen.set_operation_mode(0, OperationMode::Sweep).await.unwrap();

    assert_eq!(fgen.get_waveform(0).await.unwrap(), Waveform::Square);
    assert_eq!(fgen.get_frequency(0).await.unwrap(), 12_345.678);
    assert_eq!(fgen.get_amplitude(0).await.unwrap(), 2.5);
    assert_eq!(fgen.get_burst_count(0).await.unwrap(), 7);
    assert_eq!(
        fgen.get_trigger_source(0).await.unwrap(),
        TriggerSource::External
    );
    assert_eq!(fgen.get_operation_mode(0).await.unwrap(), OperationMode::Sweep);
}

#[tokio::test]
async fn capability_gating_leaves_the_cache_alone() {
    let sim = ScpiSimulator::new(E3631A_IDN).scope_header("INST:SEL");
    let psu = E36xx::builder()
        .build_with_transport(Box::new(sim.transport()))
        .await
        .unwrap();
    psu.set_voltage_level(0, 3.3).await.unwrap();

    let before = psu.core().cache().snapshot();
    let sent = sim.wire_log().len();
    let inst: &dyn Instrument = &psu;

    assert!(inst.as_function_generator().is_none());
    assert!(matches!(inst.switch(), Err(e) if e.is_not_supported()));
    let dc = inst.dc_power().unwrap();
    assert!(dc.set_ovp_enabled(0, true).await.unwrap_err().is_not_supported());
    assert!(
        dc.configure_current_limit(0, benchlib::CurrentLimitBehavior::Trip, 0.5)
            .await
            .unwrap_err()
            .is_not_supported()
    );

    assert_eq!(psu.core().cache().snapshot(), before);
    assert_eq!(sim.wire_log().len(), sent);
}

#[tokio::test]
async fn gpib_address_is_sent_once_per_device_run() {
    let mut mock = MockTransport::new();
    let log = mock.wire_log();
    for directive in [
        "++mode 1",
        "++auto 0",
        "++eoi 1",
        "++eos 2",
        "++read_tmo_ms 500",
        "++addr 5",
        "*IDN?",
    ] {
        mock.expect_send(format!("{directive}\n").as_bytes());
    }
    mock.expect(b"++read eoi\n", b"HEWLETT-PACKARD,E3632A,0,1.7-5.0-1.0\n");
    mock.expect_send(b"VOLT 12\n");
    mock.expect_send(b"CURR 2\n");

    let gpib = Controller::new(Box::new(mock), ControllerConfig::default())
        .await
        .unwrap();
    let manager = BenchResourceManager::new().with_gpib_controller(0, gpib);
    let psu = E36xx::builder()
        .model(E3632A)
        .build_with_transport(manager.open_str("GPIB0::5::INSTR").await.unwrap())
        .await
        .unwrap();
    assert_eq!(psu.model().await.unwrap(), "E3632A");

    psu.set_voltage_level(0, 12.0).await.unwrap();
    psu.set_current_limit(0, 2.0).await.unwrap();
    assert_eq!(log.count_starting_with("++addr"), 1);
}

#[tokio::test]
async fn same_axis_connection_sends_nothing() {
    let sim = ScpiSimulator::new("Agilent Technologies,U2751A,MY50010001,A.02.02");
    let matrix = U2751a::builder()
        .build_with_transport(Box::new(sim.transport()))
        .await
        .unwrap();

    let err = matrix.connect("Col1", "Col2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTopology);
    assert!(matches!(err, Error::InvalidTopology(_)));
    assert_eq!(sim.wire_log().count_starting_with("ROUT:CLOS"), 0);

    matrix.connect("Row2", "Col3").await.unwrap();
    assert_eq!(sim.wire_log().count_starting_with("ROUT:CLOS (@203)"), 1);
}

#[tokio::test]
async fn timeout_fails_only_that_call() {
    let sim = ScpiSimulator::new(KEY33220_IDN).with_register("FREQ", "1000");
    let config = SessionConfig::default().timeout(Duration::from_millis(50));
    let fgen = Key33220::builder()
        .build(Session::new(Box::new(sim.transport()), config))
        .await
        .unwrap();

    sim.stall_next_query();
    let err = fgen.get_frequency(0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.command(), Some("FREQ?"));

    assert_eq!(fgen.get_frequency(0).await.unwrap(), 1000.0);
    fgen.set_frequency(0, 2340.0).await.unwrap();
    assert_eq!(fgen.get_frequency(0).await.unwrap(), 2340.0);
}

#[tokio::test]
async fn protected_supply_over_a_simulated_socket() {
    let sim = ScpiSimulator::new("KIKUSUI,PMX70-1A,AB123456,1.52")
        .with_register("CURR:PROT:STAT", "0");
    let psu = Pmx::builder()
        .build_with_transport(Box::new(sim.transport()))
        .await
        .unwrap();
    let dc: &dyn DcPower = &psu;

    dc.set_voltage_level(0, 50.0).await.unwrap();
    dc.configure_current_limit(0, benchlib::CurrentLimitBehavior::Trip, 0.25)
        .await
        .unwrap();
    dc.configure_ovp(0, true, 60.0).await.unwrap();

    let ch = dc.channel("CH1").unwrap();
    assert_eq!(ch.voltage_level().await.unwrap(), 50.0);
    assert_eq!(ch.current_limit().await.unwrap(), 0.25);
    assert_eq!(ch.ovp_limit().await.unwrap(), 60.0);
}
