mod common;

use common::{fast_simulator, session_config, MockTransport};
use printfarm::command::Command;
use printfarm::coordinator::CommandCoordinator;
use printfarm::printer::{PrinterDescriptor, PrinterId, PrinterStatus, Position};
use printfarm::registry::PrinterRegistry;
use printfarm::snapshot::StateSnapshotService;
use printfarm::transport::TransportError;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(console_history: usize) -> (Arc<PrinterRegistry>, CommandCoordinator, StateSnapshotService) {
    let registry = Arc::new(PrinterRegistry::new(session_config(1_000), fast_simulator(5)));
    let coordinator = CommandCoordinator::new(registry.clone(), console_history);
    let snapshots = StateSnapshotService::new(registry.clone());
    (registry, coordinator, snapshots)
}

#[tokio::test]
async fn virtual_printer_home_and_heat_scenario() {
    let (registry, coordinator, snapshots) = setup(100);
    let id = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();

    let printers = registry.list();
    assert_eq!(printers.len(), 1);
    assert_eq!(printers[0].name, "V1");
    assert_eq!(snapshots.snapshot(id).unwrap().status, PrinterStatus::Idle);

    let outcome = coordinator.execute(id, Command::jog("X", 25.0).unwrap()).await;
    assert!(outcome.success, "{}", outcome.message);
    let outcome = coordinator.execute(id, Command::home("all").unwrap()).await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Home all sent to V1");
    assert_eq!(snapshots.snapshot(id).unwrap().position, Position { x: 0.0, y: 0.0, z: 0.0 });

    let outcome = coordinator
        .execute(id, Command::set_temperature("bed", 60.0).unwrap())
        .await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(snapshots.snapshot(id).unwrap().target_temperature.bed, 60.0);
}

#[tokio::test]
async fn back_to_back_commands_are_serialized() {
    let (registry, coordinator, _) = setup(100);
    let transport = Arc::new(MockTransport::new(Duration::from_millis(100)));
    let id = registry
        .attach(PrinterDescriptor::virtual_printer("Mock", PrinterStatus::Idle), transport.clone())
        .unwrap();

    let started = Instant::now();
    let (first, second) = tokio::join!(
        coordinator.execute(id, Command::jog("Z", 1.0).unwrap()),
        coordinator.execute(id, Command::jog("Z", 1.0).unwrap()),
    );
    assert!(first.success && second.success);
    assert!(started.elapsed() >= Duration::from_millis(200));
    // identical commands are not coalesced
    assert_eq!(transport.log().len(), 2);
}

#[tokio::test]
async fn repeated_jogs_accumulate() {
    let (registry, coordinator, snapshots) = setup(100);
    let id = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    for _ in 0..3 {
        let outcome = coordinator.execute_on(None, Command::jog("X", 10.0).unwrap()).await;
        assert!(outcome.success, "{}", outcome.message);
    }
    assert_eq!(snapshots.snapshot(id).unwrap().position.x, 30.0);
}

#[tokio::test]
async fn printers_run_independently() {
    let (registry, coordinator, _) = setup(100);
    let slow = Arc::new(MockTransport::new(Duration::from_millis(150)));
    let a = registry
        .attach(PrinterDescriptor::virtual_printer("A", PrinterStatus::Idle), slow.clone())
        .unwrap();
    let b = registry
        .attach(PrinterDescriptor::virtual_printer("B", PrinterStatus::Idle), slow.clone())
        .unwrap();

    let started = Instant::now();
    let (first, second) = tokio::join!(
        coordinator.execute(a, Command::home("all").unwrap()),
        coordinator.execute(b, Command::home("all").unwrap()),
    );
    assert!(first.success && second.success);
    assert!(started.elapsed() < Duration::from_millis(290));
}

#[tokio::test]
async fn failures_become_unsuccessful_outcomes() {
    let (registry, coordinator, snapshots) = setup(100);

    let outcome = coordinator.execute_on(None, Command::home("all").unwrap()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No printers registered");

    let outcome = coordinator.execute(PrinterId(42), Command::home("all").unwrap()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Printer 42 not found");

    let transport = Arc::new(MockTransport::new(Duration::ZERO));
    transport.fail_with(Some(TransportError::Fault("Move out of range".to_string())));
    let id = registry
        .attach(PrinterDescriptor::virtual_printer("Mock", PrinterStatus::Idle), transport)
        .unwrap();
    let outcome = coordinator.execute(id, Command::jog("X", 500.0).unwrap()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Device error: Move out of range");
    assert_eq!(snapshots.snapshot(id).unwrap().status, PrinterStatus::Error);
}

#[tokio::test]
async fn timeout_is_reported_and_printer_goes_offline() {
    let registry = Arc::new(PrinterRegistry::new(session_config(40), fast_simulator(0)));
    let coordinator = CommandCoordinator::new(registry.clone(), 10);
    let transport = Arc::new(MockTransport::new(Duration::from_millis(300)));
    let id = registry
        .attach(PrinterDescriptor::virtual_printer("Slow", PrinterStatus::Idle), transport)
        .unwrap();

    let outcome = coordinator.execute(id, Command::home("all").unwrap()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Printer 1 did not respond within 40ms");
    assert_eq!(registry.get(id).unwrap().current_state().status, PrinterStatus::Offline);
}

#[tokio::test]
async fn console_keeps_a_bounded_history() {
    let (registry, coordinator, _) = setup(3);
    let id = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    for n in 1..=4 {
        coordinator.execute(id, Command::jog("Y", n as f64).unwrap()).await;
    }
    coordinator.execute(id, Command::raw("G29").unwrap()).await;

    let console = coordinator.console(id);
    assert_eq!(console.len(), 3);
    assert_eq!(console[0].command, "move Y+3");
    let last = &console[2];
    assert_eq!(last.command, "gcode 'G29'");
    assert!(!last.success);
    assert_eq!(last.message, "Device error: Unknown command:\"G29\"");

    coordinator.forget(id);
    assert!(coordinator.console(id).is_empty());
}

#[tokio::test]
async fn console_records_commands_whose_caller_went_away() {
    let registry = Arc::new(PrinterRegistry::new(session_config(1_000), fast_simulator(0)));
    let coordinator = Arc::new(CommandCoordinator::new(registry.clone(), 10));
    let transport = Arc::new(MockTransport::new(Duration::from_millis(100)));
    let id = registry
        .attach(PrinterDescriptor::virtual_printer("Slow", PrinterStatus::Idle), transport.clone())
        .unwrap();

    let caller = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.execute(id, Command::home("all").unwrap()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.log(), vec!["G28"]);
    let console = coordinator.console(id);
    assert_eq!(console.len(), 1);
    assert_eq!(console[0].command, "home all");
    assert!(console[0].success);
}
