mod common;

use common::{fast_simulator, session_config, MockTransport};
use printfarm::error::PrinterError;
use printfarm::printer::{PrinterDescriptor, PrinterId, PrinterKind, PrinterStatus};
use printfarm::registry::PrinterRegistry;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> PrinterRegistry {
    PrinterRegistry::new(session_config(1_000), fast_simulator(0))
}

#[tokio::test]
async fn blank_descriptors_are_rejected_without_a_session() {
    let registry = registry();
    let err = registry.register(PrinterDescriptor::physical("  ", 7125)).unwrap_err();
    assert!(matches!(err, PrinterError::InvalidDescriptor(_)));
    let err = registry
        .register(PrinterDescriptor::virtual_printer("", PrinterStatus::Idle))
        .unwrap_err();
    assert!(matches!(err, PrinterError::InvalidDescriptor(_)));
    let err = registry.register(PrinterDescriptor::physical("10.0.0.5", 0)).unwrap_err();
    assert!(matches!(err, PrinterError::InvalidDescriptor(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn list_keeps_registration_order() {
    let registry = registry();
    let a = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    let b = registry.register(PrinterDescriptor::physical("127.0.0.1", 1)).unwrap();
    let c = registry
        .register(PrinterDescriptor::virtual_printer("V2", PrinterStatus::Service))
        .unwrap();
    assert!(a < b && b < c);

    let printers = registry.list();
    let names: Vec<&str> = printers.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["V1", "127.0.0.1:1", "V2"]);
    assert_eq!(printers[1].kind, PrinterKind::Physical);
    assert_eq!(printers[1].port, Some(1));
    // stable across calls
    assert_eq!(registry.list(), printers);

    assert_eq!(registry.get(c).unwrap().current_state().status, PrinterStatus::Service);
}

#[tokio::test]
async fn physical_printer_is_offline_until_heard_from() {
    let registry = registry();
    let id = registry.register(PrinterDescriptor::physical("127.0.0.1", 1)).unwrap();
    assert_eq!(registry.get(id).unwrap().current_state().status, PrinterStatus::Offline);
}

#[tokio::test]
async fn removed_printer_is_gone() {
    let registry = registry();
    let id = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    let removed = registry.remove(id).unwrap();
    assert_eq!(removed.name, "V1");
    assert!(matches!(registry.get(id), Err(PrinterError::NotFound(missing)) if missing == id));
    assert_eq!(registry.remove(id).unwrap_err(), PrinterError::NotFound(id));

    // ids are never reused
    let next = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    assert!(next > id);
}

#[tokio::test]
async fn printer_with_command_in_flight_cannot_be_removed() {
    let registry = registry();
    let transport = Arc::new(MockTransport::new(Duration::from_millis(150)));
    let id = registry
        .attach(PrinterDescriptor::virtual_printer("Mock", PrinterStatus::Idle), transport)
        .unwrap();
    let session = registry.get(id).unwrap();

    let pending = tokio::spawn(async move { session.submit(printfarm::Command::home("all").unwrap()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(registry.remove(id).unwrap_err(), PrinterError::InUse(id));

    assert!(pending.await.unwrap().is_ok());
    assert!(registry.remove(id).is_ok());
}

#[tokio::test]
async fn resolve_defaults_to_the_first_printer() {
    let registry = registry();
    assert!(matches!(registry.resolve(None), Err(PrinterError::NotFound(_))));
    let first = registry
        .register(PrinterDescriptor::virtual_printer("V1", PrinterStatus::Idle))
        .unwrap();
    registry
        .register(PrinterDescriptor::virtual_printer("V2", PrinterStatus::Idle))
        .unwrap();
    assert_eq!(registry.resolve(None).unwrap().id(), first);
    assert!(matches!(
        registry.resolve(Some(PrinterId(99))),
        Err(PrinterError::NotFound(PrinterId(99)))
    ));
}
