//! Integration tests for transport fallback
//!
//! Both peers register transports whose establishment fails, so every
//! content walks down the preference list through transport-replace until
//! something works or nothing is left.

mod common;

use std::sync::Arc;

use common::{FailingTransport, Pair, next, subscribe, wait_until_idle};
use jingle_common::NS_IBB_TRANSPORT;
use jingle_common::protocol::{JingleAction, Reason};
use jingle_session::loopback::LoopbackBytestreams;
use jingle_session::{
    InBandTransport, SessionEvent, TransferFailure, TransferOutcome, TransportPlugin,
};
use tempfile::TempDir;
use tokio::fs;

const DOOMED: [&str; 3] = ["urn:test:doomed:a", "urn:test:doomed:b", "urn:test:doomed:c"];

fn doomed_transports() -> Vec<Arc<dyn TransportPlugin>> {
    DOOMED
        .iter()
        .map(|&ns| Arc::new(FailingTransport(ns)) as Arc<dyn TransportPlugin>)
        .collect()
}

#[tokio::test]
async fn test_exhausted_fallback_terminates_once() {
    let pair = Pair::with_transports(doomed_transports);
    let romeo_dir = TempDir::new().unwrap();
    let juliet_dir = TempDir::new().unwrap();
    let source = romeo_dir.path().join("report.pdf");
    fs::write(&source, vec![7u8; 1000]).await.unwrap();

    let mut offers = subscribe(&pair.juliet.registry.events().offers);
    let mut romeo_sessions = subscribe(&pair.romeo.registry.events().sessions);
    let mut outgoing = pair
        .romeo
        .files
        .send_file(&source, &pair.juliet.jid)
        .await
        .unwrap();

    let mut incoming = next(&mut offers)
        .await
        .accept(juliet_dir.path().join("report.pdf"))
        .await
        .unwrap();

    let SessionEvent::Terminated {
        reason,
        failed_transports,
        ..
    } = next(&mut romeo_sessions).await;
    assert_eq!(reason, Reason::FailedTransport);
    assert_eq!(failed_transports, DOOMED.map(String::from).to_vec());

    let expected = TransferOutcome::Failure(TransferFailure::SessionTerminated(
        Reason::FailedTransport,
    ));
    assert_eq!(outgoing.wait().await, expected);
    assert_eq!(incoming.wait().await, expected);

    wait_until_idle(&pair.romeo.registry).await;
    wait_until_idle(&pair.juliet.registry).await;
    assert!(romeo_sessions.try_recv().is_err());

    // One replacement per fallback step, one terminate at the end
    let actions = pair.romeo.sender.sent_actions();
    let replaces = actions
        .iter()
        .filter(|&&a| a == JingleAction::TransportReplace)
        .count();
    assert_eq!(replaces, DOOMED.len() - 1);
    let terminates = actions
        .iter()
        .filter(|&&a| a == JingleAction::SessionTerminate)
        .count();
    assert_eq!(terminates, 1);
}

#[tokio::test]
async fn test_fallback_reaches_working_transport() {
    let bytestreams = Arc::new(LoopbackBytestreams::new());
    let pair = Pair::with_transports(move || {
        let mut plugins = doomed_transports();
        plugins.push(Arc::new(InBandTransport::new(bytestreams.clone())));
        plugins
    });
    let romeo_dir = TempDir::new().unwrap();
    let juliet_dir = TempDir::new().unwrap();
    let source = romeo_dir.path().join("report.pdf");
    let data = vec![42u8; 20_000];
    fs::write(&source, &data).await.unwrap();

    let mut offers = subscribe(&pair.juliet.registry.events().offers);
    let mut outgoing = pair
        .romeo
        .files
        .send_file(&source, &pair.juliet.jid)
        .await
        .unwrap();
    let target = juliet_dir.path().join("report.pdf");
    let mut incoming = next(&mut offers).await.accept(target.clone()).await.unwrap();

    assert_eq!(incoming.wait().await, TransferOutcome::Success { bytes: 20_000 });
    assert_eq!(outgoing.wait().await, TransferOutcome::Success { bytes: 20_000 });
    assert_eq!(fs::read(&target).await.unwrap(), data);

    let replaces: Vec<_> = pair
        .romeo
        .sender
        .sent()
        .into_iter()
        .filter(|m| m.action == JingleAction::TransportReplace)
        .collect();
    assert_eq!(replaces.len(), DOOMED.len());
    let last = replaces.last().unwrap();
    assert_eq!(
        last.contents[0].transport.as_ref().unwrap().namespace,
        NS_IBB_TRANSPORT
    );
}
