//! Forwarder Orchestration Integration Tests
//!
//! Runs the forwarder service in front of a recording tail stage with a mock
//! service registry standing in for the forwarders.

mod common;

use common::*;
use nsm_api::mechanism::srv6;
use nsm_api::{Connection, CrossConnect, Mechanism, MechanismClass, NetworkServiceRequest, NsmError, Path, PathSegment};
use nsm_manager::{CompositeService, ForwarderService, ManagerConfig, NetworkServiceServer, RequestContext};
use nsm_model::{ClientConnection, Forwarder, ForwarderState, Model};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const HOST: &str = "node-1";

struct Harness {
    registry: Arc<MockServiceRegistry>,
    tail: Arc<RecordingTail>,
    chain: CompositeService,
}

fn harness(model: Arc<Model>, registry: MockServiceRegistry, tail: RecordingTail) -> Harness {
    let registry = Arc::new(registry);
    let tail = Arc::new(tail);
    let service = ForwarderService::new(model, registry.clone(), ManagerConfig::default().with_host(HOST));
    let servers: Vec<Arc<dyn NetworkServiceServer>> = vec![Arc::new(service), tail.clone()];
    Harness {
        registry,
        tail,
        chain: CompositeService::new("forwarder", servers),
    }
}

fn bound(model: &Model, id: &str) -> RequestContext {
    let cc = ClientConnection::new(id, CrossConnect::new(id, Some(Connection::new(id, "icmp")), None));
    model.add_client_connection(cc.clone());
    RequestContext::new().with_client_connection(cc)
}

fn request(id: &str) -> NetworkServiceRequest {
    NetworkServiceRequest::new(Connection::new(id, "icmp"))
}

// ============================================================================
// Request
// ============================================================================

#[tokio::test]
async fn test_no_forwarders_fails_without_mutation() {
    let model = Arc::new(Model::new());
    let h = harness(model.clone(), MockServiceRegistry::new(), RecordingTail::default());
    let ctx = bound(&model, "1");
    let before = model.get_client_connection("1");

    let err = h.chain.process_request(ctx, request("1")).await.unwrap_err();

    assert!(matches!(err, NsmError::NoForwarders));
    assert_eq!(err.to_string(), "No forwarders found");
    assert_eq!(model.get_client_connection("1"), before);
    assert!(model.select_forwarder(None).is_err());
    assert_eq!(h.tail.request_count(), 0);
}

#[tokio::test]
async fn test_forwarders_of_other_hosts_are_ignored() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, "node-2", &["forwarder-vpp"]);
    let h = harness(model.clone(), MockServiceRegistry::new(), RecordingTail::default());

    let err = h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap_err();

    assert!(matches!(err, NsmError::NoForwarders));
}

#[tokio::test]
async fn test_first_accepting_forwarder_is_used() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-a", "forwarder-b"]);
    let registry = MockServiceRegistry::new()
        .with_unreachable("forwarder-a")
        .with_forwarder("forwarder-b", MockForwarderNsClient::new(true, local_kernel()));
    let h = harness(model.clone(), registry, RecordingTail::default());

    let conn = h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap();

    assert_eq!(conn.mechanism, Some(local_kernel()));
    let seen = h.tail.requests.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].forwarder.as_deref(), Some("forwarder-b"));
    assert_eq!(seen[0].remote_mechanisms, vec![local_kernel()]);

    let forwarder = model.get_forwarder("forwarder-b").unwrap();
    assert_eq!(forwarder.socket_location, "/run/forwarder-b.sock");

    let cc = model.get_client_connection("1").unwrap();
    assert_eq!(cc.forwarder_registered_name, "forwarder-b");
    assert_eq!(cc.forwarder_state, ForwarderState::Ready);
}

#[tokio::test]
async fn test_rejecting_forwarder_is_skipped() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-a", "forwarder-b"]);
    let rejecting = MockForwarderNsClient::new(false, local_kernel());
    let accepting = MockForwarderNsClient::new(true, local_kernel());
    let registry = MockServiceRegistry::new()
        .with_forwarder("forwarder-a", rejecting)
        .with_forwarder("forwarder-b", accepting);
    let h = harness(model.clone(), registry, RecordingTail::default());

    h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap();

    let a = &h.registry.endpoint_clients["forwarder-a"];
    let b = &h.registry.endpoint_clients["forwarder-b"];
    assert_eq!(b.requests.load(Ordering::SeqCst), 1);
    // Registry order is unspecified, so forwarder-a may not have been asked at all
    assert!(a.requests.load(Ordering::SeqCst) <= 1);
    assert_eq!(model.get_client_connection("1").unwrap().forwarder_registered_name, "forwarder-b");
}

#[tokio::test]
async fn test_no_accepting_forwarder() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-a", "forwarder-b"]);
    let registry = MockServiceRegistry::new()
        .with_unreachable("forwarder-a")
        .with_forwarder("forwarder-b", MockForwarderNsClient::new(false, local_kernel()));
    let h = harness(model.clone(), registry, RecordingTail::default());

    let err = h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap_err();

    assert!(matches!(err, NsmError::NoValidForwarder(_)));
    assert!(err.to_string().contains("id=1"));
    assert_eq!(h.registry.dials.lock().unwrap().len(), 2);
    assert_eq!(h.registry.open_endpoint_transports(), 0);
    assert_eq!(h.tail.request_count(), 0);
    assert_eq!(
        model.get_client_connection("1").unwrap().forwarder_state,
        ForwarderState::None
    );
}

#[tokio::test]
async fn test_srv6_gets_two_distinct_sids() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-vpp"]);
    let srv6_mechanism = Mechanism::new(MechanismClass::Remote, srv6::MECHANISM);
    let registry =
        MockServiceRegistry::new().with_forwarder("forwarder-vpp", MockForwarderNsClient::new(true, srv6_mechanism));
    let h = harness(model.clone(), registry, RecordingTail::default());

    h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap();

    let seen = h.tail.requests.lock().unwrap().clone();
    let offered = &seen[0].remote_mechanisms;
    assert_eq!(offered.len(), 1);
    let bsid = offered[0].parameter(srv6::SRC_BSID);
    let local_sid = offered[0].parameter(srv6::SRC_LOCAL_SID);
    assert!(!bsid.is_empty());
    assert!(!local_sid.is_empty());
    assert_ne!(bsid, local_sid);
    assert!(offered[0].is_valid().is_ok());
    assert_eq!(h.registry.sids.allocated_count(), 2);
}

#[tokio::test]
async fn test_forwarder_transports_are_closed_after_each_attempt() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-a", "forwarder-b"]);
    let registry = MockServiceRegistry::new()
        .with_forwarder("forwarder-a", MockForwarderNsClient::new(false, local_kernel()))
        .with_forwarder("forwarder-b", MockForwarderNsClient::new(false, local_kernel()));
    let h = harness(model.clone(), registry, RecordingTail::default());

    let err = h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap_err();
    assert!(matches!(err, NsmError::NoValidForwarder(_)));
    assert_eq!(h.registry.endpoint_transports.load(Ordering::SeqCst), 2);
    assert_eq!(h.registry.open_endpoint_transports(), 0);

    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-c"]);
    let registry =
        MockServiceRegistry::new().with_forwarder("forwarder-c", MockForwarderNsClient::new(true, local_kernel()));
    let h = harness(model.clone(), registry, RecordingTail::default());

    h.chain.process_request(bound(&model, "1"), request("1")).await.unwrap();
    assert_eq!(h.registry.endpoint_transports.load(Ordering::SeqCst), 1);
    assert_eq!(h.registry.open_endpoint_transports(), 0);
}

#[tokio::test]
async fn test_srv6_sids_are_released_when_downstream_fails() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-vpp"]);
    let srv6_mechanism = Mechanism::new(MechanismClass::Remote, srv6::MECHANISM);
    let registry =
        MockServiceRegistry::new().with_forwarder("forwarder-vpp", MockForwarderNsClient::new(true, srv6_mechanism));
    let h = harness(model.clone(), registry, RecordingTail::failing(&["nse-1"]));

    let ctx = bound(&model, "1").with_endpoint(registration("nse-1", LOCAL_NSM));
    h.chain.process_request(ctx, request("1")).await.unwrap_err();

    let seen = h.tail.requests.lock().unwrap().clone();
    assert_eq!(seen[0].remote_mechanisms[0].parameter(srv6::SRC_BSID), "fd00::1");
    assert_eq!(h.registry.sids.allocated_count(), 0);
}

#[tokio::test]
async fn test_srv6_sids_are_held_until_close() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-vpp"]);
    let srv6_mechanism = Mechanism::new(MechanismClass::Remote, srv6::MECHANISM);
    let registry =
        MockServiceRegistry::new().with_forwarder("forwarder-vpp", MockForwarderNsClient::new(true, srv6_mechanism));
    let h = harness(model.clone(), registry, RecordingTail::default());

    let ctx = bound(&model, "1");
    h.chain.process_request(ctx.clone(), request("1")).await.unwrap();
    assert_eq!(h.registry.sids.allocated_count(), 2);

    // Programming the forwarder again swaps the SIDs rather than adding to them
    h.chain.process_request(ctx, request("1")).await.unwrap();
    assert_eq!(h.registry.sids.allocated_count(), 2);

    let cc = model.get_client_connection("1").unwrap();
    h.chain
        .process_close(RequestContext::new().with_client_connection(cc), Connection::new("1", "icmp"))
        .await
        .unwrap();
    assert_eq!(h.registry.forwarder_closes().len(), 1);
    assert_eq!(h.registry.sids.allocated_count(), 0);
}

#[tokio::test]
async fn test_failed_downstream_leaves_forwarder_state() {
    let model = Arc::new(Model::new());
    register_forwarders(&model, HOST, &["forwarder-vpp"]);
    let registry =
        MockServiceRegistry::new().with_forwarder("forwarder-vpp", MockForwarderNsClient::new(true, local_kernel()));
    let h = harness(model.clone(), registry, RecordingTail::failing(&["nse-1"]));

    let ctx = bound(&model, "1").with_endpoint(registration("nse-1", LOCAL_NSM));
    let err = h.chain.process_request(ctx, request("1")).await.unwrap_err();

    assert!(matches!(err, NsmError::Endpoint(_)));
    assert!(model.get_forwarder("forwarder-vpp").is_some());
    assert_eq!(
        model.get_client_connection("1").unwrap().forwarder_state,
        ForwarderState::None
    );
}

#[tokio::test]
async fn test_forwarder_segment_passes_through() {
    let model = Arc::new(Model::new());
    let h = harness(model.clone(), MockServiceRegistry::new(), RecordingTail::default());

    let mut conn = Connection::new("1", "icmp");
    conn.path = Some(Path {
        index: 1,
        path_segments: vec![PathSegment::new("nsmgr-1", "1"), PathSegment::new("forwarder-vpp", "2")],
    });

    let result = h
        .chain
        .process_request(RequestContext::new(), NetworkServiceRequest::new(conn.clone()))
        .await
        .unwrap();

    assert_eq!(result, conn);
    assert!(h.registry.dials.lock().unwrap().is_empty());
    assert_eq!(h.tail.request_count(), 1);
}

// ============================================================================
// Close
// ============================================================================

fn programmed(model: &Model, id: &str, forwarder: &str) -> RequestContext {
    model.add_forwarder(Forwarder::new(forwarder, format!("/run/{}.sock", forwarder)));
    let mut cc = ClientConnection::new(id, CrossConnect::new(format!("xcon-{}", id), None, None));
    cc.forwarder_registered_name = forwarder.to_string();
    cc.forwarder_state = ForwarderState::Ready;
    model.add_client_connection(cc.clone());
    RequestContext::new().with_client_connection(cc)
}

#[tokio::test]
async fn test_close_without_forwarder_skips_forwarder_close() {
    let model = Arc::new(Model::new());
    let tail = RecordingTail {
        close_error: true,
        ..Default::default()
    };
    let h = harness(model.clone(), MockServiceRegistry::new(), tail);

    let err = h
        .chain
        .process_close(bound(&model, "1"), Connection::new("1", "icmp"))
        .await
        .unwrap_err();

    assert!(matches!(err, NsmError::Connection(_)));
    assert!(h.registry.forwarder_closes().is_empty());
    assert_eq!(h.registry.transport_closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_tears_down_cross_connect() {
    let model = Arc::new(Model::new());
    let h = harness(model.clone(), MockServiceRegistry::new(), RecordingTail::default());
    let ctx = programmed(&model, "1", "forwarder-vpp");

    h.chain.process_close(ctx, Connection::new("1", "icmp")).await.unwrap();

    assert_eq!(h.tail.close_count(), 1);
    assert_eq!(h.registry.forwarder_closes(), vec!["xcon-1".to_string()]);
    assert_eq!(h.registry.transport_closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        model.get_client_connection("1").unwrap().forwarder_state,
        ForwarderState::None
    );
}

#[tokio::test]
async fn test_forwarder_close_failure_is_not_reported() {
    let model = Arc::new(Model::new());
    let registry = MockServiceRegistry::new().with_forwarder_client(MockForwarderClient {
        fail: true,
        ..Default::default()
    });
    let h = harness(model.clone(), registry, RecordingTail::default());
    let ctx = programmed(&model, "1", "forwarder-vpp");

    h.chain.process_close(ctx, Connection::new("1", "icmp")).await.unwrap();

    assert_eq!(h.registry.forwarder_closes().len(), 1);
    assert_eq!(h.registry.transport_closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        model.get_client_connection("1").unwrap().forwarder_state,
        ForwarderState::Ready
    );
}

#[tokio::test]
async fn test_unknown_forwarder_is_not_reported() {
    let model = Arc::new(Model::new());
    let h = harness(model.clone(), MockServiceRegistry::new(), RecordingTail::default());
    let ctx = programmed(&model, "1", "forwarder-vpp");
    model.delete_forwarder("forwarder-vpp");

    h.chain.process_close(ctx, Connection::new("1", "icmp")).await.unwrap();

    assert!(h.registry.forwarder_closes().is_empty());
}
