//! Mock collaborators shared by the manager integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use nsm_api::mechanism::{kernel, vxlan};
use nsm_api::{
    Connection, CrossConnect, EndpointNsmName, Mechanism, MechanismClass, NetworkServiceManager,
    NetworkServiceRequest, NseRegistration, NsmError, Result,
};
use nsm_manager::{
    EndpointConnection, ForwarderClient, ForwarderConnection, IgnoredEndpoints, NetworkServiceClient,
    NetworkServiceEndpointManager, NetworkServiceServer, Next, PrefixSidAllocator, RequestContext, ServiceRegistry,
    SidAllocator, Transport,
};
use nsm_model::{ClientConnection, ClientConnectionState, Endpoint, Forwarder, Model};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOCAL_NSM: &str = "nsmgr-local";
pub const REMOTE_NSM: &str = "nsmgr-remote";

pub fn manager(name: &str) -> NetworkServiceManager {
    NetworkServiceManager::new(name, format!("{}:5001", name))
}

pub fn registration(endpoint: &str, nsm: &str) -> NseRegistration {
    NseRegistration::new(endpoint, "icmp", manager(nsm))
}

pub fn remote_vxlan(vni: &str) -> Mechanism {
    Mechanism::new(MechanismClass::Remote, vxlan::MECHANISM)
        .with_parameter(vxlan::VNI, vni)
        .with_parameter(vxlan::SRC_IP, "10.0.0.1")
}

pub fn local_kernel() -> Mechanism {
    Mechanism::new(MechanismClass::Local, kernel::MECHANISM)
}

/// A client connection bound to `endpoint`, with a complete destination.
pub fn tracked(id: &str, state: ClientConnectionState, endpoint: NseRegistration, destination: Mechanism) -> ClientConnection {
    let source = Connection::new(id, "icmp").with_mechanism(local_kernel());
    let destination = Connection::new(format!("dst-{}", id), "icmp").with_mechanism(destination);
    let mut cc = ClientConnection::new(id, CrossConnect::new(id, Some(source), Some(destination)));
    cc.connection_state = state;
    cc.endpoint = Some(endpoint);
    cc
}

// ============================================================================
// Endpoint Manager
// ============================================================================

/// Hands out endpoints in order, skipping excluded ones.
pub struct MockEndpointManager {
    endpoints: Vec<NseRegistration>,
    /// The exclusion set seen by every `get_endpoint` call.
    pub seen_exclusions: Mutex<Vec<Vec<EndpointNsmName>>>,
}

impl MockEndpointManager {
    pub fn new(endpoints: Vec<NseRegistration>) -> Self {
        Self {
            endpoints,
            seen_exclusions: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen_exclusions.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkServiceEndpointManager for MockEndpointManager {
    async fn get_endpoint(
        &self,
        _ctx: &RequestContext,
        connection: &Connection,
        ignored: &IgnoredEndpoints,
    ) -> Result<NseRegistration> {
        let mut excluded: Vec<EndpointNsmName> = ignored.keys().cloned().collect();
        excluded.sort();
        self.seen_exclusions.lock().unwrap().push(excluded);

        self.endpoints
            .iter()
            .find(|e| !ignored.contains_key(&e.endpoint_nsm_name()))
            .cloned()
            .ok_or_else(|| NsmError::EndpointNotFound(connection.network_service.clone()))
    }

    fn is_local_endpoint(&self, endpoint: &NseRegistration) -> bool {
        endpoint.network_service_manager.name == LOCAL_NSM
    }
}

// ============================================================================
// Recording Tail Stage
// ============================================================================

/// What the tail stage saw for one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub endpoint: Option<String>,
    pub forwarder: Option<String>,
    pub remote_mechanisms: Vec<Mechanism>,
    pub connection: Option<Connection>,
}

/// Last stage of a test chain, standing in for the endpoint connection.
///
/// Requests fail for endpoints in `failing`, after `delay` if one is set.
/// With a model attached, a
/// successful request records a complete local destination on the bound
/// connection.
#[derive(Default)]
pub struct RecordingTail {
    pub failing: HashSet<String>,
    pub model: Option<Arc<Model>>,
    pub close_error: bool,
    pub delay: Option<Duration>,
    pub requests: Mutex<Vec<SeenRequest>>,
    pub closes: Mutex<Vec<String>>,
}

impl RecordingTail {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: Arc<Model>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requested_endpoints(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.endpoint.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkServiceServer for RecordingTail {
    async fn request(&self, ctx: RequestContext, request: NetworkServiceRequest, _next: Next<'_>) -> Result<Connection> {
        let endpoint = ctx.endpoint().map(|e| e.endpoint_name().to_string());
        self.requests.lock().unwrap().push(SeenRequest {
            endpoint: endpoint.clone(),
            forwarder: ctx.forwarder().map(|f| f.registered_name.clone()),
            remote_mechanisms: ctx.remote_mechanisms().to_vec(),
            connection: request.connection.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(name) = endpoint.as_ref().filter(|n| self.failing.contains(*n)) {
            return Err(NsmError::Endpoint(format!("{} refused the connection", name)));
        }

        let mut conn = request
            .connection
            .ok_or_else(|| NsmError::Validation("request has no connection".to_string()))?;
        conn.network_service_endpoint_name = endpoint.unwrap_or_default();

        if let (Some(model), Some(cc)) = (&self.model, ctx.client_connection()) {
            let destination = Connection::new(format!("dst-{}", conn.id), conn.network_service.clone())
                .with_mechanism(local_kernel());
            model.apply_client_connection_changes(&cc.connection_id, |cc| {
                cc.xcon.destination = Some(destination);
            });
        }
        Ok(conn)
    }

    async fn close(&self, _ctx: RequestContext, connection: Connection, _next: Next<'_>) -> Result<()> {
        self.closes.lock().unwrap().push(connection.id.clone());
        if self.close_error {
            return Err(NsmError::Connection(format!("close of {} failed", connection.id)));
        }
        Ok(())
    }
}

// ============================================================================
// Service Registry
// ============================================================================

/// A forwarder's network service API.
pub struct MockForwarderNsClient {
    pub accept: bool,
    /// Mechanism the forwarder selects for the connection.
    pub mechanism: Mechanism,
    pub requests: AtomicUsize,
}

impl MockForwarderNsClient {
    pub fn new(accept: bool, mechanism: Mechanism) -> Self {
        Self {
            accept,
            mechanism,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NetworkServiceClient for MockForwarderNsClient {
    async fn request(&self, _ctx: &RequestContext, request: NetworkServiceRequest) -> Result<Connection> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return Err(NsmError::Connection("forwarder rejected request".to_string()));
        }
        let conn = request
            .connection
            .ok_or_else(|| NsmError::Validation("request has no connection".to_string()))?;
        Ok(conn.with_mechanism(self.mechanism.clone()))
    }

    async fn close(&self, _ctx: &RequestContext, _connection: Connection) -> Result<()> {
        Ok(())
    }
}

/// A forwarder's cross-connect API.
#[derive(Default)]
pub struct MockForwarderClient {
    pub fail: bool,
    pub closed: Mutex<Vec<String>>,
}

#[async_trait]
impl ForwarderClient for MockForwarderClient {
    async fn close(&self, _ctx: &RequestContext, xcon: &CrossConnect) -> Result<()> {
        self.closed.lock().unwrap().push(xcon.id.clone());
        if self.fail {
            return Err(NsmError::Connection("forwarder close failed".to_string()));
        }
        Ok(())
    }
}

pub struct MockTransport {
    closes: Arc<AtomicUsize>,
}

impl Transport for MockTransport {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dials forwarders by endpoint name; names in `unreachable` fail to dial.
pub struct MockServiceRegistry {
    pub endpoint_clients: HashMap<String, Arc<MockForwarderNsClient>>,
    pub unreachable: HashSet<String>,
    pub forwarder_client: Arc<MockForwarderClient>,
    pub sids: Arc<PrefixSidAllocator>,
    pub dials: Mutex<Vec<String>>,
    /// Closes of forwarder cross-connect transports.
    pub transport_closes: Arc<AtomicUsize>,
    /// Transports handed out with forwarder network service clients.
    pub endpoint_transports: AtomicUsize,
    pub endpoint_transport_closes: Arc<AtomicUsize>,
}

impl MockServiceRegistry {
    pub fn new() -> Self {
        Self {
            endpoint_clients: HashMap::new(),
            unreachable: HashSet::new(),
            forwarder_client: Arc::new(MockForwarderClient::default()),
            sids: Arc::new(PrefixSidAllocator::default()),
            dials: Mutex::new(Vec::new()),
            transport_closes: Arc::new(AtomicUsize::new(0)),
            endpoint_transports: AtomicUsize::new(0),
            endpoint_transport_closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_forwarder(mut self, name: &str, client: MockForwarderNsClient) -> Self {
        self.endpoint_clients.insert(name.to_string(), Arc::new(client));
        self
    }

    pub fn with_unreachable(mut self, name: &str) -> Self {
        self.unreachable.insert(name.to_string());
        self
    }

    pub fn with_forwarder_client(mut self, client: MockForwarderClient) -> Self {
        self.forwarder_client = Arc::new(client);
        self
    }

    pub fn forwarder_closes(&self) -> Vec<String> {
        self.forwarder_client.closed.lock().unwrap().clone()
    }

    /// Endpoint transports handed out and not closed yet.
    pub fn open_endpoint_transports(&self) -> usize {
        self.endpoint_transports.load(Ordering::SeqCst) - self.endpoint_transport_closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceRegistry for MockServiceRegistry {
    async fn endpoint_connection(&self, _ctx: &RequestContext, endpoint: &Endpoint) -> Result<EndpointConnection> {
        let name = endpoint.endpoint_name().to_string();
        self.dials.lock().unwrap().push(name.clone());
        if self.unreachable.contains(&name) {
            return Err(NsmError::Transport(format!("{} is unreachable", name)));
        }
        let client: Arc<dyn NetworkServiceClient> = self
            .endpoint_clients
            .get(&name)
            .cloned()
            .ok_or_else(|| NsmError::EndpointNotFound(name.clone()))?;
        self.endpoint_transports.fetch_add(1, Ordering::SeqCst);
        let transport: Box<dyn Transport> = Box::new(MockTransport {
            closes: self.endpoint_transport_closes.clone(),
        });
        Ok((client, Some(transport)))
    }

    async fn forwarder_connection(&self, _ctx: &RequestContext, _forwarder: &Forwarder) -> Result<ForwarderConnection> {
        let transport: Box<dyn Transport> = Box::new(MockTransport {
            closes: self.transport_closes.clone(),
        });
        let client: Arc<dyn ForwarderClient> = self.forwarder_client.clone();
        Ok((client, Some(transport)))
    }

    fn sid_allocator(&self) -> Arc<dyn SidAllocator> {
        self.sids.clone()
    }
}

/// Registers forwarder endpoints for `forwarder@<host>`.
pub fn register_forwarders(model: &Model, host: &str, names: &[&str]) {
    for name in names {
        let registration = NseRegistration::new(name, &format!("forwarder@{}", host), manager(LOCAL_NSM));
        model.add_endpoint(Endpoint::new(registration, format!("/run/{}.sock", name)));
    }
}
