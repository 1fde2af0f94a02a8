use nsm_api::{NetworkServiceManager, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, info};

use crate::client_connection::ClientConnection;
use crate::domain::{Domain, HandlerId, ModificationHandler};
use crate::endpoint::Endpoint;
use crate::forwarder::Forwarder;

/// Observer of every registry change.
///
/// All methods default to no-ops so implementors pick the events they need.
/// Callbacks run synchronously inside the mutating call and must not mutate
/// the collection that fired them.
pub trait Listener: Send + Sync {
    fn endpoint_added(&self, _endpoint: &Endpoint) {}
    fn endpoint_updated(&self, _old: &Endpoint, _new: &Endpoint) {}
    fn endpoint_deleted(&self, _endpoint: &Endpoint) {}

    fn forwarder_added(&self, _forwarder: &Forwarder) {}
    fn forwarder_updated(&self, _old: &Forwarder, _new: &Forwarder) {}
    fn forwarder_deleted(&self, _forwarder: &Forwarder) {}

    fn client_connection_added(&self, _cc: &ClientConnection) {}
    fn client_connection_updated(&self, _old: &ClientConnection, _new: &ClientConnection) {}
    fn client_connection_deleted(&self, _cc: &ClientConnection) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerHandles {
    endpoint: HandlerId,
    forwarder: HandlerId,
    client_connection: HandlerId,
}

#[derive(Default)]
struct Listeners {
    handles: HashMap<ListenerId, ListenerHandles>,
    next: u64,
}

/// Shared in-memory registry of endpoints, forwarders and client connections.
///
/// Safe to share behind an `Arc` between all request handling tasks.
pub struct Model {
    endpoints: Domain<Endpoint>,
    forwarders: Domain<Forwarder>,
    client_connections: Domain<ClientConnection>,
    last_connection_id: Mutex<u64>,
    nsm: RwLock<Option<NetworkServiceManager>>,
    listeners: Mutex<Listeners>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self {
            endpoints: Domain::new(),
            forwarders: Domain::new(),
            client_connections: Domain::new(),
            last_connection_id: Mutex::new(0),
            nsm: RwLock::new(None),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    // Endpoints

    /// Stores the endpoint under its name; an existing entry fires an update.
    pub fn add_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.store(endpoint.endpoint_name().to_string(), endpoint);
    }

    pub fn get_endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.load(name)
    }

    pub fn update_endpoint(&self, endpoint: Endpoint) {
        self.add_endpoint(endpoint);
    }

    pub fn delete_endpoint(&self, name: &str) {
        self.endpoints.delete(name);
    }

    pub fn get_endpoints_by_network_service(&self, network_service: &str) -> Vec<Endpoint> {
        self.endpoints
            .values()
            .into_iter()
            .filter(|e| e.network_service_name() == network_service)
            .collect()
    }

    pub fn select_endpoint(&self, predicate: Option<&dyn Fn(&Endpoint) -> bool>) -> Result<Endpoint> {
        self.endpoints.select("endpoints", predicate)
    }

    // Forwarders

    pub fn add_forwarder(&self, forwarder: Forwarder) {
        self.forwarders.store(forwarder.registered_name.clone(), forwarder);
    }

    pub fn get_forwarder(&self, name: &str) -> Option<Forwarder> {
        self.forwarders.load(name)
    }

    pub fn update_forwarder(&self, forwarder: Forwarder) {
        self.add_forwarder(forwarder);
    }

    pub fn delete_forwarder(&self, name: &str) {
        self.forwarders.delete(name);
    }

    pub fn select_forwarder(&self, predicate: Option<&dyn Fn(&Forwarder) -> bool>) -> Result<Forwarder> {
        self.forwarders.select("forwarders", predicate)
    }

    // Client connections

    pub fn add_client_connection(&self, cc: ClientConnection) {
        self.client_connections.store(cc.connection_id.clone(), cc);
    }

    pub fn get_client_connection(&self, connection_id: &str) -> Option<ClientConnection> {
        self.client_connections.load(connection_id)
    }

    pub fn get_all_client_connections(&self) -> Vec<ClientConnection> {
        self.client_connections.values()
    }

    pub fn update_client_connection(&self, cc: ClientConnection) {
        self.add_client_connection(cc);
    }

    pub fn delete_client_connection(&self, connection_id: &str) {
        self.client_connections.delete(connection_id);
    }

    /// Atomically applies `change` to the stored connection and notifies listeners.
    ///
    /// This is the only safe read-modify-write path for a client connection.
    /// Returns the updated connection, or `None` if it is not registered.
    pub fn apply_client_connection_changes(
        &self,
        connection_id: &str,
        change: impl FnOnce(&mut ClientConnection),
    ) -> Option<ClientConnection> {
        self.client_connections.apply_changes(connection_id, change)
    }

    /// Re-registers recovered connections and moves the ID generator past them.
    pub fn restore(&self, connections: impl IntoIterator<Item = ClientConnection>) {
        for cc in connections {
            self.correct_id_generator(&cc.connection_id);
            self.add_client_connection(cc);
        }
    }

    // Connection IDs

    /// Allocates the next connection ID as a lowercase hex string.
    pub fn connection_id(&self) -> String {
        let mut last = self.last_connection_id.lock().unwrap_or_else(PoisonError::into_inner);
        *last += 1;
        format!("{:x}", *last)
    }

    /// Advances the generator to at least `id`; never moves it backwards.
    pub fn correct_id_generator(&self, id: &str) {
        let value = match u64::from_str_radix(id, 16) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to update id generator with {:?}: {}", id, e);
                return;
            }
        };
        let mut last = self.last_connection_id.lock().unwrap_or_else(PoisonError::into_inner);
        if *last < value {
            *last = value;
        }
    }

    // Listeners

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let (l1, l2, l3) = (listener.clone(), listener.clone(), listener.clone());
        let endpoint = self.endpoints.add_handler(
            ModificationHandler::default()
                .on_add(move |new: &Endpoint| l1.endpoint_added(new))
                .on_update({
                    let l = listener.clone();
                    move |old: &Endpoint, new: &Endpoint| l.endpoint_updated(old, new)
                })
                .on_delete({
                    let l = listener.clone();
                    move |del: &Endpoint| l.endpoint_deleted(del)
                }),
        );
        let forwarder = self.forwarders.add_handler(
            ModificationHandler::default()
                .on_add(move |new: &Forwarder| l2.forwarder_added(new))
                .on_update({
                    let l = listener.clone();
                    move |old: &Forwarder, new: &Forwarder| l.forwarder_updated(old, new)
                })
                .on_delete({
                    let l = listener.clone();
                    move |del: &Forwarder| l.forwarder_deleted(del)
                }),
        );
        let client_connection = self.client_connections.add_handler(
            ModificationHandler::default()
                .on_add(move |new: &ClientConnection| l3.client_connection_added(new))
                .on_update({
                    let l = listener.clone();
                    move |old: &ClientConnection, new: &ClientConnection| {
                        l.client_connection_updated(old, new)
                    }
                })
                .on_delete(move |del: &ClientConnection| listener.client_connection_deleted(del)),
        );

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(listeners.next);
        listeners.next += 1;
        listeners.handles.insert(
            id,
            ListenerHandles {
                endpoint,
                forwarder,
                client_connection,
            },
        );
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handles) = listeners.handles.remove(&id) else {
            info!("No such listener");
            return false;
        };
        self.endpoints.remove_handler(handles.endpoint);
        self.forwarders.remove_handler(handles.forwarder);
        self.client_connections.remove_handler(handles.client_connection);
        true
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).handles.len()
    }

    // This manager

    pub fn set_nsm(&self, nsm: NetworkServiceManager) {
        *self.nsm.write().unwrap_or_else(PoisonError::into_inner) = Some(nsm);
    }

    pub fn get_nsm(&self) -> Option<NetworkServiceManager> {
        self.nsm.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
