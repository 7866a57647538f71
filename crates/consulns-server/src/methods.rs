//! Remote backend method handlers.
//!
//! Each handler decodes its parameters, runs synchronous store operations
//! and sets the response payload. Wire field names follow the PowerDNS
//! remote backend convention.

use crate::dispatcher::{Dispatcher, MethodHandler, Request, Response};
use async_trait::async_trait;
use consulns_store::{Domain, Key, KeyUpdate, Record, RecordType, Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Handler failures. Logged by the dispatcher, answered as `false`.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for handlers.
pub type Result<T> = std::result::Result<T, HandlerError>;

// ============================================================================
// Wire types
// ============================================================================

/// A record as returned by `lookup` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub qtype: String,
    pub qname: String,
    pub content: String,
    pub ttl: u32,
    pub auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<usize>,
}

impl WireRecord {
    fn new(qname: &str, record: &Record, domain_id: Option<usize>) -> Self {
        Self {
            qtype: record.rtype.to_string(),
            qname: qname.to_string(),
            content: record.value.clone(),
            ttl: record.ttl,
            auth: true,
            domain_id,
        }
    }
}

/// Zone summary returned by `getAllDomains` and `getDomainInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub id: usize,
    pub zone: String,
    pub serial: u32,
    pub kind: String,
}

impl DomainInfo {
    fn new(id: usize, domain: &Domain) -> Self {
        Self {
            id,
            zone: domain.name().to_string(),
            serial: domain.serial(),
            kind: domain.kind().to_string(),
        }
    }
}

/// Key as returned by `getDomainKeys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainKey {
    pub id: usize,
    pub flags: i32,
    pub active: bool,
    pub published: bool,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    qname: String,
    qtype: String,
    #[serde(rename = "zone-id", default)]
    zone_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    zonename: String,
    #[serde(default)]
    domain_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DomainParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MetadataParams {
    name: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct SetMetadataParams {
    name: String,
    kind: String,
    #[serde(default)]
    value: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddKeyParams {
    name: String,
    key: Key,
}

#[derive(Debug, Deserialize)]
struct KeyIdParams {
    name: String,
    id: i64,
}

impl KeyIdParams {
    fn key_id(&self) -> std::result::Result<usize, StoreError> {
        usize::try_from(self.id).map_err(|_| StoreError::not_found(format!("key with id {}", self.id)))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `initialize`: always succeeds.
pub struct Initialize;

#[async_trait]
impl MethodHandler for Initialize {
    async fn handle(&self, request: &Request, _response: &mut Response) -> Result<()> {
        info!(parameters = %request.parameters, "initializing");
        Ok(())
    }
}

/// `lookup`: records for an owner name and type.
pub struct Lookup {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for Lookup {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: LookupParams = request.parameters()?;
        debug!(qname = %params.qname, qtype = %params.qtype, zone_id = ?params.zone_id, "performing lookup");

        let Ok(rtype) = params.qtype.parse::<RecordType>() else {
            debug!(qtype = %params.qtype, "unsupported qtype");
            response.set_value(Vec::<WireRecord>::new());
            return Ok(());
        };

        let records: Vec<WireRecord> = match params.zone_id.filter(|id| self.store.has_zone(*id)) {
            Some(id) => {
                let zone = self.store.zone_by_id(id)?;
                let domain_id = usize::try_from(id).ok();
                zone.forward_lookup(&params.qname, rtype)
                    .iter()
                    .map(|r| WireRecord::new(&params.qname, r, domain_id))
                    .collect()
            }
            None => self
                .store
                .forward_lookup(&params.qname, rtype)
                .iter()
                .map(|r| WireRecord::new(&params.qname, r, None))
                .collect(),
        };

        response.set_value(records);
        Ok(())
    }
}

/// `list`: every record of a zone.
pub struct List {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for List {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: ListParams = request.parameters()?;
        info!(zonename = %params.zonename, domain_id = ?params.domain_id, "performing list");

        let (id, zone) = match params.domain_id.filter(|id| self.store.has_zone(*id)) {
            Some(id) => (usize::try_from(id).ok(), self.store.zone_by_id(id)?),
            None => {
                let (id, zone) = self.store.domain_by_name(&params.zonename)?;
                (Some(id), zone)
            }
        };

        let records: Vec<WireRecord> = zone
            .records()
            .iter()
            .map(|(owner, r)| WireRecord::new(owner, r, id))
            .collect();

        response.set_value(records);
        Ok(())
    }
}

/// `getAllDomains`: summaries of every zone.
pub struct GetAllDomains {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for GetAllDomains {
    async fn handle(&self, _request: &Request, response: &mut Response) -> Result<()> {
        info!("returning all domains");
        let domains: Vec<DomainInfo> = self
            .store
            .zones()
            .iter()
            .enumerate()
            .map(|(id, d)| DomainInfo::new(id, d))
            .collect();
        response.set_value(domains);
        Ok(())
    }
}

/// `getDomainInfo`: summary of one zone.
pub struct GetDomainInfo {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for GetDomainInfo {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: DomainParams = request.parameters()?;
        info!(domain = %params.name, "getting domain info");
        let (id, zone) = self.store.domain_by_name(&params.name)?;
        response.set_value(DomainInfo::new(id, &zone));
        Ok(())
    }
}

/// `getAllDomainMetadata`: the whole metadata map of a zone.
pub struct GetAllDomainMetadata {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for GetAllDomainMetadata {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: DomainParams = request.parameters()?;
        info!(domain = %params.name, "getting all domain metadata");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        let metadata: BTreeMap<String, Vec<String>> = zone.all_metadata();
        response.set_value(metadata);
        Ok(())
    }
}

/// `getDomainMetadata`: values of one metadata kind.
pub struct GetDomainMetadata {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for GetDomainMetadata {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: MetadataParams = request.parameters()?;
        info!(domain = %params.name, kind = %params.kind, "getting metadata");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        response.set_value(zone.metadata(&params.kind));
        Ok(())
    }
}

/// `setDomainMetadata`: replaces the values of one metadata kind.
pub struct SetDomainMetadata {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for SetDomainMetadata {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: SetMetadataParams = request.parameters()?;
        info!(domain = %params.name, kind = %params.kind, value = ?params.value, "setting metadata");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        zone.set_metadata(params.kind, params.value);
        response.set_value(true);
        Ok(())
    }
}

/// `getDomainKeys`: every key of a zone with its positional id.
pub struct GetDomainKeys {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for GetDomainKeys {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: DomainParams = request.parameters()?;
        info!(domain = %params.name, "returning all domain keys");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        let keys: Vec<DomainKey> = zone
            .keys()
            .into_iter()
            .enumerate()
            .map(|(id, k)| DomainKey {
                id,
                flags: k.flags,
                active: k.active,
                published: k.published,
                content: k.content,
            })
            .collect();
        response.set_value(keys);
        Ok(())
    }
}

/// `addDomainKey`: appends a key and answers with its id.
pub struct AddDomainKey {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for AddDomainKey {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: AddKeyParams = request.parameters()?;
        info!(domain = %params.name, flags = params.key.flags, "adding domain key");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        let id = zone.add_key(params.key);
        response.set_value(id);
        Ok(())
    }
}

/// `removeDomainKey`: removes a key. Later key ids shift down by one.
pub struct RemoveDomainKey {
    store: Arc<Store>,
}

#[async_trait]
impl MethodHandler for RemoveDomainKey {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: KeyIdParams = request.parameters()?;
        info!(domain = %params.name, id = params.id, "removing domain key");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        zone.remove_key(params.key_id()?)?;
        response.set_value(true);
        Ok(())
    }
}

/// Key lifecycle transitions, one per remote backend method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Activate,
    Deactivate,
    Publish,
    Unpublish,
}

impl KeyAction {
    /// Every action, in registration order.
    pub const ALL: [KeyAction; 4] = [
        KeyAction::Activate,
        KeyAction::Deactivate,
        KeyAction::Publish,
        KeyAction::Unpublish,
    ];

    /// Method name on the wire.
    pub const fn method(&self) -> &'static str {
        match self {
            KeyAction::Activate => "activateDomainKey",
            KeyAction::Deactivate => "deactivateDomainKey",
            KeyAction::Publish => "publishDomainKey",
            KeyAction::Unpublish => "unpublishDomainKey",
        }
    }

    /// The key fields this action changes.
    pub const fn update(&self) -> KeyUpdate {
        match self {
            KeyAction::Activate => KeyUpdate::active(true),
            KeyAction::Deactivate => KeyUpdate::active(false),
            KeyAction::Publish => KeyUpdate::published(true),
            KeyAction::Unpublish => KeyUpdate::published(false),
        }
    }
}

/// `activateDomainKey` and friends: flips one key flag.
pub struct UpdateDomainKey {
    store: Arc<Store>,
    action: KeyAction,
}

#[async_trait]
impl MethodHandler for UpdateDomainKey {
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<()> {
        let params: KeyIdParams = request.parameters()?;
        info!(domain = %params.name, id = params.id, action = ?self.action, "updating domain key");
        let (_, zone) = self.store.domain_by_name(&params.name)?;
        zone.update_key(params.key_id()?, self.action.update())?;
        response.set_value(true);
        Ok(())
    }
}

/// Registers every remote backend method against `store`.
pub fn register_all(dispatcher: &mut Dispatcher, store: Arc<Store>) {
    dispatcher.register("initialize", Initialize);
    dispatcher.register("lookup", Lookup { store: Arc::clone(&store) });
    dispatcher.register("list", List { store: Arc::clone(&store) });
    dispatcher.register("getAllDomains", GetAllDomains { store: Arc::clone(&store) });
    dispatcher.register("getDomainInfo", GetDomainInfo { store: Arc::clone(&store) });
    dispatcher.register(
        "getAllDomainMetadata",
        GetAllDomainMetadata { store: Arc::clone(&store) },
    );
    dispatcher.register("getDomainMetadata", GetDomainMetadata { store: Arc::clone(&store) });
    dispatcher.register("setDomainMetadata", SetDomainMetadata { store: Arc::clone(&store) });
    dispatcher.register("getDomainKeys", GetDomainKeys { store: Arc::clone(&store) });
    dispatcher.register("addDomainKey", AddDomainKey { store: Arc::clone(&store) });
    dispatcher.register("removeDomainKey", RemoveDomainKey { store: Arc::clone(&store) });

    for action in KeyAction::ALL {
        dispatcher.register(
            action.method(),
            UpdateDomainKey {
                store: Arc::clone(&store),
                action,
            },
        );
    }
}
