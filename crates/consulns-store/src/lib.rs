//! # consulns Zone Store
//!
//! In-memory registry of the authoritative zones served by the consulns
//! remote backend:
//!
//! - **Zones**: ordered collection of [`Domain`]s; the position of a zone
//!   is its externally visible id
//! - **Records**: per-owner record sequences with zone defaults for unset
//!   TTL and priority
//! - **Keys**: DNSSEC key bookkeeping (flags, active, published, content)
//! - **Metadata**: per-zone `kind -> [values]` configuration
//! - **Synchronization**: [`sync`] applies batches of external changes
//!   through the same mutation contracts the protocol handlers use
//!
//! Every [`Domain`] guards its collections with its own lock. All store
//! operations are synchronous and complete under that lock, so a caller
//! that is abandoned mid-request never observes or leaves a half-applied
//! mutation.
//!
//! ## Example
//!
//! ```rust
//! use consulns_store::{Defaults, Domain, Record, RecordType, Store};
//!
//! let store = Store::new();
//! let zone = Domain::new("example.com.", "native", Defaults::new(3600, 10));
//! zone.add_record("www.example.com.", Record::new(RecordType::A, "192.0.2.1")).unwrap();
//! store.add_zone(zone).unwrap();
//!
//! let records = store.forward_lookup("www.example.com.", RecordType::A);
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].ttl, 3600);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod sync;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A zone, domain or key id does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A zone with the same name is already registered.
    #[error("zone already exists: {name}")]
    DuplicateZone {
        /// The zone name.
        name: String,
    },

    /// A zone or owner name is missing its trailing dot.
    #[error("invalid name: {name}, expected trailing .")]
    InvalidName {
        /// The offending name.
        name: String,
    },
}

impl StoreError {
    /// Creates a new not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    fn invalid_name(name: &str) -> Self {
        Self::InvalidName {
            name: name.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns true if `name` is a fully-qualified, trailing-dot name.
#[inline]
pub fn is_fqdn(name: &str) -> bool {
    name.ends_with('.')
}

/// Placeholder in a record value that is replaced by the zone serial
/// whenever the record is read.
pub const SERIAL_PLACEHOLDER: &str = "{serial}";

// ============================================================================
// Record Types
// ============================================================================

/// The record types the backend stores and answers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// Query wildcard matching every type. Never stored.
    Any,
    /// Start of authority.
    Soa,
    /// Name server.
    Ns,
    /// IPv4 address.
    A,
    /// IPv6 address.
    Aaaa,
    /// Mail exchange.
    Mx,
    /// Canonical name.
    Cname,
    /// Text.
    Txt,
    /// Service locator.
    Srv,
}

impl RecordType {
    /// Returns the presentation name of this type.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Soa => "SOA",
            Self::Ns => "NS",
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Mx => "MX",
            Self::Cname => "CNAME",
            Self::Txt => "TXT",
            Self::Srv => "SRV",
        }
    }

    /// Returns true if a record of type `stored` answers a query for `self`.
    #[inline]
    pub fn matches(&self, stored: RecordType) -> bool {
        *self == Self::Any || *self == stored
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unsupported record type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported record type: {0}")]
pub struct UnknownRecordType(pub String);

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "SOA" => Ok(Self::Soa),
            "NS" => Ok(Self::Ns),
            "A" => Ok(Self::A),
            "AAAA" => Ok(Self::Aaaa),
            "MX" => Ok(Self::Mx),
            "CNAME" => Ok(Self::Cname),
            "TXT" => Ok(Self::Txt),
            "SRV" => Ok(Self::Srv),
            _ => Err(UnknownRecordType(s.to_string())),
        }
    }
}

/// A single resource record stored under an owner name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// TTL in seconds. Zero means "use the zone default".
    #[serde(default)]
    pub ttl: u32,
    /// The record type.
    #[serde(rename = "type")]
    pub rtype: RecordType,
    /// Priority (MX/SRV). Zero means "use the zone default".
    #[serde(default)]
    pub priority: u32,
    /// The value is refreshed from the external KV store.
    #[serde(default)]
    pub consul: bool,
    /// Literal value in presentation format.
    pub value: String,
}

impl Record {
    /// Creates a record with unset TTL and priority.
    pub fn new(rtype: RecordType, value: impl Into<String>) -> Self {
        Self {
            ttl: 0,
            rtype,
            priority: 0,
            consul: false,
            value: value.into(),
        }
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the record as KV-backed.
    pub fn with_consul(mut self, consul: bool) -> Self {
        self.consul = consul;
        self
    }
}

// ============================================================================
// Keys
// ============================================================================

/// DNSSEC key bookkeeping. The key material itself is never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// DNSKEY flags.
    pub flags: i32,
    /// Whether the key is used for signing.
    pub active: bool,
    /// Whether the key is published in the zone.
    pub published: bool,
    /// Opaque key material.
    pub content: String,
}

/// Partial update of a [`Key`]. Absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdate {
    /// New active flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// New published flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

impl KeyUpdate {
    /// Update that only changes the active flag.
    pub const fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            published: None,
        }
    }

    /// Update that only changes the published flag.
    pub const fn published(published: bool) -> Self {
        Self {
            active: None,
            published: Some(published),
        }
    }

    fn apply_to(&self, key: &mut Key) {
        if let Some(active) = self.active {
            key.active = active;
        }
        if let Some(published) = self.published {
            key.published = published;
        }
    }
}

// ============================================================================
// Domain
// ============================================================================

/// Values substituted for unset record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Default TTL in seconds.
    pub ttl: u32,
    /// Default priority.
    pub priority: u32,
}

impl Defaults {
    /// Creates a new set of defaults.
    pub const fn new(ttl: u32, priority: u32) -> Self {
        Self { ttl, priority }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self::new(3600, 10)
    }
}

/// Mutable part of a zone, guarded by the zone's lock.
#[derive(Debug, Clone)]
struct DomainState {
    last_update: DateTime<Utc>,
    records: BTreeMap<String, Vec<Record>>,
    keys: Vec<Key>,
    metadata: BTreeMap<String, Vec<String>>,
}

/// An authoritative zone: records, keys and metadata.
///
/// Name, kind and defaults are fixed at construction. Everything else sits
/// behind a per-zone lock that each method holds for its full duration.
#[derive(Debug)]
pub struct Domain {
    name: String,
    kind: String,
    defaults: Defaults,
    state: RwLock<DomainState>,
}

impl Domain {
    /// Creates an empty zone last updated now.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, defaults: Defaults) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            defaults,
            state: RwLock::new(DomainState {
                last_update: Utc::now(),
                records: BTreeMap::new(),
                keys: Vec::new(),
                metadata: BTreeMap::new(),
            }),
        }
    }

    /// Sets the last-update timestamp at construction time.
    pub fn with_last_update(self, at: DateTime<Utc>) -> Self {
        self.state.write().last_update = at;
        self
    }

    /// Returns the zone name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the zone kind.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the zone defaults.
    #[inline]
    pub const fn defaults(&self) -> Defaults {
        self.defaults
    }

    /// Returns when the zone was last updated.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.state.read().last_update
    }

    /// Moves the last-update timestamp.
    pub fn touch(&self, at: DateTime<Utc>) {
        self.state.write().last_update = at;
    }

    /// Returns the zone serial, `YYYYMMDD` of the last update.
    pub fn serial(&self) -> u32 {
        let serial = serial_for(self.last_update());
        debug!(zone = %self.name, serial, "generated serial");
        serial
    }

    /// Adds a record under `owner`, filling unset TTL and priority.
    pub fn add_record(&self, owner: &str, record: Record) -> Result<()> {
        let mut state = self.state.write();
        Self::add_record_locked(&mut state, self.defaults, owner, record)
    }

    fn add_record_locked(
        state: &mut DomainState,
        defaults: Defaults,
        owner: &str,
        mut record: Record,
    ) -> Result<()> {
        if !is_fqdn(owner) {
            return Err(StoreError::invalid_name(owner));
        }

        if record.ttl == 0 {
            record.ttl = defaults.ttl;
        }
        if record.priority == 0 {
            record.priority = defaults.priority;
        }

        state
            .records
            .entry(owner.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Returns the records under exactly `owner` matching `rtype`.
    ///
    /// `{serial}` in a value is rendered with the current serial.
    pub fn forward_lookup(&self, owner: &str, rtype: RecordType) -> Vec<Record> {
        let state = self.state.read();
        let serial = serial_for(state.last_update).to_string();
        state
            .records
            .get(owner)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| rtype.matches(r.rtype))
                    .map(|r| render(r, &serial))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every record in the zone with its owner name.
    ///
    /// `{serial}` in a value is rendered with the current serial.
    pub fn records(&self) -> Vec<(String, Record)> {
        let state = self.state.read();
        let serial = serial_for(state.last_update).to_string();
        state
            .records
            .iter()
            .flat_map(|(owner, records)| {
                let serial = &serial;
                records.iter().map(move |r| (owner.clone(), render(r, serial)))
            })
            .collect()
    }

    /// Returns the total number of records.
    pub fn record_count(&self) -> usize {
        self.state.read().records.values().map(Vec::len).sum()
    }

    /// Returns a snapshot of the keys. A key's id is its index.
    pub fn keys(&self) -> Vec<Key> {
        self.state.read().keys.clone()
    }

    /// Appends a key and returns its id.
    pub fn add_key(&self, key: Key) -> usize {
        let mut state = self.state.write();
        state.keys.push(key);
        state.keys.len() - 1
    }

    /// Applies a partial update to the key at `id`.
    pub fn update_key(&self, id: usize, update: KeyUpdate) -> Result<()> {
        let mut state = self.state.write();
        Self::update_key_locked(&mut state, &self.name, id, update)
    }

    fn update_key_locked(
        state: &mut DomainState,
        zone: &str,
        id: usize,
        update: KeyUpdate,
    ) -> Result<()> {
        let key = state
            .keys
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("zone {zone} has no key with id {id}")))?;
        update.apply_to(key);
        Ok(())
    }

    /// Removes the key at `id`. Ids of later keys shift down by one.
    pub fn remove_key(&self, id: usize) -> Result<Key> {
        let mut state = self.state.write();
        Self::remove_key_locked(&mut state, &self.name, id)
    }

    fn remove_key_locked(state: &mut DomainState, zone: &str, id: usize) -> Result<Key> {
        if id >= state.keys.len() {
            return Err(StoreError::not_found(format!(
                "zone {zone} has no key with id {id}"
            )));
        }
        Ok(state.keys.remove(id))
    }

    /// Replaces the values stored for `kind`.
    pub fn set_metadata(&self, kind: impl Into<String>, values: Vec<String>) {
        let mut state = self.state.write();
        Self::set_metadata_locked(&mut state, &self.name, kind.into(), values);
    }

    fn set_metadata_locked(state: &mut DomainState, zone: &str, kind: String, values: Vec<String>) {
        if let Some(prev) = state.metadata.get(&kind) {
            debug!(zone, kind = %kind, prev = ?prev, new = ?values, "overwriting metadata");
        }
        state.metadata.insert(kind, values);
    }

    /// Returns the values for `kind`, empty if never set.
    pub fn metadata(&self, kind: &str) -> Vec<String> {
        self.state
            .read()
            .metadata
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns all metadata of the zone.
    pub fn all_metadata(&self) -> BTreeMap<String, Vec<String>> {
        self.state.read().metadata.clone()
    }
}

/// Copies a stored record, substituting the serial placeholder.
fn render(record: &Record, serial: &str) -> Record {
    let mut record = record.clone();
    if record.value.contains(SERIAL_PLACEHOLDER) {
        record.value = record.value.replace(SERIAL_PLACEHOLDER, serial);
    }
    record
}

/// Computes the `YYYYMMDD` serial for a timestamp.
pub fn serial_for(at: DateTime<Utc>) -> u32 {
    let year = match u32::try_from(at.year()) {
        Ok(year) if year <= 9999 => year,
        _ => unreachable!("timestamp {at} has no 4-digit year"),
    };
    year * 10_000 + at.month() * 100 + at.day()
}

// ============================================================================
// Store
// ============================================================================

/// The set of zones served by the backend.
///
/// Zones are never removed, so a zone's position is a stable id.
#[derive(Debug, Default)]
pub struct Store {
    domains: RwLock<Vec<Arc<Domain>>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of zones.
    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    /// Returns true if the store has no zones.
    pub fn is_empty(&self) -> bool {
        self.domains.read().is_empty()
    }

    /// Returns the zones in id order.
    pub fn zones(&self) -> Vec<Arc<Domain>> {
        self.domains.read().clone()
    }

    /// Returns true if `id` names a zone.
    pub fn has_zone(&self, id: i64) -> bool {
        usize::try_from(id).is_ok_and(|id| id < self.len())
    }

    /// Returns the zone with the given id.
    pub fn zone_by_id(&self, id: i64) -> Result<Arc<Domain>> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.domains.read().get(idx).cloned())
            .ok_or_else(|| StoreError::not_found(format!("zone with id {id}")))
    }

    /// Returns the id and zone whose name is exactly `name`.
    pub fn domain_by_name(&self, name: &str) -> Result<(usize, Arc<Domain>)> {
        self.domains
            .read()
            .iter()
            .enumerate()
            .find(|(_, d)| d.name() == name)
            .map(|(id, d)| (id, Arc::clone(d)))
            .ok_or_else(|| StoreError::not_found(format!("zone with name {name}")))
    }

    /// Registers a zone and returns its id.
    pub fn add_zone(&self, domain: Domain) -> Result<usize> {
        if !is_fqdn(domain.name()) {
            return Err(StoreError::invalid_name(domain.name()));
        }

        let mut domains = self.domains.write();
        if domains.iter().any(|d| d.name() == domain.name()) {
            return Err(StoreError::DuplicateZone {
                name: domain.name().to_string(),
            });
        }

        debug!(zone = %domain.name(), id = domains.len(), "added zone");
        domains.push(Arc::new(domain));
        Ok(domains.len() - 1)
    }

    /// Looks `owner` up in every zone, in zone order.
    pub fn forward_lookup(&self, owner: &str, rtype: RecordType) -> Vec<Record> {
        self.zones()
            .iter()
            .flat_map(|d| d.forward_lookup(owner, rtype))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_zone() -> Domain {
        let zone = Domain::new("example.com.", "native", Defaults::new(3600, 10));
        zone.add_record(
            "example.com.",
            Record::new(
                RecordType::Soa,
                "ns1.example.com. hostmaster.example.com. 2024010101 7200 3600 1209600 3600",
            ),
        )
        .unwrap();
        zone.add_record("example.com.", Record::new(RecordType::Ns, "ns1.example.com."))
            .unwrap();
        zone.add_record("www.example.com.", Record::new(RecordType::A, "192.0.2.1"))
            .unwrap();
        zone
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!("A".parse::<RecordType>().unwrap(), RecordType::A);
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert_eq!("ANY".parse::<RecordType>().unwrap(), RecordType::Any);
        assert!("DS".parse::<RecordType>().is_err());
        assert_eq!(RecordType::Cname.to_string(), "CNAME");
    }

    #[test]
    fn test_record_type_serde() {
        let json = serde_json::to_string(&RecordType::Aaaa).unwrap();
        assert_eq!(json, "\"AAAA\"");
        let parsed: RecordType = serde_json::from_str("\"SRV\"").unwrap();
        assert_eq!(parsed, RecordType::Srv);
    }

    #[test]
    fn test_record_type_matches() {
        assert!(RecordType::Any.matches(RecordType::Mx));
        assert!(RecordType::A.matches(RecordType::A));
        assert!(!RecordType::A.matches(RecordType::Aaaa));
    }

    #[test]
    fn test_add_record_defaults() {
        let zone = Domain::new("example.com.", "native", Defaults::new(300, 20));
        zone.add_record("mail.example.com.", Record::new(RecordType::Mx, "mx.example.com."))
            .unwrap();
        zone.add_record(
            "mail.example.com.",
            Record::new(RecordType::Mx, "mx2.example.com.")
                .with_ttl(60)
                .with_priority(5),
        )
        .unwrap();

        let records = zone.forward_lookup("mail.example.com.", RecordType::Mx);
        assert_eq!(records[0].ttl, 300);
        assert_eq!(records[0].priority, 20);
        assert_eq!(records[1].ttl, 60);
        assert_eq!(records[1].priority, 5);
    }

    #[test]
    fn test_add_record_invalid_name() {
        let zone = create_test_zone();
        let before = zone.records();

        let err = zone
            .add_record("www.example.com", Record::new(RecordType::A, "192.0.2.9"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
        assert_eq!(zone.records(), before);
    }

    #[test]
    fn test_add_record_accumulates_duplicates() {
        let zone = create_test_zone();
        zone.add_record("www.example.com.", Record::new(RecordType::A, "192.0.2.1"))
            .unwrap();
        assert_eq!(zone.forward_lookup("www.example.com.", RecordType::A).len(), 2);
    }

    #[test]
    fn test_forward_lookup_any_and_typed() {
        let zone = create_test_zone();
        zone.add_record("example.com.", Record::new(RecordType::A, "192.0.2.10"))
            .unwrap();

        let any = zone.forward_lookup("example.com.", RecordType::Any);
        let types: Vec<_> = any.iter().map(|r| r.rtype).collect();
        assert_eq!(types, vec![RecordType::Soa, RecordType::Ns, RecordType::A]);

        let a = zone.forward_lookup("example.com.", RecordType::A);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].value, "192.0.2.10");

        assert!(zone.forward_lookup("example.com.", RecordType::Mx).is_empty());
        assert!(zone.forward_lookup("nope.example.com.", RecordType::Any).is_empty());
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let zone = create_test_zone();
        assert!(zone.forward_lookup("WWW.example.com.", RecordType::A).is_empty());
        assert!(zone.forward_lookup("www.example.com", RecordType::A).is_empty());
    }

    #[test]
    fn test_serial_from_last_update() {
        let day = Utc.with_ymd_and_hms(2024, 3, 7, 8, 0, 0).unwrap();
        let zone = create_test_zone().with_last_update(day);
        assert_eq!(zone.serial(), 20_240_307);

        zone.add_record("new.example.com.", Record::new(RecordType::A, "192.0.2.2"))
            .unwrap();
        zone.set_metadata("ALLOW-AXFR-FROM", vec!["AUTO-NS".into()]);
        assert_eq!(zone.serial(), 20_240_307);

        zone.touch(Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap());
        assert_eq!(zone.serial(), 20_240_307);

        zone.touch(Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 1).unwrap());
        assert_eq!(zone.serial(), 20_240_308);
    }

    #[test]
    fn test_soa_serial_follows_last_update() {
        let day = Utc.with_ymd_and_hms(2024, 3, 7, 8, 0, 0).unwrap();
        let zone = Domain::new("example.org.", "native", Defaults::default()).with_last_update(day);
        zone.add_record(
            "example.org.",
            Record::new(
                RecordType::Soa,
                "ns1.example.org. hostmaster.example.org. {serial} 7200 3600 1209600 3600",
            ),
        )
        .unwrap();

        let soa = zone.forward_lookup("example.org.", RecordType::Soa);
        assert_eq!(
            soa[0].value,
            "ns1.example.org. hostmaster.example.org. 20240307 7200 3600 1209600 3600"
        );

        zone.touch(day + chrono::Duration::days(1));
        let serial = zone.serial().to_string();
        assert_eq!(serial, "20240308");

        let soa = zone.forward_lookup("example.org.", RecordType::Soa);
        assert!(soa[0].value.contains(&serial));

        let (_, listed) = zone
            .records()
            .into_iter()
            .find(|(_, r)| r.rtype == RecordType::Soa)
            .unwrap();
        assert_eq!(listed.value, soa[0].value);
    }

    #[test]
    fn test_keys_lifecycle() {
        let zone = create_test_zone();
        let k0 = zone.add_key(Key {
            flags: 257,
            active: true,
            published: true,
            content: "ksk".into(),
        });
        let k1 = zone.add_key(Key {
            flags: 256,
            content: "zsk".into(),
            ..Key::default()
        });
        let k2 = zone.add_key(Key {
            flags: 256,
            content: "zsk2".into(),
            ..Key::default()
        });
        assert_eq!((k0, k1, k2), (0, 1, 2));

        zone.update_key(1, KeyUpdate::active(true)).unwrap();
        let keys = zone.keys();
        assert!(keys[1].active);
        assert!(!keys[1].published);

        zone.update_key(1, KeyUpdate::published(true)).unwrap();
        assert!(zone.keys()[1].active);
        assert!(zone.keys()[1].published);

        assert!(matches!(
            zone.update_key(3, KeyUpdate::active(false)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_key_shifts_ids() {
        let zone = create_test_zone();
        for content in ["a", "b", "c", "d"] {
            zone.add_key(Key {
                content: content.into(),
                ..Key::default()
            });
        }

        let removed = zone.remove_key(1).unwrap();
        assert_eq!(removed.content, "b");

        let keys = zone.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[1].content, "c");
        assert_eq!(keys[2].content, "d");

        assert!(zone.remove_key(3).is_err());
    }

    #[test]
    fn test_metadata() {
        let zone = create_test_zone();
        assert!(zone.metadata("SOA-EDIT").is_empty());

        zone.set_metadata("SOA-EDIT", vec!["INCEPTION-INCREMENT".into()]);
        zone.set_metadata("SOA-EDIT", vec!["EPOCH".into()]);
        assert_eq!(zone.metadata("SOA-EDIT"), vec!["EPOCH".to_string()]);

        zone.set_metadata("ALSO-NOTIFY", vec!["192.0.2.53".into(), "192.0.2.54".into()]);
        let all = zone.all_metadata();
        assert_eq!(all.len(), 2);
        assert_eq!(all["ALSO-NOTIFY"].len(), 2);
    }

    #[test]
    fn test_store_add_and_find() {
        let store = Store::new();
        assert!(store.is_empty());

        let id = store.add_zone(create_test_zone()).unwrap();
        assert_eq!(id, 0);

        let (found_id, zone) = store.domain_by_name("example.com.").unwrap();
        assert_eq!(found_id, 0);
        assert_eq!(zone.name(), "example.com.");

        let err = store.add_zone(create_test_zone()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateZone { .. }));
        assert_eq!(store.len(), 1);

        assert!(store.domain_by_name("example.org.").is_err());
        assert!(store.domain_by_name("EXAMPLE.COM.").is_err());
    }

    #[test]
    fn test_store_rejects_relative_zone() {
        let store = Store::new();
        let err = store
            .add_zone(Domain::new("example.com", "native", Defaults::default()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }

    #[test]
    fn test_store_ids() {
        let store = Store::new();
        store.add_zone(create_test_zone()).unwrap();
        store
            .add_zone(Domain::new("example.org.", "master", Defaults::default()))
            .unwrap();

        assert!(store.has_zone(0));
        assert!(store.has_zone(1));
        assert!(!store.has_zone(2));
        assert!(!store.has_zone(-1));

        assert_eq!(store.zone_by_id(1).unwrap().name(), "example.org.");
        assert!(store.zone_by_id(-1).is_err());
        assert!(store.zone_by_id(2).is_err());
    }

    #[test]
    fn test_store_forward_lookup_spans_zones() {
        let store = Store::new();
        store.add_zone(create_test_zone()).unwrap();

        let other = Domain::new("com.", "native", Defaults::default());
        other
            .add_record("www.example.com.", Record::new(RecordType::A, "198.51.100.1"))
            .unwrap();
        store.add_zone(other).unwrap();

        let records = store.forward_lookup("www.example.com.", RecordType::A);
        let values: Vec<_> = records.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["192.0.2.1", "198.51.100.1"]);
    }

    #[test]
    fn test_records_listing_order() {
        let zone = create_test_zone();
        let owners: Vec<_> = zone.records().into_iter().map(|(o, _)| o).collect();
        assert_eq!(
            owners,
            vec!["example.com.", "example.com.", "www.example.com."]
        );
        assert_eq!(zone.record_count(), 3);
    }
}
