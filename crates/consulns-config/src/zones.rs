//! Zone bootstrap data.

use super::{ConfigError, Result};
use consulns_store::{is_fqdn, Defaults, Domain, Record, RecordType, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub use consulns_store::SERIAL_PLACEHOLDER;

/// A zone loaded into the store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name (trailing dot).
    pub name: String,

    /// Zone kind reported to the DNS server.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// TTL for records without one.
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,

    /// Priority for records without one.
    #[serde(default = "default_priority")]
    pub default_priority: u32,

    /// Initial metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<String>>,

    /// Initial records.
    #[serde(default)]
    pub records: Vec<RecordConfig>,
}

fn default_kind() -> String {
    "native".to_string()
}

fn default_ttl() -> u32 {
    3600
}

fn default_priority() -> u32 {
    10
}

/// A record in bootstrap data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Owner name: absolute (`www.example.com.`), relative (`www`) or `@`.
    pub owner: String,

    /// Record type.
    #[serde(rename = "type")]
    pub rtype: RecordType,

    /// TTL; zero or absent uses the zone default.
    #[serde(default)]
    pub ttl: u32,

    /// Priority; zero or absent uses the zone default.
    #[serde(default)]
    pub priority: u32,

    /// Value is refreshed from the external KV store.
    #[serde(default)]
    pub consul: bool,

    /// Value in presentation format. `{serial}` expands to the zone serial.
    pub value: String,
}

impl RecordConfig {
    fn new(owner: &str, rtype: RecordType, value: &str) -> Self {
        Self {
            owner: owner.to_string(),
            rtype,
            ttl: 0,
            priority: 0,
            consul: false,
            value: value.to_string(),
        }
    }
}

impl ZoneConfig {
    /// The zone served when the configuration defines none.
    pub fn builtin() -> Self {
        Self {
            name: "teapot.ovh.".to_string(),
            kind: default_kind(),
            default_ttl: default_ttl(),
            default_priority: default_priority(),
            metadata: BTreeMap::new(),
            records: vec![
                RecordConfig::new(
                    "@",
                    RecordType::Soa,
                    "ns1.teapot.ovh. root.teapot.ovh. {serial} 7200 3600 1209600 3600",
                ),
                RecordConfig::new("@", RecordType::Ns, "ns1.teapot.ovh."),
                RecordConfig::new("ns1", RecordType::A, "1.2.3.4"),
                RecordConfig::new("@", RecordType::A, "1.2.3.4"),
            ],
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !is_fqdn(&self.name) {
            return Err(ConfigError::InvalidValue {
                field: format!("zones.{}", self.name),
                message: "zone name must end with '.'".to_string(),
            });
        }

        if let Some(record) = self.records.iter().find(|r| r.rtype == RecordType::Any) {
            return Err(ConfigError::InvalidValue {
                field: format!("zones.{}.records", self.name),
                message: format!("{} cannot have type ANY", record.owner),
            });
        }

        Ok(())
    }

    /// Expands an owner name relative to this zone.
    pub fn absolute_owner(&self, owner: &str) -> String {
        if owner == "@" || owner.is_empty() {
            self.name.clone()
        } else if is_fqdn(owner) {
            owner.to_string()
        } else {
            format!("{owner}.{}", self.name)
        }
    }

    /// Builds the store zone described by this configuration.
    pub fn to_domain(&self) -> Result<Domain> {
        self.validate()?;

        let domain = Domain::new(
            &self.name,
            &self.kind,
            Defaults::new(self.default_ttl, self.default_priority),
        );
        for rc in &self.records {
            let record = Record::new(rc.rtype, rc.value.as_str())
                .with_ttl(rc.ttl)
                .with_priority(rc.priority)
                .with_consul(rc.consul);
            domain.add_record(&self.absolute_owner(&rc.owner), record)?;
        }

        for (kind, values) in &self.metadata {
            domain.set_metadata(kind.clone(), values.clone());
        }

        Ok(domain)
    }
}

/// Builds a store from bootstrap zones.
pub fn build_store(zones: &[ZoneConfig]) -> Result<Store> {
    let store = Store::new();
    for zone in zones {
        let domain = zone.to_domain()?;
        let records = domain.record_count();
        let id = store.add_zone(domain)?;
        info!(zone = %zone.name, id, records, "loaded zone");
    }
    Ok(store)
}
