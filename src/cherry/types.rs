//! Cherry Servers API wire types.
//!
//! The API is loose about identifier types (numbers in one response,
//! strings in another) and about whether plans, regions and images are
//! nested objects or bare slugs. The deserializers here accept both forms.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::resource::ResourceStatus;

/// Tags as stored by the provider.
pub type Tags = BTreeMap<String, String>;

/// Type string the provider reports for floating IPs.
pub const FLOATING_IP_TYPE: &str = "floating-ip";

/// Suffix the provider appends to A records.
pub const A_RECORD_SUFFIX: &str = ".cloud.cherryservers.net";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSlug {
    Text(String),
    Object {
        #[serde(default)]
        slug: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

/// Deserializes a numeric ID that may be sent as a string.
///
/// # Errors
///
/// Fails if the value is neither a number nor a numeric string.
pub fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Deserializes an identifier of any form into a string.
///
/// # Errors
///
/// Fails if the value is neither a number nor a string.
pub fn de_string_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(n)) => Ok(Some(n)),
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawId::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn de_opt_string_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    }))
}

fn de_opt_slug<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawSlug>::deserialize(deserializer)? {
        None => None,
        Some(RawSlug::Text(s)) => Some(s),
        Some(RawSlug::Object { slug, name }) => slug.or(name),
    })
}

fn de_tags<'de, D>(deserializer: D) -> Result<Tags, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Tags>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reference to another resource with a numeric ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericRef {
    /// Referenced ID, absent for empty objects.
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub id: Option<u64>,
}

/// Reference to another resource with an opaque string ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringRef {
    /// Referenced ID, absent for empty objects.
    #[serde(default, deserialize_with = "de_opt_string_id")]
    pub id: Option<String>,
}

/// IP address assigned to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    /// Address ID.
    #[serde(deserialize_with = "de_string_id")]
    pub id: String,
    /// Dotted address.
    #[serde(default)]
    pub address: String,
    /// Address type (primary-ip, floating-ip, private-ip…).
    #[serde(default, rename = "type")]
    pub address_type: String,
}

/// A server as returned by `GET servers/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server ID.
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Hostname.
    #[serde(default)]
    pub hostname: String,
    /// Raw provider status.
    #[serde(default)]
    pub status: String,
    /// Power state (`on`/`off`), when reported.
    #[serde(default, alias = "power_state")]
    pub power: Option<String>,
    /// Image slug.
    #[serde(default, deserialize_with = "de_opt_slug")]
    pub image: Option<String>,
    /// Plan slug.
    #[serde(default, deserialize_with = "de_opt_slug")]
    pub plan: Option<String>,
    /// Region slug.
    #[serde(default, deserialize_with = "de_opt_slug")]
    pub region: Option<String>,
    /// Owning project.
    #[serde(default)]
    pub project: Option<NumericRef>,
    /// SSH keys installed on the server.
    #[serde(default)]
    pub ssh_keys: Vec<NumericRef>,
    /// Tags.
    #[serde(default, deserialize_with = "de_tags")]
    pub tags: Tags,
    /// Whether the server is a spot instance.
    #[serde(default, alias = "spot_market")]
    pub spot_instance: bool,
    /// Attached storage, if any.
    #[serde(default)]
    pub storage: Option<NumericRef>,
    /// Assigned IP addresses.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
}

impl Server {
    /// SSH key IDs, sorted and deduplicated.
    #[must_use]
    pub fn ssh_key_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.ssh_keys.iter().filter_map(|k| k.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Owning project ID.
    #[must_use]
    pub fn project_id(&self) -> Option<u64> {
        self.project.as_ref().and_then(|p| p.id)
    }

    /// Attached storage ID.
    #[must_use]
    pub fn storage_id(&self) -> Option<u64> {
        self.storage.as_ref().and_then(|s| s.id)
    }
}

/// A floating IP as returned by `GET ips/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    /// IP ID (UUID).
    #[serde(deserialize_with = "de_string_id")]
    pub id: String,
    /// Dotted address.
    #[serde(default)]
    pub address: String,
    /// CIDR notation.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Address type; must be `floating-ip` for managed IPs.
    #[serde(default, rename = "type")]
    pub ip_type: String,
    /// Region slug.
    #[serde(default, deserialize_with = "de_opt_slug")]
    pub region: Option<String>,
    /// IP this address is routed to.
    #[serde(default)]
    pub routed_to: Option<StringRef>,
    /// Server this address targets.
    #[serde(default)]
    pub targeted_to: Option<NumericRef>,
    /// Reverse DNS record.
    #[serde(default)]
    pub ptr_record: Option<String>,
    /// Forward DNS record.
    #[serde(default)]
    pub a_record: Option<String>,
    /// Tags.
    #[serde(default, deserialize_with = "de_tags")]
    pub tags: Tags,
    /// Owning project.
    #[serde(default)]
    pub project: Option<NumericRef>,
}

impl FloatingIp {
    /// Targeted server ID, 0 when unassigned.
    #[must_use]
    pub fn target_server_id(&self) -> u64 {
        self.targeted_to.as_ref().and_then(|t| t.id).unwrap_or(0)
    }

    /// ID of the IP this address routes to.
    #[must_use]
    pub fn route_ip_id(&self) -> Option<&str> {
        self.routed_to.as_ref().and_then(|r| r.id.as_deref())
    }

    /// PTR record without the trailing dot.
    #[must_use]
    pub fn normalized_ptr_record(&self) -> Option<&str> {
        self.ptr_record.as_deref().map(normalize_ptr_record)
    }

    /// A record without the provider suffix.
    #[must_use]
    pub fn normalized_a_record(&self) -> Option<&str> {
        self.a_record.as_deref().map(normalize_a_record)
    }
}

/// Strips the trailing dot the provider appends to PTR records.
#[must_use]
pub fn normalize_ptr_record(record: &str) -> &str {
    record.strip_suffix('.').unwrap_or(record)
}

/// Strips the provider's A record suffix.
#[must_use]
pub fn normalize_a_record(record: &str) -> &str {
    let trimmed = normalize_ptr_record(record);
    trimmed.strip_suffix(A_RECORD_SUFFIX).unwrap_or(trimmed)
}

/// An SSH key as returned by `GET ssh-keys/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    /// Key ID.
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    /// Label.
    #[serde(default)]
    pub label: String,
    /// Public key.
    #[serde(default)]
    pub key: String,
    /// Fingerprint.
    #[serde(default)]
    pub fingerprint: String,
}

/// A storage volume as returned by `GET storages/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume ID.
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    /// Size in GB.
    #[serde(default)]
    pub size: u64,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Region slug.
    #[serde(default, deserialize_with = "de_opt_slug")]
    pub region: Option<String>,
    /// Server the volume is attached to.
    #[serde(default)]
    pub attached_to: Option<NumericRef>,
    /// iSCSI VLAN IP.
    #[serde(default)]
    pub vlan_ip: Option<String>,
    /// iSCSI initiator name.
    #[serde(default)]
    pub initiator: Option<String>,
    /// iSCSI portal IP.
    #[serde(default)]
    pub portal_ip: Option<String>,
}

impl Volume {
    /// Attached server ID, if any.
    #[must_use]
    pub fn attached_server_id(&self) -> Option<u64> {
        self.attached_to.as_ref().and_then(|a| a.id)
    }
}

/// BGP settings of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bgp {
    /// Whether BGP is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Local ASN assigned by the provider.
    #[serde(default)]
    pub local_asn: Option<u64>,
}

/// A project as returned by `GET projects/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project ID.
    #[serde(deserialize_with = "de_u64")]
    pub id: u64,
    /// Name.
    #[serde(default)]
    pub name: String,
    /// BGP settings.
    #[serde(default)]
    pub bgp: Option<Bgp>,
}

impl Project {
    /// Whether BGP is enabled.
    #[must_use]
    pub fn bgp_enabled(&self) -> bool {
        self.bgp.as_ref().is_some_and(|b| b.enabled)
    }
}

/// Common view of an observed resource.
pub trait ObservedResource: Clone + std::fmt::Debug + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static {
    /// Provider-assigned ID.
    fn id(&self) -> String;

    /// Normalized status.
    fn status(&self) -> ResourceStatus {
        ResourceStatus::Active
    }

    /// Raw status string, for messages.
    fn raw_status(&self) -> &str {
        "active"
    }

    /// Human-readable name.
    fn display_name(&self) -> String;
}

impl ObservedResource for Server {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn status(&self) -> ResourceStatus {
        ResourceStatus::from_provider(&self.status)
    }

    fn raw_status(&self) -> &str {
        &self.status
    }

    fn display_name(&self) -> String {
        if self.hostname.is_empty() {
            self.name.clone()
        } else {
            self.hostname.clone()
        }
    }
}

impl ObservedResource for FloatingIp {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn display_name(&self) -> String {
        self.address.clone()
    }
}

impl ObservedResource for SshKey {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn display_name(&self) -> String {
        self.label.clone()
    }
}

impl ObservedResource for Volume {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn display_name(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("{} GB", self.size))
    }
}

impl ObservedResource for Project {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

/// ID returned by a mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceRef {
    /// Provider-assigned ID.
    #[serde(deserialize_with = "de_string_id")]
    pub id: String,
}
