//! Reinstall payload assembly.
//!
//! A reinstall wipes the server, so any field the caller leaves unset is
//! carried over from the last observed state rather than dropped.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::cherry::Server;
use crate::resource::ServerSpec;

use super::plan::FieldSet;

/// Default length of generated reinstall passwords.
pub const PASSWORD_LENGTH: usize = 16;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Effective reinstall parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReinstallParams {
    /// Image slug.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// SSH key IDs, sorted.
    pub ssh_keys: Vec<u64>,
    /// OS partition size in GB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_partition_size: Option<u32>,
    /// Base64 user data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// Merges the desired reinstall fields with the observed server.
///
/// Explicit `image` and `ssh_keys` win; unset ones keep the observed
/// values. `user_data` and `os_partition_size` cannot be observed and are
/// only sent when set.
#[must_use]
pub fn merge_with_observed(desired: &ServerSpec, observed: &Server) -> ReinstallParams {
    ReinstallParams {
        image: desired.image.clone().or_else(|| observed.image.clone()),
        ssh_keys: desired
            .sorted_ssh_keys()
            .unwrap_or_else(|| observed.ssh_key_ids()),
        os_partition_size: desired.os_partition_size,
        user_data: desired.user_data.clone(),
    }
}

impl ReinstallParams {
    /// Converts to the action payload.
    #[must_use]
    pub fn into_fields(self) -> FieldSet {
        let mut fields = FieldSet::new();
        if let Some(image) = self.image {
            fields.insert(String::from("image"), Value::from(image));
        }
        fields.insert(String::from("ssh_keys"), Value::from(self.ssh_keys));
        if let Some(size) = self.os_partition_size {
            fields.insert(String::from("os_partition_size"), Value::from(size));
        }
        if let Some(data) = self.user_data {
            fields.insert(String::from("user_data"), Value::from(data));
        }
        fields
    }
}

/// Generates a one-time root password for a reinstall.
///
/// The length is clamped to 8..=24. The result always contains a
/// lowercase letter, an uppercase letter and a digit.
#[must_use]
pub fn generate_password(length: usize) -> String {
    let length = length.clamp(8, 24);
    let mut rng = rand::thread_rng();
    let mut pick = |set: &[u8]| set[rng.gen_range(0..set.len())];

    let mut chars = vec![pick(LOWERCASE), pick(UPPERCASE), pick(DIGITS)];
    let all: Vec<u8> = [LOWERCASE, UPPERCASE, DIGITS].concat();
    while chars.len() < length {
        chars.push(pick(&all));
    }
    chars.shuffle(&mut rand::thread_rng());
    chars.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observed() -> Server {
        serde_json::from_value(json!({
            "id": 1,
            "hostname": "web-1",
            "image": "ubuntu_22_04",
            "ssh_keys": [{"id": 1}]
        }))
        .unwrap()
    }

    #[test]
    fn test_unset_fields_are_retained() {
        let params = merge_with_observed(&ServerSpec::default(), &observed());
        assert_eq!(params.image.as_deref(), Some("ubuntu_22_04"));
        assert_eq!(params.ssh_keys, vec![1]);
        assert_eq!(params.user_data, None);
    }

    #[test]
    fn test_explicit_keys_override() {
        let desired = ServerSpec {
            ssh_keys: Some(vec![2]),
            ..ServerSpec::default()
        };
        let params = merge_with_observed(&desired, &observed());
        assert_eq!(params.ssh_keys, vec![2]);
        assert_eq!(params.image.as_deref(), Some("ubuntu_22_04"));
    }

    #[test]
    fn test_explicit_image_overrides() {
        let desired = ServerSpec {
            image: Some(String::from("debian_12")),
            os_partition_size: Some(40),
            ..ServerSpec::default()
        };
        let fields = merge_with_observed(&desired, &observed()).into_fields();
        assert_eq!(fields.get("image"), Some(&json!("debian_12")));
        assert_eq!(fields.get("ssh_keys"), Some(&json!([1])));
        assert_eq!(fields.get("os_partition_size"), Some(&json!(40)));
        assert!(!fields.contains_key("user_data"));
    }

    #[test]
    fn test_password_composition() {
        for _ in 0..50 {
            let password = generate_password(PASSWORD_LENGTH);
            assert_eq!(password.len(), PASSWORD_LENGTH);
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
        }
        assert_eq!(generate_password(2).len(), 8);
        assert_eq!(generate_password(100).len(), 24);
    }
}
