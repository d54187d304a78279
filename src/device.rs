//! Device routing table.
//!
//! Maps client IP addresses to the upstream policy of the device that owns
//! them. Built once at startup and only read afterwards, so it is shared
//! between query tasks without locking.

use std::net::IpAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::DeviceConfig;

/// Upstream policy for one configured device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePolicy {
    pub name: String,
    pub upstreams: Vec<String>,
    pub tls_verify: bool,
}

/// Immutable client IP to device policy lookup.
#[derive(Debug, Default)]
pub struct DeviceIndex {
    by_ip: FxHashMap<IpAddr, Arc<DevicePolicy>>,
}

impl DeviceIndex {
    /// Build the index from the configured devices.
    ///
    /// IPs that do not parse are skipped without affecting the rest of the
    /// device. When two devices claim the same address the later one wins.
    pub fn new(devices: &[DeviceConfig]) -> Self {
        let mut by_ip = FxHashMap::default();

        for device in devices {
            let policy = Arc::new(DevicePolicy {
                name: device.name.clone(),
                upstreams: device.upstreams.clone(),
                tls_verify: device.tls_verify.unwrap_or(true),
            });

            for raw in &device.ips {
                let Ok(ip) = raw.parse::<IpAddr>() else {
                    debug!(device = %device.name, ip = %raw, "Skipping unparsable device IP");
                    continue;
                };

                if let Some(previous) = by_ip.insert(ip.to_canonical(), Arc::clone(&policy)) {
                    debug!(
                        ip = %ip,
                        previous = %previous.name,
                        device = %device.name,
                        "Device IP reassigned"
                    );
                }
            }
        }

        Self { by_ip }
    }

    /// Policy of the device owning `ip`, if any.
    pub fn get(&self, ip: IpAddr) -> Option<&DevicePolicy> {
        self.by_ip.get(&ip.to_canonical()).map(Arc::as_ref)
    }

    /// Like [`DeviceIndex::get`] but for an unparsed address.
    pub fn lookup(&self, ip: &str) -> Option<&DevicePolicy> {
        self.get(ip.parse().ok()?)
    }

    /// Number of indexed addresses.
    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, ips: &[&str], upstreams: &[&str], tls_verify: Option<bool>) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            ips: ips.iter().map(|s| s.to_string()).collect(),
            upstreams: upstreams.iter().map(|s| s.to_string()).collect(),
            tls_verify,
        }
    }

    #[test]
    fn tls_verify_defaults_to_true() {
        let index = DeviceIndex::new(&[device("tv", &["10.0.0.2"], &["1.1.1.1"], None)]);

        assert!(index.lookup("10.0.0.2").unwrap().tls_verify);
    }

    #[test]
    fn tls_verify_explicit_false() {
        let index = DeviceIndex::new(&[device(
            "test",
            &["192.168.0.23"],
            &["1.0.0.2"],
            Some(false),
        )]);

        let policy = index.lookup("192.168.0.23").unwrap();
        assert_eq!(policy.name, "test");
        assert_eq!(policy.upstreams, vec!["1.0.0.2"]);
        assert!(!policy.tls_verify);
    }

    #[test]
    fn unparsable_ips_are_skipped() {
        let index = DeviceIndex::new(&[device(
            "phone",
            &["not-an-ip", "10.0.0.7", "300.1.1.1"],
            &["8.8.8.8"],
            None,
        )]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("10.0.0.7").unwrap().name, "phone");
    }

    #[test]
    fn padded_ips_are_skipped() {
        let index = DeviceIndex::new(&[device("tv", &[" 10.0.0.1", "10.0.0.2 "], &["1.1.1.1"], None)]);

        assert!(index.is_empty());
    }

    #[test]
    fn later_device_wins_duplicate_ip() {
        let index = DeviceIndex::new(&[
            device("first", &["10.0.0.9", "10.0.0.10"], &["1.1.1.1"], None),
            device("second", &["10.0.0.9"], &["9.9.9.9"], Some(false)),
        ]);

        assert_eq!(index.lookup("10.0.0.9").unwrap().name, "second");
        assert_eq!(index.lookup("10.0.0.10").unwrap().name, "first");
    }

    #[test]
    fn absent_or_invalid_ip_returns_none() {
        let index = DeviceIndex::new(&[device("tv", &["10.0.0.2"], &["1.1.1.1"], None)]);

        assert!(index.lookup("10.0.0.3").is_none());
        assert!(index.lookup("garbage").is_none());
        assert!(index.lookup("").is_none());
    }

    #[test]
    fn ipv4_mapped_ipv6_matches_ipv4_entry() {
        let index = DeviceIndex::new(&[device("tv", &["10.0.0.2"], &["1.1.1.1"], None)]);

        assert_eq!(index.lookup("::ffff:10.0.0.2").unwrap().name, "tv");
    }

    #[test]
    fn ipv6_entries_use_canonical_form() {
        let index = DeviceIndex::new(&[device("nas", &["fe80:0:0:0::1"], &["1.1.1.1"], None)]);

        assert_eq!(index.lookup("fe80::1").unwrap().name, "nas");
        assert!(index.lookup("fe80::2").is_none());
    }

    #[test]
    fn devices_share_policy_across_ips() {
        let index = DeviceIndex::new(&[device("laptop", &["10.0.0.5", "10.0.0.6"], &["1.1.1.1"], None)]);

        let a = index.lookup("10.0.0.5").unwrap();
        let b = index.lookup("10.0.0.6").unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
