//! Bucket key layout.
//!
//! The resource key is wrapped in braces so a clustered store hashes both of
//! a request's keys to the same shard; the atomic consume script touches
//! them together.

use std::net::IpAddr;

pub fn resource_key(method: &str, host: &str, path: &str) -> String {
    format!("{{rl:{method}:{host}:{path}}}:resource")
}

pub fn ip_key(addr: &IpAddr) -> String {
    format!("rl:ip:{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_is_braced_for_cluster_colocation() {
        let key = resource_key("GET", "gateway.example", "/tx/abc/data");
        assert_eq!(key, "{rl:GET:gateway.example:/tx/abc/data}:resource");
    }

    #[test]
    fn ip_key_formats_both_families() {
        assert_eq!(ip_key(&"1.2.3.4".parse().unwrap()), "rl:ip:1.2.3.4");
        assert_eq!(ip_key(&"::1".parse().unwrap()), "rl:ip:::1");
    }
}
