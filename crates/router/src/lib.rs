//! # Router
//!
//! Sticky-session hash routing: maps a client's source address to a worker
//! slot index.
//!
//! This runs on every accepted connection, so it hashes the textual address
//! in place with 32-bit MurmurHash2 and a fixed seed, then reduces modulo the
//! slot count. IPv4 and IPv6 text are treated the same way. Pure and
//! stateless: the same address and slot count always give the same slot,
//! across calls and across process restarts.
//!
//! Not a security boundary; collisions and predictability are acceptable.

use std::io::{Cursor, Write};
use std::net::IpAddr;

use contracts::SlotIndex;
use murmur2::murmur2;

/// Fixed hash seed. Changing it remaps every client.
pub const ROUTER_SEED: u32 = 0x9747_b28c;

/// Longest textual IP address is 45 bytes (IPv4-mapped IPv6)
const ADDR_BUF_LEN: usize = 64;

/// 32-bit fingerprint of an address string
pub fn fingerprint(address: &str) -> u32 {
    murmur2(address.as_bytes(), ROUTER_SEED)
}

/// Slot for a textual source address.
///
/// `slot_count` must be positive; zero is a caller bug and yields slot 0 in
/// release builds.
pub fn route(address: &str, slot_count: usize) -> SlotIndex {
    reduce(fingerprint(address), slot_count)
}

/// Slot for a source IP.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are routed as their IPv4
/// form, so a client keeps its slot whether the listener is dual-stack or not.
/// The address is formatted into a stack buffer, no allocation.
pub fn route_ip(ip: IpAddr, slot_count: usize) -> SlotIndex {
    let ip = ip.to_canonical();
    let mut buf = [0u8; ADDR_BUF_LEN];
    let len = {
        let mut cursor = Cursor::new(&mut buf[..]);
        // Cannot overflow: ADDR_BUF_LEN exceeds the longest IP text.
        let _ = write!(cursor, "{ip}");
        cursor.position() as usize
    };
    reduce(murmur2(&buf[..len], ROUTER_SEED), slot_count)
}

fn reduce(hash: u32, slot_count: usize) -> SlotIndex {
    debug_assert!(slot_count > 0, "slot_count must be positive");
    if slot_count == 0 {
        return 0;
    }
    (hash as usize) % slot_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn bucket_counts<I: IntoIterator<Item = String>>(addresses: I, slots: usize) -> Vec<usize> {
        let mut counts = vec![0usize; slots];
        for address in addresses {
            counts[route(&address, slots)] += 1;
        }
        counts
    }

    fn assert_spread(counts: &[usize]) {
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(min > 0, "empty bucket in {counts:?}");
        assert!(
            max <= 3 * min,
            "distribution too skewed: max={max} min={min} counts={counts:?}"
        );
    }

    #[test]
    fn test_route_is_deterministic() {
        for address in ["203.0.113.7", "203.0.113.8", "::1", "2001:db8::42"] {
            let first = route(address, 4);
            for _ in 0..100 {
                assert_eq!(route(address, 4), first);
            }
        }
    }

    #[test]
    fn test_route_in_range() {
        let addresses = ["0.0.0.0", "255.255.255.255", "::", "fe80::1%eth0", ""];
        for slots in 1..=17 {
            for address in addresses {
                assert!(route(address, slots) < slots);
            }
        }
    }

    #[test]
    fn test_single_slot_always_zero() {
        assert_eq!(route("198.51.100.1", 1), 0);
        assert_eq!(route("2001:db8::1", 1), 0);
    }

    #[test]
    fn test_concrete_addresses_stable() {
        let j = route("203.0.113.7", 4);
        let k = route("203.0.113.8", 4);
        for _ in 0..100 {
            assert_eq!(route("203.0.113.7", 4), j);
            assert_eq!(route("203.0.113.8", 4), k);
        }
    }

    #[test]
    fn test_route_ip_matches_textual_route() {
        let v4: IpAddr = "203.0.113.7".parse().unwrap();
        let v6: IpAddr = "2001:db8::7".parse().unwrap();
        assert_eq!(route_ip(v4, 8), route("203.0.113.7", 8));
        assert_eq!(route_ip(v6, 8), route("2001:db8::7", 8));
    }

    #[test]
    fn test_mapped_ipv4_routes_like_ipv4() {
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 0, 2, 33).to_ipv6_mapped());
        let plain = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 33));
        for slots in [2, 3, 8, 16] {
            assert_eq!(route_ip(mapped, slots), route_ip(plain, slots));
        }
    }

    #[test]
    fn test_longest_ipv6_text_fits_buffer() {
        let ip: IpAddr = "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff".parse().unwrap();
        assert_eq!(
            route_ip(ip, 8),
            route("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff", 8)
        );
    }

    #[test]
    fn test_distribution_sequential_ipv4() {
        let addresses = (0..10_000u32).map(|i| Ipv4Addr::from(0x0a00_0000 + i).to_string());
        assert_spread(&bucket_counts(addresses, 8));
    }

    #[test]
    fn test_distribution_clustered_subnets() {
        // A handful of /24s, as produced by a few NATed client networks
        let addresses = (0..40u32).flat_map(|net| {
            (1..=254u32).map(move |host| format!("198.51.{}.{}", net, host))
        });
        let addresses: Vec<String> = addresses.take(10_000).collect();
        assert_eq!(addresses.len(), 10_000);
        assert_spread(&bucket_counts(addresses, 8));
    }

    #[test]
    fn test_distribution_sequential_ipv6() {
        let base = u128::from(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0));
        let addresses = (0..10_000u128).map(|i| Ipv6Addr::from(base + i).to_string());
        assert_spread(&bucket_counts(addresses, 8));
    }

    #[test]
    fn test_distribution_random_population() {
        let mut rng = rand::rng();
        let mut seen = HashSet::new();
        while seen.len() < 10_000 {
            let ip = Ipv4Addr::from(rng.random::<u32>());
            seen.insert(ip.to_string());
        }
        assert_spread(&bucket_counts(seen, 8));
    }

    #[test]
    fn test_different_addresses_use_several_slots() {
        let used: HashSet<_> = (1..=50)
            .map(|i| route(&format!("203.0.113.{i}"), 4))
            .collect();
        assert!(used.len() > 1);
    }
}
