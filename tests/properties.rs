//! Property tests for the leaf value types.

mod common;

use std::time::Duration;

use proptest::prelude::*;

use loopexec::{Endpoint, Ipv4Endpoint, Ipv6Endpoint, LoopInstant};

proptest! {
    #[test]
    fn v4_endpoint_display_round_trips(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255, port: u16) {
        let text = format!("{a}.{b}.{c}.{d}");
        let ep = Ipv4Endpoint::new(&text, port).unwrap();
        prop_assert_eq!(ep.to_string(), format!("{text}:{port}"));
        prop_assert_eq!(ep.port(), port);
    }

    #[test]
    fn endpoint_socket_addr_round_trips(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255, port: u16) {
        let ep: Endpoint = Ipv4Endpoint::new(&format!("{a}.{b}.{c}.{d}"), port).unwrap().into();
        prop_assert_eq!(Endpoint::from(ep.socket_addr()), ep);
    }

    #[test]
    fn v6_parse_accepts_only_literals(port: u16) {
        prop_assert!(Ipv6Endpoint::new("::1", port).is_ok());
        prop_assert!(Ipv6Endpoint::new("not-an-address", port).is_err());
    }

    #[test]
    fn loop_instant_ordering_is_monotone(base in 0u64..1 << 40, delta in 0u64..1 << 20) {
        let t = LoopInstant::from_millis(base);
        let later = t + Duration::from_millis(delta);
        prop_assert!(later >= t);
        prop_assert_eq!(later - t, Duration::from_millis(delta));
        prop_assert_eq!(t - later, Duration::ZERO);
    }
}
