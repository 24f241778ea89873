//! Test fixtures.

use sfu_controller::models::IceCandidate;
use std::collections::HashMap;

/// Minimal SDP offer. The mock media engine answers any offer.
pub const SDP_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=mid:1\r\n";

/// A host ICE candidate for the first m-line.
pub fn ice_candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:1 1 UDP 2122260223 192.168.1.20 54400 typ host".to_string(),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    }
}

/// Environment for `Config::from_vars` with test-friendly timeouts.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("SFU_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SFU_HEALTH_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SFU_ID".to_string(), "sfu-test-001".to_string()),
        ("SFU_ENDPOINT_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ("SFU_MEDIA_RPC_TIMEOUT_SECONDS".to_string(), "1".to_string()),
        ("SFU_NODE_CHECK_INTERVAL_SECONDS".to_string(), "1".to_string()),
        ("SFU_RECORDING_ENABLED".to_string(), "true".to_string()),
        ("SFU_WS_URL".to_string(), "wss://sfu.test:4443".to_string()),
    ])
}
