use webrtc::ice::mdns::MulticastDnsMode;

pub const MDNS_MODE_ENV: &str = "LIVECAST_WEBRTC_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode() -> MulticastDnsMode {
    // QueryOnly: resolve remote .local candidates without publishing our own
    std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
        .unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn default_mdns_host_name(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{sanitized}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mdns_mode() {
        assert_eq!(parse_mdns_mode("OFF"), Some(MulticastDnsMode::Disabled));
        assert_eq!(parse_mdns_mode("query-only"), Some(MulticastDnsMode::QueryOnly));
        assert_eq!(parse_mdns_mode("gather"), Some(MulticastDnsMode::QueryAndGather));
        assert_eq!(parse_mdns_mode(""), None);
    }

    #[test]
    fn test_host_name_is_dns_safe() {
        assert_eq!(default_mdns_host_name("viewer:v1"), "viewer-v1.local");
    }
}
