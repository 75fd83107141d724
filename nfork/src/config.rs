use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One inbound as described by the configuration file and the admin API.
///
/// Field names follow the wire contract: `out` maps outbound names to
/// `[scheme://]host[:port]` targets, `timeout` is a duration string like
/// "100ms", and the optional fields keep their defaults when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundDescriptor {
    #[serde(default)]
    pub name: String,

    pub listen: String,

    #[serde(rename = "out")]
    pub outbounds: HashMap<String, String>,

    pub active: String,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_string")]
    pub timeout: Option<Duration>,

    #[serde(rename = "timeoutCode", default, skip_serializing_if = "Option::is_none")]
    pub timeout_code: Option<u16>,

    #[serde(rename = "idleConn", default, skip_serializing_if = "Option::is_none")]
    pub idle_connections: Option<usize>,
}

/// Loads the initial configuration: a JSON array of inbound descriptors.
pub fn load_descriptors<P: AsRef<Path>>(path: P) -> Result<Vec<InboundDescriptor>> {
    let path = path.as_ref();
    let body = std::fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("unable to read '{}': {}", path.display(), err)))?;
    parse_descriptors(&body)
}

pub fn parse_descriptors(body: &str) -> Result<Vec<InboundDescriptor>> {
    serde_json::from_str(body).map_err(|err| Error::Config(format!("invalid config: {}", err)))
}

/// Parses a Go-style duration string: one or more `<number><unit>` terms,
/// units ns/us/µs/ms/s/m/h, fractions allowed ("1m30s", "1.5s", "100ms").
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::Config("empty duration".to_string()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if number_len == 0 || number_len == rest.len() {
            return Err(Error::Config(format!("invalid duration '{}'", input)));
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale: u64 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return Err(Error::Config(format!("unknown duration unit '{}'", unit))),
        };

        let value: f64 = number
            .parse()
            .map_err(|_| Error::Config(format!("invalid duration '{}'", input)))?;
        nanos += (value * scale as f64).round() as u128;

        rest = tail;
    }

    Ok(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
}

/// Formats a duration so that `parse_duration(format_duration(d)) == d`:
/// the coarsest unit that represents the value exactly.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        "0s".to_string()
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", nanos / 1_000_000_000)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{}ns", nanos)
    }
}

mod duration_string {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&super::format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => super::parse_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("50ns").unwrap(), Duration::from_nanos(50));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3_600));
    }

    #[test]
    fn parse_duration_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1_500));
        assert_eq!(parse_duration("2.5ms").unwrap(), Duration::from_micros(2_500));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("100").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("10lightyears").is_err());
    }

    #[test]
    fn format_duration_round_trips() {
        for duration in [
            Duration::ZERO,
            Duration::from_nanos(17),
            Duration::from_micros(3),
            Duration::from_millis(250),
            Duration::from_secs(1),
            Duration::from_secs(90),
            Duration::from_millis(1_500),
        ] {
            let text = format_duration(duration);
            assert_eq!(parse_duration(&text).unwrap(), duration, "via '{}'", text);
        }
    }

    #[test]
    fn descriptor_round_trips_with_every_optional_field() {
        let descriptor = InboundDescriptor {
            name: "bob".to_string(),
            listen: "0.0.0.0:8080".to_string(),
            outbounds: HashMap::from([
                ("prod".to_string(), "prod.example.com:80".to_string()),
                ("staging".to_string(), "http://staging.example.com:8080".to_string()),
            ]),
            active: "prod".to_string(),
            timeout: Some(Duration::from_millis(100)),
            timeout_code: Some(504),
            idle_connections: Some(64),
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: InboundDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn descriptor_defaults_when_optionals_absent() {
        let json = r#"{
            "name": "bob",
            "listen": "127.0.0.1:8080",
            "out": {"prod": "localhost:9000"},
            "active": "prod"
        }"#;

        let descriptor: InboundDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.timeout, None);
        assert_eq!(descriptor.timeout_code, None);
        assert_eq!(descriptor.idle_connections, None);

        let round = serde_json::to_string(&descriptor).unwrap();
        assert!(!round.contains("timeout"));
        assert!(!round.contains("idleConn"));
    }

    #[test]
    fn parse_descriptors_reads_an_array() {
        let body = r#"[
            {"name": "a", "listen": ":8080", "out": {"x": "localhost:1"}, "active": "x",
             "timeout": "100ms", "timeoutCode": 503, "idleConn": 8}
        ]"#;

        let descriptors = parse_descriptors(body).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].timeout, Some(Duration::from_millis(100)));
        assert_eq!(descriptors[0].timeout_code, Some(503));
        assert_eq!(descriptors[0].idle_connections, Some(8));
    }

    #[test]
    fn parse_descriptors_rejects_bad_json() {
        assert!(parse_descriptors("not json").is_err());
        assert!(parse_descriptors(r#"[{"listen": ":1"}]"#).is_err());
    }
}
