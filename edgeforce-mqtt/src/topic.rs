use serde::{Deserialize, Serialize};

/// A digital output write requested over MQTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCommand {
    pub channel: u8,
    pub value: bool,
}

/// Parses an inbound topic/payload pair into an [`IoCommand`].
///
/// Accepts both shapes the specification names: the bare
/// `edgeforce/io/do/{n}` form and the `/set`-suffixed
/// `edgeforce/io/do/{n}/set` command topic. `di` topics are published-only
/// and never accepted as commands even though they match the bare-form
/// prefix, since writing a digital *input* has no meaning.
pub fn parse_command(topic: &str, payload: &[u8]) -> Option<IoCommand> {
    let rest = topic
        .strip_prefix("edgeforce/io/do/")
        .or_else(|| topic.strip_prefix("edgeforce/io/di/"))?;

    if topic.starts_with("edgeforce/io/di/") {
        return None;
    }

    let channel_str = rest.strip_suffix("/set").unwrap_or(rest);
    let channel: u8 = channel_str.parse().ok()?;

    let value = match std::str::from_utf8(payload).ok()?.trim() {
        "1" => true,
        "0" => false,
        _ => return None,
    };

    Some(IoCommand { channel, value })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_set_suffixed_topic() {
        let cmd = parse_command("edgeforce/io/do/3/set", b"1").unwrap();
        assert_eq!(cmd, IoCommand { channel: 3, value: true });
    }

    #[test]
    fn parses_bare_topic() {
        let cmd = parse_command("edgeforce/io/do/2", b"0").unwrap();
        assert_eq!(cmd, IoCommand { channel: 2, value: false });
    }

    #[test]
    fn rejects_digital_input_topics() {
        assert!(parse_command("edgeforce/io/di/1/set", b"1").is_none());
        assert!(parse_command("edgeforce/io/di/1", b"1").is_none());
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_command("edgeforce/io/do/1/set", b"on").is_none());
    }

    #[test]
    fn rejects_unrelated_topic() {
        assert!(parse_command("edgeforce/system/cpu", b"1").is_none());
    }
}
