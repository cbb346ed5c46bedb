use shortid::MultiShortIds;

/// Where a proxied request should go: a numeric run id plus the container-exposed port
/// it asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub run_id: u64,
    pub port: u16,
}

/// Parses `/results/<run-short-id>/port/<port>[/...]`, returning the destination and the
/// remainder of the path to forward upstream.
pub fn from_path<'a>(codec: &MultiShortIds, path: &'a str) -> Option<(Destination, &'a str)> {
    let rest = path.strip_prefix("/results/")?;
    let (short_id, rest) = rest.split_once("/port/")?;
    let (port, rest) = match rest.split_once('/') {
        Some((port, tail)) => (port, tail),
        None => (rest, ""),
    };
    let dest = decode(codec, short_id, port)?;
    Some((dest, rest))
}

/// Parses `<run-short-id>-<port>.<domain>`: the destination is the last two
/// dash-separated segments of the first hostname label.
pub fn from_host(codec: &MultiShortIds, host: &str) -> Option<Destination> {
    let label = host.split('.').next()?;
    let mut segments: Vec<&str> = label.split('-').collect();
    let port = segments.pop()?;
    let short_id = segments.pop()?;
    decode(codec, short_id, port)
}

fn decode(codec: &MultiShortIds, short_id: &str, port: &str) -> Option<Destination> {
    let run_id = codec.decode("run", short_id).ok()?;
    let port: u16 = port.parse().ok()?;
    Some(Destination { run_id, port })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn codec() -> MultiShortIds {
        MultiShortIds::new("test-salt".to_string(), 4)
    }

    #[test]
    fn parses_path_form_with_trailing_segment() {
        let codec = codec();
        let short_id = codec.encode("run", 42);
        let path = format!("/results/{short_id}/port/8080/app/index.html");

        let (dest, rest) = from_path(&codec, &path).unwrap();
        assert_eq!(dest.run_id, 42);
        assert_eq!(dest.port, 8080);
        assert_eq!(rest, "app/index.html");
    }

    #[test]
    fn parses_path_form_with_no_trailing_segment() {
        let codec = codec();
        let short_id = codec.encode("run", 7);
        let path = format!("/results/{short_id}/port/80");

        let (dest, rest) = from_path(&codec, &path).unwrap();
        assert_eq!(dest.run_id, 7);
        assert_eq!(dest.port, 80);
        assert_eq!(rest, "");
    }

    #[test]
    fn parses_host_form_taking_last_two_segments() {
        let codec = codec();
        let short_id = codec.encode("run", 99);
        let host = format!("my-experiment-{short_id}-3000.example.com");

        let dest = from_host(&codec, &host).unwrap();
        assert_eq!(dest.run_id, 99);
        assert_eq!(dest.port, 3000);
    }

    #[test]
    fn invalid_short_id_is_rejected() {
        let codec = codec();
        assert!(from_path(&codec, "/results/!!!!/port/80").is_none());
    }

    #[test]
    fn arc_wrapped_codec_decodes_the_same_way() {
        let codec = Arc::new(codec());
        let short_id = codec.encode("run", 1);
        assert_eq!(
            from_host(&codec, &format!("{short_id}-22.example.com"))
                .unwrap()
                .run_id,
            1
        );
    }
}
