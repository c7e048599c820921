// src/rtmp/endpoint.rs - Publish URL parsing
//
// rtmp[s]://host[:port]/app/stream[?query]

use crate::error::ConnectionError;
use url::Url;

pub const DEFAULT_RTMP_PORT: u16 = 1935;
pub const DEFAULT_RTMPS_PORT: u16 = 443;

/// A parsed publish target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    pub app_name: String,
    /// Everything after the app segment, query included
    pub stream_name: String,
    /// URL without the stream name, sent as `tcUrl`
    pub tc_url: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let malformed = || ConnectionError::EndpointMalformed(url.to_string());
        let parsed = Url::parse(url).map_err(|_| malformed())?;

        let tls = match parsed.scheme() {
            "rtmp" => false,
            "rtmps" => true,
            _ => return Err(malformed()),
        };
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(malformed)?
            .to_string();
        let port = parsed
            .port()
            .unwrap_or(if tls { DEFAULT_RTMPS_PORT } else { DEFAULT_RTMP_PORT });

        let path = parsed.path().trim_start_matches('/');
        let (app_name, stream) = path.split_once('/').ok_or_else(malformed)?;
        let stream = stream.trim_end_matches('/');
        if app_name.is_empty() || stream.is_empty() {
            return Err(malformed());
        }
        let stream_name = match parsed.query() {
            Some(query) => format!("{}?{}", stream, query),
            None => stream.to_string(),
        };

        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        let tc_url = format!("{}://{}/{}", parsed.scheme(), authority, app_name);

        Ok(Self {
            tls,
            host,
            port,
            app_name: app_name.to_string(),
            stream_name,
            tc_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let endpoint = Endpoint::parse("rtmp://example.com:1936/live/stream-key").unwrap();
        assert!(!endpoint.tls);
        assert_eq!(endpoint.host, "example.com");
        assert_eq!(endpoint.port, 1936);
        assert_eq!(endpoint.app_name, "live");
        assert_eq!(endpoint.stream_name, "stream-key");
        assert_eq!(endpoint.tc_url, "rtmp://example.com:1936/live");
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Endpoint::parse("rtmp://10.0.0.1/app/s").unwrap().port, 1935);
        let secure = Endpoint::parse("rtmps://live.example.com/app/s").unwrap();
        assert!(secure.tls);
        assert_eq!(secure.port, 443);
        assert_eq!(secure.tc_url, "rtmps://live.example.com/app");
    }

    #[test]
    fn test_stream_name_keeps_nested_path_and_query() {
        let endpoint = Endpoint::parse("rtmp://h/app/a/b?token=1").unwrap();
        assert_eq!(endpoint.app_name, "app");
        assert_eq!(endpoint.stream_name, "a/b?token=1");
    }

    #[test]
    fn test_malformed_urls() {
        for url in [
            "http://example.com/live/key",
            "rtmp://example.com/live",
            "rtmp://example.com/live/",
            "rtmp:///live/key",
            "not a url",
            "",
        ] {
            assert!(
                matches!(Endpoint::parse(url), Err(ConnectionError::EndpointMalformed(_))),
                "{} should be rejected",
                url
            );
        }
    }
}
