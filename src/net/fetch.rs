use std::fmt;
use std::io::{self, Read, Write};

use flate2::write::MultiGzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use thiserror::Error;
use url::Url;

use super::counter::SizeCounter;
use crate::config::FetchOptions;

const CHUNK_SIZE: usize = 16 * 1024;

/// Content coding of a fetched response, as far as sizing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    /// zlib-wrapped deflate (RFC 1950), which is what `deflate` means in HTTP.
    Deflate,
}

impl ContentCoding {
    /// Map a `Content-Encoding` value onto the decode path.
    ///
    /// Codings we cannot decode (e.g. `br`) map to `Identity`, which makes
    /// the actual size equal the encoded size.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return ContentCoding::Identity;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            "deflate" => ContentCoding::Deflate,
            _ => ContentCoding::Identity,
        }
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentCoding::Identity => "identity",
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
        };
        f.write_str(name)
    }
}

/// Error during a resource fetch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme `{scheme}` (only http and https can be fetched)")]
    UnsupportedScheme { scheme: String },
    #[error("client error: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to read body: {0}")]
    Body(#[source] io::Error),
    #[error("failed to decode {coding} body: {source}")]
    Decode {
        coding: ContentCoding,
        #[source]
        source: io::Error,
    },
}

/// Sizes measured for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSize {
    pub url: String,
    pub status: u16,
    pub coding: ContentCoding,
    encoded: SizeCounter,
    actual: SizeCounter,
}

impl FetchedSize {
    /// Bytes received over the wire.
    pub fn encoded_size(&self) -> u64 {
        self.encoded.total()
    }

    /// Bytes after the content coding was reversed.
    pub fn actual_size(&self) -> u64 {
        self.actual.total()
    }

    #[cfg(test)]
    pub(crate) fn with_sizes(url: &str, encoded: u64, actual: u64) -> Self {
        let mut enc = SizeCounter::new();
        enc.record(&vec![0u8; encoded as usize]);
        let mut act = SizeCounter::new();
        act.record(&vec![0u8; actual as usize]);
        Self {
            url: url.to_string(),
            status: 200,
            coding: ContentCoding::Identity,
            encoded: enc,
            actual: act,
        }
    }
}

/// Fetches one resource and measures it on the way through.
///
/// The body is streamed: every chunk goes to the encoded counter and, via
/// the decoder picked from the response's `Content-Encoding`, to the actual
/// counter. Nothing is buffered beyond one chunk.
pub struct ResourceFetcher {
    url: String,
    encoding_hint: Option<String>,
    options: FetchOptions,
}

impl ResourceFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            encoding_hint: None,
            options: FetchOptions::default(),
        }
    }

    /// Request this coding instead of the configured Accept-Encoding.
    ///
    /// Only affects the request header. The decode path always follows the
    /// response.
    pub fn with_encoding_hint(mut self, hint: Option<String>) -> Self {
        self.encoding_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    fn accept_encoding(&self) -> &str {
        self.encoding_hint
            .as_deref()
            .unwrap_or(&self.options.accept_encoding)
    }

    /// Issue the GET and measure the body (blocking).
    pub fn run(&self) -> Result<FetchedSize, FetchError> {
        let parsed = Url::parse(&self.url).map_err(|source| FetchError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
            });
        }

        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(concat!("page-weight/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0);
        if let Some(timeout) = self.options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(FetchError::Client)?;

        let accept = self.accept_encoding();
        log::debug!("GET {} (Accept-Encoding: {})", self.url, accept);

        let mut response = client
            .get(parsed.as_str())
            .header(ACCEPT_ENCODING, accept)
            .send()
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("{} answered {}; measuring its body anyway", self.url, status);
        }

        let declared = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let coding = ContentCoding::from_header(declared.as_deref());
        if let Some(declared) = declared.as_deref() {
            let declared = declared.trim();
            if coding == ContentCoding::Identity
                && !declared.is_empty()
                && !declared.eq_ignore_ascii_case("identity")
            {
                log::warn!(
                    "{}: cannot decode Content-Encoding `{}`, actual size will equal encoded size",
                    self.url,
                    declared
                );
            }
        }

        let mut encoded = SizeCounter::new();
        let mut sink = DecodeSink::new(coding);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FetchError::Body(e)),
            };
            encoded.record(&buf[..n]);
            sink.write_chunk(&buf[..n])
                .map_err(|source| FetchError::Decode { coding, source })?;
        }

        // An empty body has nothing to decode, whatever the header says.
        let actual = if encoded.total() == 0 {
            SizeCounter::new()
        } else {
            sink.finish()
                .map_err(|source| FetchError::Decode { coding, source })?
        };

        log::debug!(
            "{}: {} {} encoded={} actual={}",
            self.url,
            status.as_u16(),
            coding,
            encoded.total(),
            actual.total()
        );

        Ok(FetchedSize {
            url: self.url.clone(),
            status: status.as_u16(),
            coding,
            encoded,
            actual,
        })
    }
}

/// The "actual" side of the measurement: a counter behind an optional decoder.
enum DecodeSink {
    Identity(SizeCounter),
    /// Decodes every member of a multi-member body.
    Gzip(MultiGzDecoder<SizeCounter>),
    Deflate(Inflater),
}

impl DecodeSink {
    fn new(coding: ContentCoding) -> Self {
        match coding {
            ContentCoding::Identity => DecodeSink::Identity(SizeCounter::new()),
            ContentCoding::Gzip => DecodeSink::Gzip(MultiGzDecoder::new(SizeCounter::new())),
            ContentCoding::Deflate => DecodeSink::Deflate(Inflater::new()),
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            DecodeSink::Identity(counter) => {
                counter.record(chunk);
                Ok(())
            }
            DecodeSink::Gzip(decoder) => decoder.write_all(chunk).map_err(|e| {
                // Output already produced means a member completed and what
                // follows is not another member.
                if e.kind() == io::ErrorKind::InvalidInput && decoder.get_ref().total() > 0 {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("trailing data after end of gzip member: {}", e),
                    )
                } else {
                    e
                }
            }),
            DecodeSink::Deflate(inflater) => inflater.write_chunk(chunk),
        }
    }

    /// Flush the decoder and return the final count. Fails on a truncated
    /// or corrupt stream.
    fn finish(self) -> io::Result<SizeCounter> {
        match self {
            DecodeSink::Identity(counter) => Ok(counter),
            DecodeSink::Gzip(decoder) => decoder.finish(),
            DecodeSink::Deflate(inflater) => inflater.finish(),
        }
    }
}

/// Streaming zlib inflater that tracks whether the stream actually ended,
/// so a body cut short is an error rather than a smaller count.
struct Inflater {
    inner: Decompress,
    out: Vec<u8>,
    counter: SizeCounter,
    done: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            inner: Decompress::new(true),
            out: vec![0u8; CHUNK_SIZE],
            counter: SizeCounter::new(),
            done: false,
        }
    }

    fn step(&mut self, input: &[u8], flush: FlushDecompress) -> io::Result<(usize, usize)> {
        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();
        let status = self
            .inner
            .decompress(input, &mut self.out, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;
        self.counter.record(&self.out[..produced]);
        if status == Status::StreamEnd {
            self.done = true;
        }
        Ok((consumed, produced))
    }

    fn write_chunk(&mut self, mut input: &[u8]) -> io::Result<()> {
        while !input.is_empty() {
            if self.done {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "trailing data after end of deflate stream",
                ));
            }
            let (consumed, produced) = self.step(input, FlushDecompress::None)?;
            if consumed == 0 && produced == 0 && !self.done {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate stream made no progress",
                ));
            }
            input = &input[consumed..];
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<SizeCounter> {
        while !self.done {
            let (_, produced) = self.step(&[], FlushDecompress::Finish)?;
            if produced == 0 && !self.done {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream ended early",
                ));
            }
        }
        Ok(self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::test_server::{Route, TestServer};
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_coding_from_header() {
        assert_eq!(ContentCoding::from_header(None), ContentCoding::Identity);
        assert_eq!(ContentCoding::from_header(Some("gzip")), ContentCoding::Gzip);
        assert_eq!(ContentCoding::from_header(Some(" GZIP ")), ContentCoding::Gzip);
        assert_eq!(ContentCoding::from_header(Some("x-gzip")), ContentCoding::Gzip);
        assert_eq!(ContentCoding::from_header(Some("deflate")), ContentCoding::Deflate);
        assert_eq!(ContentCoding::from_header(Some("br")), ContentCoding::Identity);
        assert_eq!(ContentCoding::from_header(Some("")), ContentCoding::Identity);
    }

    #[test]
    fn test_identity_sizes_match() {
        let server = TestServer::start(vec![("/test", Route::ok("testing\n"))]);
        let result = ResourceFetcher::new(server.url("/test")).run().unwrap();
        assert_eq!(result.coding, ContentCoding::Identity);
        assert_eq!(result.encoded_size(), 8);
        assert_eq!(result.actual_size(), 8);
    }

    #[test]
    fn test_gzip_sizes() {
        let body = gzip(b"testing\n");
        let wire = body.len() as u64;
        let server = TestServer::start(vec![(
            "/test.gz",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let result = ResourceFetcher::new(server.url("/test.gz")).run().unwrap();
        assert_eq!(result.coding, ContentCoding::Gzip);
        assert_eq!(result.encoded_size(), wire);
        assert_eq!(result.actual_size(), 8);
    }

    #[test]
    fn test_gzip_compressible_payload_is_smaller_on_wire() {
        let payload = "function noop() { return null; }\n".repeat(2000);
        let body = gzip(payload.as_bytes());
        let server = TestServer::start(vec![(
            "/app.js",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let result = ResourceFetcher::new(server.url("/app.js")).run().unwrap();
        assert_eq!(result.actual_size(), payload.len() as u64);
        assert!(result.encoded_size() < result.actual_size());
    }

    #[test]
    fn test_deflate_sizes() {
        let payload = b"body { color: red; }\n".repeat(100);
        let body = zlib(&payload);
        let wire = body.len() as u64;
        let server = TestServer::start(vec![(
            "/site.css",
            Route::ok(body).header("Content-Encoding", "deflate"),
        )]);
        let result = ResourceFetcher::new(server.url("/site.css")).run().unwrap();
        assert_eq!(result.coding, ContentCoding::Deflate);
        assert_eq!(result.encoded_size(), wire);
        assert_eq!(result.actual_size(), payload.len() as u64);
    }

    #[test]
    fn test_unknown_coding_is_identity() {
        let server = TestServer::start(vec![(
            "/a.js",
            Route::ok(vec![7u8; 300]).header("Content-Encoding", "br"),
        )]);
        let result = ResourceFetcher::new(server.url("/a.js")).run().unwrap();
        assert_eq!(result.encoded_size(), 300);
        assert_eq!(result.actual_size(), 300);
    }

    #[test]
    fn test_sends_accept_encoding() {
        let server = TestServer::start(vec![("/bar", Route::ok("x"))]);
        ResourceFetcher::new(server.url("/bar?fizz=buzz")).run().unwrap();
        let seen = server.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/bar?fizz=buzz");
        assert_eq!(
            seen[0].headers.get("accept-encoding").map(String::as_str),
            Some("gzip,deflate")
        );
    }

    #[test]
    fn test_encoding_hint_overrides_header() {
        let server = TestServer::start(vec![("/bar", Route::ok("x"))]);
        ResourceFetcher::new(server.url("/bar"))
            .with_encoding_hint(Some("gzip".to_string()))
            .run()
            .unwrap();
        let seen = server.requests();
        assert_eq!(
            seen[0].headers.get("accept-encoding").map(String::as_str),
            Some("gzip")
        );
    }

    #[test]
    fn test_hint_does_not_pick_decoder() {
        // Hint says gzip, response is plain: must be measured as identity.
        let server = TestServer::start(vec![("/plain.js", Route::ok("plain"))]);
        let result = ResourceFetcher::new(server.url("/plain.js"))
            .with_encoding_hint(Some("gzip".to_string()))
            .run()
            .unwrap();
        assert_eq!(result.coding, ContentCoding::Identity);
        assert_eq!(result.actual_size(), 5);
    }

    #[test]
    fn test_same_resource_twice_is_stable() {
        let body = gzip(&b"abcdefgh".repeat(64));
        let server = TestServer::start(vec![(
            "/x.js",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let first = ResourceFetcher::new(server.url("/x.js")).run().unwrap();
        let second = ResourceFetcher::new(server.url("/x.js")).run().unwrap();
        assert_eq!(first.encoded_size(), second.encoded_size());
        assert_eq!(first.actual_size(), second.actual_size());
    }

    #[test]
    fn test_non_success_status_still_measured() {
        let server = TestServer::start(vec![("/gone.js", Route::ok("missing").status(404))]);
        let result = ResourceFetcher::new(server.url("/gone.js")).run().unwrap();
        assert_eq!(result.status, 404);
        assert_eq!(result.encoded_size(), 7);
    }

    #[test]
    fn test_empty_gzip_body() {
        let server = TestServer::start(vec![(
            "/empty.js",
            Route::ok(Vec::<u8>::new()).header("Content-Encoding", "gzip"),
        )]);
        let result = ResourceFetcher::new(server.url("/empty.js")).run().unwrap();
        assert_eq!(result.encoded_size(), 0);
        assert_eq!(result.actual_size(), 0);
    }

    #[test]
    fn test_truncated_body_fails() {
        let server = TestServer::start(vec![("/cut.js", Route::ok(vec![1u8; 500]).truncated(100))]);
        let err = ResourceFetcher::new(server.url("/cut.js")).run().unwrap_err();
        assert!(matches!(err, FetchError::Body(_)), "got {err:?}");
    }

    #[test]
    fn test_multi_member_gzip() {
        let mut body = gzip(b"aaaa");
        body.extend(gzip(b"bbbbbb"));
        let wire = body.len() as u64;
        let server = TestServer::start(vec![(
            "/joined.js",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let result = ResourceFetcher::new(server.url("/joined.js")).run().unwrap();
        assert_eq!(result.encoded_size(), wire);
        assert_eq!(result.actual_size(), 10);
    }

    #[test]
    fn test_gzip_trailing_garbage_fails() {
        let mut body = gzip(b"aaaa");
        body.extend_from_slice(b"this is not a gzip member");
        let server = TestServer::start(vec![(
            "/tail.js",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let err = ResourceFetcher::new(server.url("/tail.js")).run().unwrap_err();
        assert!(matches!(err, FetchError::Decode { coding: ContentCoding::Gzip, .. }), "got {err:?}");
        assert!(err.to_string().contains("trailing data after end of gzip member"), "got {err}");
    }

    #[test]
    fn test_malformed_gzip_fails() {
        let server = TestServer::start(vec![(
            "/bad.js",
            Route::ok(b"definitely not gzip data".to_vec()).header("Content-Encoding", "gzip"),
        )]);
        let err = ResourceFetcher::new(server.url("/bad.js")).run().unwrap_err();
        assert!(matches!(err, FetchError::Decode { coding: ContentCoding::Gzip, .. }), "got {err:?}");
    }

    #[test]
    fn test_incomplete_gzip_stream_fails() {
        // Wire transfer is complete but the gzip member is cut short.
        let mut body = gzip(&b"0123456789".repeat(50));
        body.truncate(body.len() - 6);
        let server = TestServer::start(vec![(
            "/short.js",
            Route::ok(body).header("Content-Encoding", "gzip"),
        )]);
        let err = ResourceFetcher::new(server.url("/short.js")).run().unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_incomplete_deflate_stream_fails() {
        let mut body = zlib(&b"0123456789".repeat(50));
        body.truncate(body.len() / 2);
        let server = TestServer::start(vec![(
            "/short.css",
            Route::ok(body).header("Content-Encoding", "deflate"),
        )]);
        let err = ResourceFetcher::new(server.url("/short.css")).run().unwrap_err();
        assert!(matches!(err, FetchError::Decode { coding: ContentCoding::Deflate, .. }), "got {err:?}");
    }

    #[test]
    fn test_connection_refused() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = ResourceFetcher::new(format!("http://{}/x.js", addr)).run().unwrap_err();
        assert!(matches!(err, FetchError::Request(_)), "got {err:?}");
    }

    #[test]
    fn test_rejects_relative_and_non_http_urls() {
        let err = ResourceFetcher::new("/relative/app.js").run().unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));

        let err = ResourceFetcher::new("data:text/css,body{}").run().unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme } if scheme == "data"));
    }

    #[test]
    fn test_inflater_counts_across_chunks() {
        let payload = b"chunked".repeat(1000);
        let body = zlib(&payload);
        let mut inflater = Inflater::new();
        for chunk in body.chunks(7) {
            inflater.write_chunk(chunk).unwrap();
        }
        assert_eq!(inflater.finish().unwrap().total(), payload.len() as u64);
    }
}
