use std::io::{self, Read, Write};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cancel::CancellationToken;
use crate::error::{FetchError, FetchErrorKind, ProfileError};

const CHUNK_SIZE: usize = 8192;
const MAX_ERROR_BODY: usize = 512;

/// Moves the bytes behind one locator into `sink`. Implementations must give
/// up with `FetchErrorKind::Cancelled` once `cancel` fires.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        locator: &str,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ProfileError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("narr-profiles/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ProfileError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ProfileError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let mut message = response
            .text()
            .unwrap_or_else(|_| "remote request failed".to_string());
        if message.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|idx| message.is_char_boundary(*idx))
                .unwrap_or(0);
            message.truncate(cut);
        }
        Err(FetchError::new(FetchErrorKind::Status(status), message))
    }
}

impl Transport for HttpTransport {
    fn fetch(
        &self,
        locator: &str,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }
        let response = self
            .client
            .get(locator)
            .send()
            .map_err(|err| classify_request_error(&err))?;
        let mut response = Self::handle_status(response)?;
        copy_cancellable(&mut response, sink, cancel)
    }
}

/// Streams `reader` into `sink` in fixed chunks, checking `cancel` between them.
pub fn copy_cancellable(
    reader: &mut dyn Read,
    sink: &mut dyn Write,
    cancel: &CancellationToken,
) -> Result<u64, FetchError> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(classify_read_error(err)),
        };
        sink.write_all(&buffer[..read]).map_err(FetchError::io)?;
        written += read as u64;
    }
    sink.flush().map_err(FetchError::io)?;
    Ok(written)
}

fn classify_request_error(err: &reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Network
    };
    FetchError::new(kind, err.to_string())
}

fn classify_read_error(err: io::Error) -> FetchError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FetchErrorKind::Timeout,
        _ => FetchErrorKind::Network,
    };
    FetchError::new(kind, err.to_string())
}
