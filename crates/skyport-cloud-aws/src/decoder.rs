//! ResponseDecoder
//!
//! Turns a raw response body into a typed result. Two envelope dialects:
//!
//! - EC2: result fields are children of the document root, the whole body
//!   is deserialized.
//! - Query: result fields live in `<{Operation}Result>`. The token stream is
//!   scanned up to that element, only its subtree is deserialized and the
//!   rest of the body is never read.
//!
//! In debug mode the body is buffered and logged first; otherwise it is
//! decoded straight off the stream. All functions here block on the body
//! reader and must run off the async executor.

use crate::error::{AwsError, DecodeError};
use crate::service::{Dialect, Operation};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use tokio_util::sync::CancellationToken;

/// Upper bound on error bodies read into memory
const MAX_ERROR_BODY: u64 = 64 * 1024;

/// A response as handed over by the transport.
///
/// The body is consumed by exactly one decode call and closed when dropped.
pub struct RawResponse {
    pub status: u16,
    pub request_id: String,
    pub body: Box<dyn Read + Send>,
}

impl RawResponse {
    pub fn new(status: u16, request_id: impl Into<String>, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            request_id: request_id.into(),
            body: Box::new(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Stop reading the body once `cancel` fires. The body is dropped on the
    /// first read after cancellation.
    pub fn abort_on(self, cancel: CancellationToken) -> Self {
        Self {
            body: Box::new(AbortOnCancel {
                inner: Some(self.body),
                cancel,
            }),
            ..self
        }
    }
}

struct AbortOnCancel {
    inner: Option<Box<dyn Read + Send>>,
    cancel: CancellationToken,
}

impl Read for AbortOnCancel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            self.inner = None;
        }
        match self.inner.as_mut() {
            Some(body) => body.read(buf),
            None => Err(io::Error::other("response body cancelled")),
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Decode a successful response body into `T`
pub fn decode<T: DeserializeOwned>(
    raw: RawResponse,
    op: &Operation,
    dialect: Dialect,
    debug: bool,
) -> Result<T, DecodeError> {
    let RawResponse {
        status,
        request_id,
        mut body,
    } = raw;
    let ctx = Context {
        status,
        request_id: &request_id,
    };

    if debug {
        let mut buffered = Vec::new();
        body.read_to_end(&mut buffered).map_err(|e| ctx.read(e))?;
        drop(body);
        tracing::debug!(
            "{} response ({}, {}): {}",
            op.name,
            status,
            request_id,
            String::from_utf8_lossy(&buffered)
        );
        return decode_from(buffered.as_slice(), op, dialect, &ctx);
    }

    decode_from(BufReader::new(body), op, dialect, &ctx)
}

/// Decode a response of any status: 2xx into `T`, anything else into the
/// vendor's error envelope
pub fn decode_response<T: DeserializeOwned>(
    raw: RawResponse,
    op: &Operation,
    dialect: Dialect,
    debug: bool,
) -> Result<T, AwsError> {
    if raw.is_success() {
        return decode(raw, op, dialect, debug).map_err(AwsError::from);
    }
    Err(read_error(raw, dialect))
}

struct Context<'a> {
    status: u16,
    request_id: &'a str,
}

impl Context<'_> {
    fn read(&self, e: impl fmt::Display) -> DecodeError {
        DecodeError::Read {
            status: self.status,
            request_id: self.request_id.to_string(),
            message: e.to_string(),
        }
    }

    fn malformed(&self, e: impl fmt::Display) -> DecodeError {
        DecodeError::Malformed {
            status: self.status,
            request_id: self.request_id.to_string(),
            message: e.to_string(),
        }
    }

    fn xml(&self, e: quick_xml::Error) -> DecodeError {
        match e {
            quick_xml::Error::Io(io) => self.read(io),
            other => self.malformed(other),
        }
    }

    fn de(&self, e: quick_xml::DeError) -> DecodeError {
        match e {
            quick_xml::DeError::InvalidXml(inner) => self.xml(inner),
            other => self.malformed(other),
        }
    }
}

fn decode_from<R: BufRead, T: DeserializeOwned>(
    reader: R,
    op: &Operation,
    dialect: Dialect,
    ctx: &Context<'_>,
) -> Result<T, DecodeError> {
    match dialect {
        Dialect::Ec2 => quick_xml::de::from_reader(reader).map_err(|e| ctx.de(e)),
        Dialect::Query => {
            let element = op.result_element();
            let subtree = extract_element(reader, &element, ctx)?.ok_or_else(|| {
                DecodeError::ResultElementMissing {
                    status: ctx.status,
                    request_id: ctx.request_id.to_string(),
                    element: element.clone(),
                }
            })?;
            quick_xml::de::from_str(&subtree).map_err(|e| ctx.de(e))
        }
    }
}

/// Scan to the first element with local name `name` and return its subtree
/// re-serialized as a standalone document. Nothing after the element's end
/// tag is read.
fn extract_element<R: BufRead>(
    reader: R,
    name: &str,
    ctx: &Context<'_>,
) -> Result<Option<String>, DecodeError> {
    let mut reader = Reader::from_reader(reader);
    let mut buf = Vec::new();

    let start = loop {
        match reader.read_event_into(&mut buf).map_err(|e| ctx.xml(e))? {
            Event::Start(e) if e.local_name().as_ref() == name.as_bytes() => {
                break Event::Start(e.into_owned());
            }
            Event::Empty(e) if e.local_name().as_ref() == name.as_bytes() => {
                return Ok(Some(format!("<{}/>", name)));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    };

    let mut writer = Writer::new(Vec::new());
    writer.write_event(start).map_err(|e| ctx.malformed(e))?;
    let mut depth = 1usize;
    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(|e| ctx.xml(e))?;
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(ctx.malformed(format!("unexpected end of document inside <{}>", name)));
            }
            _ => {}
        }
        writer.write_event(event).map_err(|e| ctx.malformed(e))?;
        if depth == 0 {
            break;
        }
    }

    String::from_utf8(writer.into_inner())
        .map(Some)
        .map_err(|e| ctx.malformed(e))
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// `<Response><Errors><Error>…</Error></Errors><RequestID>…</RequestID></Response>`
#[derive(Deserialize, Debug)]
struct Ec2ErrorEnvelope {
    #[serde(rename = "Errors")]
    errors: Ec2Errors,
    #[serde(rename = "RequestID", default)]
    request_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Ec2Errors {
    #[serde(rename = "Error", default)]
    errors: Vec<ErrorDetail>,
}

/// `<ErrorResponse><Error>…</Error><RequestId>…</RequestId></ErrorResponse>`
#[derive(Deserialize, Debug)]
struct QueryErrorEnvelope {
    #[serde(rename = "Error")]
    error: ErrorDetail,
    #[serde(rename = "RequestId", default)]
    request_id: Option<String>,
}

fn parse_error_envelope(body: &str, dialect: Dialect) -> Option<(ErrorDetail, Option<String>)> {
    let ec2 = || {
        quick_xml::de::from_str::<Ec2ErrorEnvelope>(body)
            .ok()
            .and_then(|env| {
                let request_id = env.request_id;
                env.errors.errors.into_iter().next().map(|e| (e, request_id))
            })
    };
    let query = || {
        quick_xml::de::from_str::<QueryErrorEnvelope>(body)
            .ok()
            .map(|env| (env.error, env.request_id))
    };
    match dialect {
        Dialect::Ec2 => ec2().or_else(query),
        Dialect::Query => query().or_else(ec2),
    }
}

/// Read a non-2xx response into [`AwsError::Service`]
pub fn read_error(raw: RawResponse, dialect: Dialect) -> AwsError {
    let RawResponse {
        status,
        request_id,
        body,
    } = raw;

    let mut text = String::new();
    if let Err(e) = body.take(MAX_ERROR_BODY).read_to_string(&mut text) {
        return AwsError::Decode(DecodeError::Read {
            status,
            request_id,
            message: e.to_string(),
        });
    }

    match parse_error_envelope(&text, dialect) {
        Some((detail, body_request_id)) if !detail.code.is_empty() => AwsError::Service {
            status,
            code: detail.code,
            message: detail.message,
            request_id: body_request_id.filter(|id| !id.is_empty()).unwrap_or(request_id),
        },
        _ => {
            tracing::debug!("Unparseable error body (status {}): {}", status, text);
            AwsError::Service {
                status,
                code: String::new(),
                message: text.trim().to_string(),
                request_id,
            }
        }
    }
}
