//! DHT message module
//!
//! Encodes and decodes the CRN-25 text wire format. Every datagram is
//! `txn body`, where variable-length fields are CRN strings: the number of
//! spaces inside the content, a space, the content, and a closing space.

use crate::dht::node::NodeId;
use crate::error::CrnError;
use anyhow::Result;
use rand::Rng;

/// Largest datagram a node expects to receive.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Relay failure text sent upstream when the final hop never answers.
pub const RELAY_TIMEOUT_TEXT: &str = "Relay timeout";

/// Relay failure text sent upstream when the final hop does not know the target.
pub const RELAY_UNKNOWN_TEXT: &str = "Relay target unknown";

/// Short opaque token correlating a request with its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(String);

impl TxnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Two printable, non-space ASCII characters
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..2).map(|_| rng.gen_range(33u8..=126) as char).collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a field as a CRN string
pub fn encode_crn_string(content: &str) -> String {
    format!("{} {} ", content.matches(' ').count(), content)
}

/// Decode one CRN string from the front of `input`, returning it and the remainder
pub fn decode_crn_string(input: &str) -> Result<(String, &str)> {
    let mut reader = Reader::new(input);
    let content = reader.crn_string()?;
    Ok((content.to_string(), reader.rest))
}

/// Answer to an `E` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Stored here
    Yes,
    /// Not stored, and this node is among the closest
    No,
    /// Not stored, and this node is not among the closest
    Unknown,
}

/// Answer to an `R` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(String),
    NotFound,
    Unknown,
}

/// Answer to a `W` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored because this node is among the closest
    Added,
    /// Replaced an existing local copy
    Replaced,
    Rejected,
}

/// Answer to a `C` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Values matched and the swap was applied
    Swapped,
    /// Values differed but the new value was accepted as a closest node
    Accepted,
    Rejected,
}

/// Requests a node answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Greet,
    FindNearest { target: NodeId },
    Exists { key: String },
    Read { key: String },
    Write { key: String, value: String },
    CompareAndSwap { key: String, expected: String, new: String },
}

/// Responses, including the informational `I` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Hello { name: String },
    Nearest { nodes: Vec<(String, String)> },
    Exists(Presence),
    Read(ReadOutcome),
    Write(WriteOutcome),
    CompareAndSwap(CasOutcome),
    Info { text: String },
}

/// Response kinds, used to match replies to pending requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Hello,
    Nearest,
    Exists,
    Read,
    Write,
    CompareAndSwap,
    Info,
}

impl Request {
    /// The response kind this request is answered with
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Request::Greet => ResponseKind::Hello,
            Request::FindNearest { .. } => ResponseKind::Nearest,
            Request::Exists { .. } => ResponseKind::Exists,
            Request::Read { .. } => ResponseKind::Read,
            Request::Write { .. } => ResponseKind::Write,
            Request::CompareAndSwap { .. } => ResponseKind::CompareAndSwap,
        }
    }

    pub fn command(&self) -> char {
        match self {
            Request::Greet => 'G',
            Request::FindNearest { .. } => 'N',
            Request::Exists { .. } => 'E',
            Request::Read { .. } => 'R',
            Request::Write { .. } => 'W',
            Request::CompareAndSwap { .. } => 'C',
        }
    }

    /// Encode without the transaction ID
    pub fn encode(&self) -> String {
        match self {
            Request::Greet => "G".to_string(),
            Request::FindNearest { target } => format!("N {}", target.to_hex()),
            Request::Exists { key } => format!("E {}", encode_crn_string(key)),
            Request::Read { key } => format!("R {}", encode_crn_string(key)),
            Request::Write { key, value } => {
                format!("W {}{}", encode_crn_string(key), encode_crn_string(value))
            }
            Request::CompareAndSwap { key, expected, new } => format!(
                "C {}{}{}",
                encode_crn_string(key),
                encode_crn_string(expected),
                encode_crn_string(new)
            ),
        }
    }
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Hello { .. } => ResponseKind::Hello,
            Response::Nearest { .. } => ResponseKind::Nearest,
            Response::Exists(_) => ResponseKind::Exists,
            Response::Read(_) => ResponseKind::Read,
            Response::Write(_) => ResponseKind::Write,
            Response::CompareAndSwap(_) => ResponseKind::CompareAndSwap,
            Response::Info { .. } => ResponseKind::Info,
        }
    }

    /// Encode without the transaction ID
    pub fn encode(&self) -> String {
        match self {
            Response::Hello { name } => format!("H {}", encode_crn_string(name)),
            Response::Nearest { nodes } => {
                let mut out = String::from("O ");
                for (name, addr) in nodes {
                    out.push_str(&encode_crn_string(name));
                    out.push_str(&encode_crn_string(addr));
                }
                out
            }
            Response::Exists(presence) => match presence {
                Presence::Yes => "F Y".to_string(),
                Presence::No => "F N".to_string(),
                Presence::Unknown => "F ?".to_string(),
            },
            Response::Read(outcome) => match outcome {
                ReadOutcome::Found(value) => format!("S Y {}", encode_crn_string(value)),
                ReadOutcome::NotFound => "S N".to_string(),
                ReadOutcome::Unknown => "S ?".to_string(),
            },
            Response::Write(outcome) => match outcome {
                WriteOutcome::Added => "X A".to_string(),
                WriteOutcome::Replaced => "X R".to_string(),
                WriteOutcome::Rejected => "X X".to_string(),
            },
            Response::CompareAndSwap(outcome) => match outcome {
                CasOutcome::Swapped => "D R".to_string(),
                CasOutcome::Accepted => "D A".to_string(),
                CasOutcome::Rejected => "D N".to_string(),
            },
            Response::Info { text } => format!("I {}", encode_crn_string(text)),
        }
    }
}

/// A message tunnelled through one or more relays.
///
/// `hops` lists the remaining destinations; the last entry is the final
/// target. `inner` is the wrapped command and arguments without a
/// transaction ID, carried under `inner_txn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub hops: Vec<String>,
    pub inner_txn: TxnId,
    pub inner: String,
}

impl Envelope {
    /// The wrapped message with its own transaction ID
    pub fn inner_payload(&self) -> String {
        format!("{} {}", self.inner_txn, self.inner)
    }

    /// Decode the wrapped message
    pub fn inner_message(&self) -> Result<Message> {
        Message::decode(&self.inner_payload())
    }

    /// Whether the wrapped command expects a reply
    pub fn expects_reply(&self) -> bool {
        matches!(
            self.inner.split(' ').next(),
            Some("G" | "N" | "E" | "R" | "W" | "C")
        )
    }

    /// Whether the wrapped payload is itself a relay
    pub fn wraps_relay(&self) -> bool {
        match self.inner.split(' ').next() {
            Some("V") => true,
            Some(token) => token.parse::<u32>().is_ok(),
            None => false,
        }
    }

    /// The envelope to hand to the next hop
    pub fn strip_hop(&self) -> Option<(String, Envelope)> {
        let (next, rest) = self.hops.split_first()?;
        Some((
            next.clone(),
            Envelope {
                hops: rest.to_vec(),
                inner_txn: self.inner_txn.clone(),
                inner: self.inner.clone(),
            },
        ))
    }
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Request(Request),
    Response(Response),
    Relay(Envelope),
}

/// A complete CRN-25 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub txn: TxnId,
    pub body: Body,
}

impl Message {
    pub fn request(txn: TxnId, request: Request) -> Self {
        Self { txn, body: Body::Request(request) }
    }

    pub fn response(txn: TxnId, response: Response) -> Self {
        Self { txn, body: Body::Response(response) }
    }

    pub fn relay(txn: TxnId, envelope: Envelope) -> Self {
        Self { txn, body: Body::Relay(envelope) }
    }

    /// Serialize to the text wire format
    pub fn encode(&self) -> String {
        match &self.body {
            Body::Request(request) => format!("{} {}", self.txn, request.encode()),
            Body::Response(response) => format!("{} {}", self.txn, response.encode()),
            Body::Relay(envelope) => encode_envelope(&self.txn, envelope),
        }
    }

    /// Parse a datagram
    pub fn decode_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|e| {
            CrnError::protocol_error_with_source("Message is not UTF-8", e.to_string())
        })?;
        Self::decode(text)
    }

    /// Parse a message from its text form
    pub fn decode(text: &str) -> Result<Self> {
        let mut reader = Reader::new(text);
        let txn = reader.token()?;
        if txn.is_empty() {
            return Err(CrnError::protocol_error("Empty transaction ID").into());
        }
        let txn = TxnId::new(txn);
        let head = reader.token()?;

        if let Ok(count) = head.parse::<i64>() {
            if count < 0 {
                return Err(CrnError::protocol_error_with_source(
                    "Negative relay count",
                    head.to_string(),
                )
                .into());
            }
            let mut hops = Vec::with_capacity(count.min(16) as usize);
            for _ in 0..count {
                hops.push(reader.crn_string()?.to_string());
            }
            let inner = reader.rest;
            if hops.is_empty() {
                return Self::decode(&format!("{} {}", txn, inner));
            }
            check_inner_command(inner)?;
            return Ok(Self::relay(
                txn.clone(),
                Envelope { hops, inner_txn: txn, inner: inner.to_string() },
            ));
        }

        let body = match head {
            "G" => Body::Request(Request::Greet),
            "N" => {
                let hex = reader.token()?;
                let target = NodeId::from_hex(hex).ok_or_else(|| {
                    CrnError::protocol_error_with_source("Invalid digest in N request", hex.to_string())
                })?;
                Body::Request(Request::FindNearest { target })
            }
            "E" => Body::Request(Request::Exists { key: reader.crn_string()?.to_string() }),
            "R" => Body::Request(Request::Read { key: reader.crn_string()?.to_string() }),
            "W" => {
                let key = reader.crn_string()?.to_string();
                let value = reader.crn_string()?.to_string();
                Body::Request(Request::Write { key, value })
            }
            "C" => {
                let key = reader.crn_string()?.to_string();
                let expected = reader.crn_string()?.to_string();
                let new = reader.crn_string()?.to_string();
                Body::Request(Request::CompareAndSwap { key, expected, new })
            }
            "H" => Body::Response(Response::Hello { name: reader.crn_string()?.to_string() }),
            "O" => {
                let mut nodes = Vec::new();
                while !reader.rest.is_empty() {
                    let name = reader.crn_string()?.to_string();
                    let addr = reader.crn_string()?.to_string();
                    nodes.push((name, addr));
                }
                Body::Response(Response::Nearest { nodes })
            }
            "F" => {
                let presence = match reader.token()? {
                    "Y" => Presence::Yes,
                    "N" => Presence::No,
                    "?" => Presence::Unknown,
                    other => return Err(bad_flag('F', other)),
                };
                Body::Response(Response::Exists(presence))
            }
            "S" => {
                let outcome = match reader.token()? {
                    "Y" => ReadOutcome::Found(reader.crn_string()?.to_string()),
                    "N" => ReadOutcome::NotFound,
                    "?" => ReadOutcome::Unknown,
                    other => return Err(bad_flag('S', other)),
                };
                Body::Response(Response::Read(outcome))
            }
            "X" => {
                let outcome = match reader.token()? {
                    "A" => WriteOutcome::Added,
                    "R" => WriteOutcome::Replaced,
                    "X" => WriteOutcome::Rejected,
                    other => return Err(bad_flag('X', other)),
                };
                Body::Response(Response::Write(outcome))
            }
            "D" => {
                let outcome = match reader.token()? {
                    "R" => CasOutcome::Swapped,
                    "A" => CasOutcome::Accepted,
                    "N" => CasOutcome::Rejected,
                    other => return Err(bad_flag('D', other)),
                };
                Body::Response(Response::CompareAndSwap(outcome))
            }
            "I" => Body::Response(Response::Info { text: reader.info_text()? }),
            "V" => {
                let target = reader.crn_string()?.to_string();
                let inner_txn = reader.token()?;
                if inner_txn.is_empty() {
                    return Err(CrnError::protocol_error("Empty inner transaction ID").into());
                }
                let inner = reader.rest;
                check_inner_command(inner)?;
                Body::Relay(Envelope {
                    hops: vec![target],
                    inner_txn: TxnId::new(inner_txn),
                    inner: inner.to_string(),
                })
            }
            other => {
                return Err(CrnError::protocol_error_with_source("Unknown command", other.to_string()).into())
            }
        };

        Ok(Self { txn, body })
    }
}

fn encode_envelope(txn: &TxnId, envelope: &Envelope) -> String {
    let Some((first, rest)) = envelope.hops.split_first() else {
        return envelope.inner_payload();
    };
    if envelope.inner_txn == *txn {
        let hops: String = envelope.hops.iter().map(|h| encode_crn_string(h)).collect();
        return format!("{} {} {}{}", txn, envelope.hops.len(), hops, envelope.inner);
    }

    // Retagged relays travel in the standard single-hop V form
    let inner = if rest.is_empty() {
        envelope.inner_payload()
    } else {
        let hops: String = rest.iter().map(|h| encode_crn_string(h)).collect();
        format!("{} {} {}{}", envelope.inner_txn, rest.len(), hops, envelope.inner)
    };
    format!("{} V {}{}", txn, encode_crn_string(first), inner)
}

fn check_inner_command(inner: &str) -> Result<()> {
    match inner.split(' ').next() {
        Some(token) if !token.is_empty() => Ok(()),
        _ => Err(CrnError::protocol_error("Relay envelope has no inner message").into()),
    }
}

fn bad_flag(command: char, flag: &str) -> anyhow::Error {
    CrnError::protocol_error_with_source(format!("Invalid {} flag", command), flag.to_string()).into()
}

/// Cursor over a message being decoded
struct Reader<'a> {
    rest: &'a str,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    /// Next space-delimited token
    fn token(&mut self) -> Result<&'a str> {
        if self.rest.is_empty() {
            return Err(CrnError::protocol_error("Message truncated").into());
        }
        match self.rest.find(' ') {
            Some(i) => {
                let token = &self.rest[..i];
                self.rest = &self.rest[i + 1..];
                Ok(token)
            }
            None => {
                let token = self.rest;
                self.rest = "";
                Ok(token)
            }
        }
    }

    /// Free-form text of an `I` message. Some nodes send a zero space count
    /// followed by the whole text, which is kept intact.
    fn info_text(&mut self) -> Result<String> {
        let text = self.crn_string()?;
        if self.rest.is_empty() {
            return Ok(text.to_string());
        }
        let full = format!("{} {}", text, self.rest.trim_end());
        self.rest = "";
        Ok(full)
    }

    /// Next CRN string. A missing closing space at the end of input is tolerated.
    fn crn_string(&mut self) -> Result<&'a str> {
        let count_token = self.token()?;
        let spaces: usize = count_token.parse().map_err(|_| {
            CrnError::protocol_error_with_source("Invalid CRN string space count", count_token.to_string())
        })?;

        let mut seen = 0;
        for (i, ch) in self.rest.char_indices() {
            if ch == ' ' {
                if seen == spaces {
                    let content = &self.rest[..i];
                    self.rest = &self.rest[i + 1..];
                    return Ok(content);
                }
                seen += 1;
            }
        }
        if seen == spaces {
            let content = self.rest;
            self.rest = "";
            return Ok(content);
        }
        Err(CrnError::protocol_error_with_source(
            "CRN string shorter than its space count",
            count_token.to_string(),
        )
        .into())
    }
}
