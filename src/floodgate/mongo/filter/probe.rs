use std::convert::TryInto;

use crypto::digest::Digest;
use crypto::md5::Md5;
use fnv::FnvHashMap;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use crate::floodgate::common::{Error, Result};
use crate::floodgate::config::MongoBackend;
use crate::floodgate::mongo::filter::stats::{DbStats, StatsSource};
use crate::floodgate::mongo::protocol::{MsgHeader, OpCode, HEADER_LEN};

/// dbStats replies are small; anything bigger than this is not a reply we
/// want to buffer.
const MAX_REPLY_LEN: usize = 4 * 1024 * 1024;

trait ProbeIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProbeIo for T {}

/// Speaks just enough of the wire protocol to run the dbStats command
/// against the metered database and pull the size fields out of the reply.
/// The wire session is kept across fetches and re-established after any
/// error.
pub struct DbStatsProbe {
    backend: MongoBackend,
    stream: Option<Box<dyn ProbeIo>>,
    request_id: i32,
}

impl DbStatsProbe {
    pub fn new(backend: MongoBackend) -> Self {
        DbStatsProbe {
            backend,
            stream: None,
            request_id: 0,
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        let stream: Box<dyn ProbeIo> = if !self.backend.socket_path.is_empty() {
            Box::new(UnixStream::connect(&self.backend.socket_path).await?)
        } else {
            Box::new(TcpStream::connect(self.backend.address()).await?)
        };
        #[cfg(not(unix))]
        let stream: Box<dyn ProbeIo> = Box::new(TcpStream::connect(self.backend.address()).await?);
        debug!(backend = %self.backend.address(), "stats probe connected");
        self.stream = Some(stream);
        if !self.backend.user.is_empty() {
            self.login().await?;
        }
        Ok(())
    }

    async fn try_fetch(&mut self) -> Result<DbStats> {
        self.connect().await?;
        let dbname = self.backend.dbname.clone();
        let mut cmd = doc_begin();
        doc_push_i32(&mut cmd, "dbStats", 1);
        doc_push_i32(&mut cmd, "scale", 1);
        let reply = self.run_command(&dbname, &doc_finish(cmd)).await?;
        command_ok(&reply)?;
        Ok(DbStats {
            data_size: require_num(&reply, "dataSize")?,
            index_size: require_num(&reply, "indexSize")?,
            file_size: optional_num(&reply, "fileSize"),
            ns_size_mb: optional_num(&reply, "nsSizeMB"),
        })
    }

    /// Legacy nonce/key login: key = md5(nonce + user + md5(user:mongo:pass)).
    async fn login(&mut self) -> Result<()> {
        let dbname = self.backend.dbname.clone();
        let user = self.backend.user.clone();
        let pass = self.backend.pass.clone();

        let mut cmd = doc_begin();
        doc_push_i32(&mut cmd, "getnonce", 1);
        let reply = self.run_command(&dbname, &doc_finish(cmd)).await?;
        command_ok(&reply)?;
        let nonce = match reply.get("nonce") {
            Some(Bson::Str(nonce)) => nonce.clone(),
            _ => return Err(Error::new("getnonce reply carries no nonce")),
        };

        let credentials = md5_hex(&format!("{}:mongo:{}", user, pass));
        let key = md5_hex(&format!("{}{}{}", nonce, user, credentials));

        let mut cmd = doc_begin();
        doc_push_i32(&mut cmd, "authenticate", 1);
        doc_push_str(&mut cmd, "user", &user);
        doc_push_str(&mut cmd, "nonce", &nonce);
        doc_push_str(&mut cmd, "key", &key);
        let reply = self.run_command(&dbname, &doc_finish(cmd)).await?;
        command_ok(&reply).map_err(|_| Error::new("authentication failed"))
    }

    /// Sends the command document as an OP_QUERY against `<db>.$cmd` and
    /// returns the first reply document.
    async fn run_command(&mut self, db: &str, doc: &[u8]) -> Result<FnvHashMap<String, Bson>> {
        let mut body = Vec::with_capacity(db.len() + doc.len() + 32);
        body.extend_from_slice(&0i32.to_le_bytes()); // flags
        body.extend_from_slice(db.as_bytes());
        body.extend_from_slice(b".$cmd\0");
        body.extend_from_slice(&0i32.to_le_bytes()); // number_to_skip
        body.extend_from_slice(&(-1i32).to_le_bytes()); // number_to_return
        body.extend_from_slice(doc);

        self.request_id += 1;
        let header = MsgHeader::encode(
            (HEADER_LEN + body.len()) as i32, self.request_id, 0, OpCode::QUERY);
        let stream = self.stream.as_mut().ok_or_else(Error::closed)?;
        stream.write_all(&header).await?;
        stream.write_all(&body).await?;

        let mut header_bytes = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_bytes).await?;
        let header = match MsgHeader::parse(&header_bytes) {
            Some(header) => header,
            None => return Err(Error::new("short reply header")),
        };
        if header.op != OpCode::REPLY {
            return Err(Error::new(format!("unexpected reply op {}", header.op)));
        }
        let reply_len = header.length as usize;
        // flags(4) + cursor_id(8) + starting_from(4) + number_returned(4)
        if reply_len < HEADER_LEN + 20 || reply_len > MAX_REPLY_LEN {
            return Err(Error::new(format!("implausible reply length {}", header.length)));
        }
        let mut reply = vec![0u8; reply_len - HEADER_LEN];
        stream.read_exact(&mut reply).await?;

        let number_returned = i32::from_le_bytes(reply[16..20].try_into().unwrap());
        if number_returned < 1 {
            return Err(Error::new("command returned no documents"));
        }
        parse_doc(&reply[20..])
    }
}

impl StatsSource for DbStatsProbe {
    fn fetch(&mut self) -> BoxFuture<'_, Result<DbStats>> {
        Box::pin(async move {
            let result = self.try_fetch().await;
            if result.is_err() {
                // drop the wire session; the next fetch dials a fresh one
                self.stream = None;
            }
            result
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bson {
    Num(f64),
    Str(String),
    Skipped,
}

/*
 * Shallow single-document BSON access: enough to build flat command
 * documents of int32/string fields and to scan a reply for its top-level
 * numeric and string fields. Embedded documents are skipped, not decoded.
 */

fn doc_begin() -> Vec<u8> {
    vec![0u8; 4] // length, patched in doc_finish
}

fn doc_push_i32(doc: &mut Vec<u8>, name: &str, value: i32) {
    doc.push(0x10);
    doc.extend_from_slice(name.as_bytes());
    doc.push(0);
    doc.extend_from_slice(&value.to_le_bytes());
}

fn doc_push_str(doc: &mut Vec<u8>, name: &str, value: &str) {
    doc.push(0x02);
    doc.extend_from_slice(name.as_bytes());
    doc.push(0);
    doc.extend_from_slice(&((value.len() + 1) as i32).to_le_bytes());
    doc.extend_from_slice(value.as_bytes());
    doc.push(0);
}

fn doc_finish(mut doc: Vec<u8>) -> Vec<u8> {
    doc.push(0);
    let len = doc.len() as i32;
    doc[0..4].copy_from_slice(&len.to_le_bytes());
    doc
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *at + n > bytes.len() {
        return Err(Error::new("truncated bson document"));
    }
    let slice = &bytes[*at..*at + n];
    *at += n;
    Ok(slice)
}

/// Numeric fields may arrive as int32, int64 or double depending on how
/// large the database has grown; all of them decode to Num.
pub(crate) fn parse_doc(bytes: &[u8]) -> Result<FnvHashMap<String, Bson>> {
    let mut fields = FnvHashMap::default();
    let mut at = 0usize;
    let doc_len = i32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap());
    if doc_len < 5 || doc_len as usize > bytes.len() {
        return Err(Error::new("truncated bson document"));
    }
    loop {
        let element_type = take(bytes, &mut at, 1)?[0];
        if element_type == 0 {
            break;
        }
        let name_len = bytes[at..].iter().position(|&b| b == 0)
            .ok_or_else(|| Error::new("unterminated bson element name"))?;
        let name = String::from_utf8(take(bytes, &mut at, name_len)?.to_vec())
            .map_err(|_| Error::new("bson element name is not utf-8"))?;
        at += 1; // NUL

        let value = match element_type {
            0x01 => Bson::Num(f64::from_le_bytes(take(bytes, &mut at, 8)?.try_into().unwrap())),
            0x10 => Bson::Num(i32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap()) as f64),
            0x12 => Bson::Num(i64::from_le_bytes(take(bytes, &mut at, 8)?.try_into().unwrap()) as f64),
            0x02 | 0x0d | 0x0e => {
                let len = i32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap());
                if len < 1 {
                    return Err(Error::new("invalid bson string length"));
                }
                let raw = take(bytes, &mut at, len as usize)?;
                String::from_utf8(raw[..raw.len() - 1].to_vec())
                    .map(Bson::Str)
                    .map_err(|_| Error::new("bson string is not utf-8"))?
            },
            0x03 | 0x04 => {
                // embedded document/array, length includes itself
                let len = i32::from_le_bytes(bytes.get(at..at + 4)
                    .ok_or_else(|| Error::new("truncated bson document"))?
                    .try_into().unwrap());
                if len < 5 {
                    return Err(Error::new("invalid embedded document length"));
                }
                take(bytes, &mut at, len as usize)?;
                Bson::Skipped
            },
            0x05 => {
                let len = i32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap());
                if len < 0 {
                    return Err(Error::new("invalid bson binary length"));
                }
                take(bytes, &mut at, 1 + len as usize)?;
                Bson::Skipped
            },
            0x07 => { take(bytes, &mut at, 12)?; Bson::Skipped },
            0x08 => { take(bytes, &mut at, 1)?; Bson::Skipped },
            0x09 | 0x11 => { take(bytes, &mut at, 8)?; Bson::Skipped },
            0x06 | 0x0a => Bson::Skipped,
            other => return Err(Error::new(format!("unsupported bson element type {:#x}", other))),
        };
        fields.insert(name, value);
    }
    Ok(fields)
}

fn command_ok(fields: &FnvHashMap<String, Bson>) -> Result<()> {
    match fields.get("ok") {
        Some(Bson::Num(ok)) if *ok >= 1.0 => Ok(()),
        _ => Err(Error::new("backend command failed")),
    }
}

fn require_num(fields: &FnvHashMap<String, Bson>, name: &str) -> Result<f64> {
    match fields.get(name) {
        Some(Bson::Num(value)) => Ok(*value),
        _ => Err(Error::new(format!("stats reply is missing {}", name))),
    }
}

fn optional_num(fields: &FnvHashMap<String, Bson>, name: &str) -> f64 {
    match fields.get(name) {
        Some(Bson::Num(value)) => *value,
        _ => 0.0,
    }
}

fn md5_hex(input: &str) -> String {
    let mut digest = Md5::new();
    digest.input_str(input);
    digest.result_str()
}
