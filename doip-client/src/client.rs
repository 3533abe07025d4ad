//! Strict DOIP v2 client over blocking TCP/TLS.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use doip_wire::consts::*;
use doip_wire::{Header, Message, WireError};

use crate::tls;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid server name {0}")]
    InvalidServerName(String),
    #[error("malformed response: {0}")]
    Malformed(#[from] WireError),
    #[error("no component blocks in response")]
    NoComponents,
}

/// Blocking TCP/TLS DOIP v2 client.
#[derive(Debug, Clone)]
pub struct DoipClient {
    host: String,
    port: u16,
    use_tls: bool,
    verify_tls: bool,
    timeout: Duration,
}

impl DoipClient {
    /// Client with TLS and peer verification on and a 10 s socket timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: true,
            verify_tls: true,
            timeout: Duration::from_secs(10),
        }
    }

    /// Toggle TLS; `verify_tls = false` disables certificate and hostname
    /// verification.
    pub fn with_tls(mut self, use_tls: bool, verify_tls: bool) -> Self {
        self.use_tls = use_tls;
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Client configured from `DOIP_HOST`, `DOIP_PORT`, `DOIP_USE_TLS` and
    /// `DOIP_VERIFY_TLS`.
    pub fn from_env() -> Self {
        let host = std::env::var("DOIP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("DOIP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self::new(host, port).with_tls(env_flag("DOIP_USE_TLS", true), env_flag("DOIP_VERIFY_TLS", true))
    }

    /// Hello operation; returns the first metadata block.
    pub fn hello(&self) -> Result<Value, ClientError> {
        let mut request = Message::request(OP_HELLO, "");
        request.metadata.push(json!({"operation": "hello"}));
        let response = self.send_message(&request)?;
        Ok(response.metadata.into_iter().next().unwrap_or_else(|| json!({})))
    }

    /// List the operations the server supports.
    pub fn list_ops(&self) -> Result<Value, ClientError> {
        let mut request = Message::request(OP_LIST_OPS, "");
        request.metadata.push(json!({"operation": "list_operations"}));
        let response = self.send_message(&request)?;
        Ok(response.metadata.into_iter().next().unwrap_or_else(|| json!({})))
    }

    /// Retrieve the manifest, or one component when `component_id` is set.
    pub fn retrieve(&self, object_id: &str, component_id: Option<&str>) -> Result<Message, ClientError> {
        let mut meta = json!({"operation": "retrieve"});
        if let Some(component_id) = component_id {
            meta["element"] = json!(component_id);
        }
        let mut request = Message::request(OP_RETRIEVE, object_id);
        request.metadata.push(meta);
        self.send_message(&request)
    }

    /// Invoke a workflow on an object.
    pub fn invoke(
        &self,
        object_id: &str,
        workflow: &str,
        params: Option<Value>,
    ) -> Result<Message, ClientError> {
        let mut request = Message::request(OP_INVOKE, object_id);
        request.metadata.push(json!({
            "operation": "invoke",
            "workflow": workflow,
            "params": params.unwrap_or_else(|| json!({})),
        }));
        self.send_message(&request)
    }

    /// Send one request and read the complete response envelope.
    pub fn send_message(&self, request: &Message) -> Result<Message, ClientError> {
        let encoded = request.to_bytes()?;
        debug!(host = %self.host, port = self.port, bytes = encoded.len(), "sending request");

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClientError::Resolve(format!("{}:{}", self.host, self.port)))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout).map_err(|source| {
            ClientError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            }
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut transport = tls::wrap(stream, &self.host, self.use_tls, self.verify_tls)?;
        transport.write_all(&encoded)?;
        transport.flush()?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        transport.read_exact(&mut header_bytes)?;
        let header = Header::decode(&header_bytes)?;
        let mut object_id = vec![0u8; header.object_id_len as usize];
        transport.read_exact(&mut object_id)?;
        let mut payload = vec![0u8; header.payload_len as usize];
        transport.read_exact(&mut payload)?;

        Ok(Message::decode_parts(&header, &object_id, &payload)?)
    }

    /// Save the first component of a response to disk and return the path.
    ///
    /// A directory target resolves to the component-id basename inside it.
    pub fn save_first_component(
        response: &Message,
        output_path: Option<&Path>,
    ) -> Result<PathBuf, ClientError> {
        let component = response.components.first().ok_or(ClientError::NoComponents)?;
        let target_name = Path::new(&component.component_id)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&component.component_id));
        let dest = match output_path {
            Some(path) if path.is_dir() => path.join(&target_name),
            Some(path) => path.to_path_buf(),
            None => target_name,
        };
        std::fs::write(&dest, &component.content)?;
        Ok(dest)
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use doip_wire::ComponentBlock;

    use super::*;

    #[test]
    fn send_message_round_trips_over_tcp() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header_bytes = [0u8; HEADER_SIZE];
            stream.read_exact(&mut header_bytes).unwrap();
            let header = Header::decode(&header_bytes).unwrap();
            let mut object_id = vec![0u8; header.object_id_len as usize];
            stream.read_exact(&mut object_id).unwrap();
            let mut payload = vec![0u8; header.payload_len as usize];
            stream.read_exact(&mut payload).unwrap();
            let request = Message::decode_parts(&header, &object_id, &payload).unwrap();
            assert_eq!(request.msg_type, MSG_TYPE_REQUEST);
            assert_eq!(request.op_code, OP_RETRIEVE);
            assert_eq!(request.object_id, "Q123");
            assert_eq!(request.metadata[0]["element"], "primary");

            let mut response = Message::response(OP_RETRIEVE, "Q123");
            response
                .components
                .push(ComponentBlock::new("primary", "application/pdf", &b"data"[..]));
            stream.write_all(&response.to_bytes().unwrap()).unwrap();
        });

        let client = DoipClient::new("127.0.0.1", addr.port()).with_tls(false, true);
        let response = client.retrieve("Q123", Some("primary")).unwrap();
        assert_eq!(response.msg_type, MSG_TYPE_RESPONSE);
        assert_eq!(&response.components[0].content[..], &b"data"[..]);
        server.join().unwrap();
    }

    #[test]
    fn save_first_component_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let mut response = Message::response(OP_RETRIEVE, "Q123");
        response.components.push(ComponentBlock::new(
            "doip:bitstream/Q123/equations-json",
            "application/json",
            &b"[]"[..],
        ));

        let path = DoipClient::save_first_component(&response, Some(dir.path())).unwrap();

        assert_eq!(path.file_name().unwrap(), "equations-json");
        assert_eq!(std::fs::read(&path).unwrap(), b"[]");
    }

    #[test]
    fn save_first_component_honors_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let mut response = Message::response(OP_RETRIEVE, "Q123");
        response
            .components
            .push(ComponentBlock::new("primary", "application/pdf", &b"x"[..]));

        let path = DoipClient::save_first_component(&response, Some(&target)).unwrap();

        assert_eq!(path, target);
        assert_eq!(std::fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn save_without_components_fails() {
        let response = Message::response(OP_RETRIEVE, "Q123");
        assert!(matches!(
            DoipClient::save_first_component(&response, None),
            Err(ClientError::NoComponents)
        ));
    }

    #[test]
    fn env_flag_parsing() {
        assert!(env_flag("DOIP_TEST_UNSET_FLAG", true));
        assert!(!env_flag("DOIP_TEST_UNSET_FLAG", false));
    }
}
