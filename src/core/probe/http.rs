//! HTTP/HTTPS probe: sends a raw request line built from the pool's
//! template string, then checks the response status code against the
//! configured ok-code list.
//!
//! Unlike the teacher's `http_monitor.rs`, which drives a full URL through
//! `isahc`, the probe here needs exact control of the request line (it is a
//! user-supplied template with `{pool}`/`{node}`-style substitutions) so it
//! writes the request directly over the socket. TLS is handled with
//! `tokio-rustls`; per `spec.md` §4.2 peer verification is intentionally
//! disabled, since the probe is checking reachability/liveness of a known
//! backend, not authenticating it.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{Outcome, ProbeSpec};

/// Substitutes the exact tokens `spec.md` §4.2 names (`{POOL_NAME}`,
/// `{POOL_ADDRESS}`, `{NODE_NAME}`, `{NODE_ADDRESS}`,
/// `{ACTIVE_NODES_NAMES}`, `{ACTIVE_NODES_ADDRESSES}`) into the
/// configured request-line template.
fn substitute(template: &str, spec: &ProbeSpec) -> String {
    template
        .replace("{POOL_NAME}", &spec.ctx.pool_name)
        .replace("{POOL_ADDRESS}", &spec.ctx.pool_address)
        .replace("{NODE_NAME}", &spec.ctx.node_name)
        .replace("{NODE_ADDRESS}", &spec.ctx.node_address)
        .replace("{ACTIVE_NODES_NAMES}", &spec.ctx.active_node_names)
        .replace("{ACTIVE_NODES_ADDRESSES}", &spec.ctx.active_node_addresses)
}

pub async fn run(spec: &ProbeSpec) -> Outcome {
    let super::ProbeKind::Http {
        request_template,
        host,
        ok_codes,
        tls,
    } = &spec.kind
    else {
        return Outcome::Panic("http::run called with non-http probe kind".to_string());
    };

    let addr = SocketAddr::new(spec.address, spec.port);
    let stream = match TcpStream::connect(addr).await {
        Ok(s) => s,
        Err(e) => return Outcome::Fail(format!("connect failed: {e}")),
    };

    let request_line = substitute(request_template, spec);
    let host_header = host.clone().unwrap_or_else(|| spec.address.to_string());
    let request = format!(
        "{request_line} HTTP/1.1\r\nHost: {host_header}\r\nConnection: close\r\n\r\n"
    );

    let response = if *tls {
        let config = insecure_tls_config();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = match rustls::pki_types::ServerName::try_from(host_header.clone()) {
            Ok(name) => name,
            Err(_) => rustls::pki_types::ServerName::IpAddress(spec.address.into()),
        };
        let mut tls_stream = match connector.connect(server_name, stream).await {
            Ok(s) => s,
            Err(e) => return Outcome::Fail(format!("tls handshake failed: {e}")),
        };
        match exchange(&mut tls_stream, &request).await {
            Ok(buf) => buf,
            Err(e) => return Outcome::Fail(e),
        }
    } else {
        let mut stream = stream;
        match exchange(&mut stream, &request).await {
            Ok(buf) => buf,
            Err(e) => return Outcome::Fail(e),
        }
    };

    match parse_status_code(&response) {
        Some(code) if ok_codes.iter().any(|c| c == &code) => Outcome::Pass,
        Some(code) => Outcome::Fail(format!("unexpected status code {code}")),
        None => Outcome::Fail("malformed response: no status line".to_string()),
    }
}

async fn exchange<S>(stream: &mut S, request: &str) -> Result<Vec<u8>, String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        if n == 0 {
            // The request always sends `Connection: close`, so the server
            // closing the socket is the defined end of the response.
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

fn parse_status_code(response: &[u8]) -> Option<String> {
    let line_end = response.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    line.split_whitespace().nth(1).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_code_from_status_line() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(parse_status_code(response), Some("200".to_string()));
    }

    #[test]
    fn returns_none_without_a_status_line() {
        assert_eq!(parse_status_code(b""), None);
        assert_eq!(parse_status_code(b"garbage with no crlf"), None);
    }

    #[test]
    fn substitutes_every_template_token() {
        let spec = ProbeSpec {
            kind: super::super::ProbeKind::Tcp,
            address: "10.0.0.1".parse().unwrap(),
            port: 80,
            timeout: std::time::Duration::from_millis(1500),
            ctx: super::super::RunContext {
                pool_name: "web".to_string(),
                pool_address: "10.0.0.100".to_string(),
                node_name: "lbnode1".to_string(),
                node_address: "10.0.0.1".to_string(),
                active_node_names: "lbnode1,lbnode2".to_string(),
                active_node_addresses: "10.0.0.1,10.0.0.2".to_string(),
            },
        };
        let rendered = substitute(
            "HEAD /{POOL_NAME}/{POOL_ADDRESS}/{NODE_NAME}/{NODE_ADDRESS}?up={ACTIVE_NODES_NAMES}&addrs={ACTIVE_NODES_ADDRESSES}",
            &spec,
        );
        assert_eq!(
            rendered,
            "HEAD /web/10.0.0.100/lbnode1/10.0.0.1?up=lbnode1,lbnode2&addrs=10.0.0.1,10.0.0.2"
        );
    }
}

fn insecure_tls_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
