//! TLS：加载配置的证书，缺省时生成自签名证书。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// 构建 Rustls 配置；证书与私钥需成对提供。
pub async fn build_rustls_config(
    tls_cert: Option<&str>,
    tls_key: Option<&str>,
    host: IpAddr,
) -> Result<RustlsConfig, std::io::Error> {
    let (cert_path, key_path) = match (tls_cert, tls_key) {
        (Some(cert), Some(key)) => (PathBuf::from(cert), PathBuf::from(key)),
        (cert, key) => {
            if cert.is_some() || key.is_some() {
                warn!("tls cert and key must be given together, using a self-signed cert");
            }
            generate_self_signed_paths(host)?
        }
    };

    let cert = fs::read(&cert_path).await?;
    let key = fs::read(&key_path).await?;
    RustlsConfig::from_pem(cert, key).await
}

fn generate_self_signed_paths(host: IpAddr) -> Result<(PathBuf, PathBuf), std::io::Error> {
    let cert = generate_simple_self_signed([host.to_string(), "localhost".to_string()])
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    let dir = std::env::temp_dir();
    let cert_path = dir.join("disk-bridge-cert.pem");
    let key_path = dir.join("disk-bridge-key.pem");
    std::fs::write(&cert_path, cert.cert.pem())?;
    std::fs::write(&key_path, cert.key_pair.serialize_pem())?;
    info!(path = ?cert_path, "generated self-signed cert");
    Ok((cert_path, key_path))
}
