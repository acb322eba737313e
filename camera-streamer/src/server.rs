//! 输出目录的静态文件服务（HTTP / HTTPS）

use axum::http::{header, HeaderValue};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::errors::ServerError;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// PEM 证书和私钥
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub directory: PathBuf,
    /// 设置时使用 HTTPS
    pub tls: Option<TlsFiles>,
}

pub struct StaticServer {
    config: ServerConfig,
    handle: Handle,
}

impl StaticServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handle: Handle::new(),
        }
    }

    pub fn validate_directory(&self) -> Result<(), ServerError> {
        if self.config.directory.is_dir() {
            Ok(())
        } else {
            Err(ServerError::InvalidDirectory {
                path: self.config.directory.clone(),
            })
        }
    }

    fn router(&self) -> Router {
        // 清单文件持续更新，播放器必须重新拉取
        Router::new()
            .fallback_service(ServeDir::new(&self.config.directory))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetResponseHeaderLayer::if_not_present(
                        header::CACHE_CONTROL,
                        HeaderValue::from_static("no-cache"),
                    )),
            )
    }

    /// 绑定 `0.0.0.0:port` 并提供服务，直到 [`shutdown`](Self::shutdown) 完成
    ///
    /// 配置了 [`TlsFiles`] 时使用 HTTPS。
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        self.validate_directory()?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let app = self.router();

        match &self.config.tls {
            Some(files) => {
                let tls = RustlsConfig::from_pem_file(&files.cert, &files.key)
                    .await
                    .map_err(|e| ServerError::Tls { source: e })?;

                info!("🌐 Serving {:?} over HTTPS on port {}", self.config.directory, self.config.port);
                axum_server::bind_rustls(addr, tls)
                    .handle(self.handle.clone())
                    .serve(app.into_make_service())
                    .await?;
            }
            None => {
                info!("🌐 Serving {:?} over HTTP on port {}", self.config.directory, self.config.port);
                axum_server::bind(addr)
                    .handle(self.handle.clone())
                    .serve(app.into_make_service())
                    .await?;
            }
        }

        debug!("HTTP server closed");
        Ok(())
    }

    /// 停止接收新连接，等待进行中的请求最多 `deadline`，之后强制关闭
    ///
    /// 可重复调用，也可以在 `listen_and_serve` 之前调用。
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.handle.graceful_shutdown(Some(deadline));

        let drained = tokio::time::timeout(deadline, async {
            while self.handle.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        match drained {
            Ok(()) => Ok(()),
            Err(_) => Err(ServerError::DrainTimeout {
                deadline,
                open_connections: self.handle.connection_count(),
            }),
        }
    }

    /// 监听地址；绑定失败时返回 `None`
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.listening().await
    }
}
