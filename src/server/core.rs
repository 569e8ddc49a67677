use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc};

use crate::auth::UserDirectory;
use crate::client::handle_client;
use crate::clock::{Clock, SystemClock};
use crate::config::{ProvisionedUser, ServerConfig};
use crate::database::Database;
use crate::error::{AuthError, StartupError};
use crate::gate::AccessGate;
use crate::middleware::ClientFilter;
use crate::middleware::thumbnails::{ChannelThumbnailSink, ThumbnailRequest, run_thumbnail_worker};
use crate::protocol::responses::{SERVICE_UNAVAILABLE, format_response};
use crate::protocol::{Links, ProtocolContext};
use crate::quota::QuotaLedger;
use crate::session::SessionManager;
use crate::storage::{PathResolver, StorageStore};

const THUMBNAIL_QUEUE: usize = 256;

pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    context: Arc<ProtocolContext>,
    sessions: Arc<SessionManager>,
    connections: Arc<Semaphore>,
    thumbnail_rx: Option<mpsc::Receiver<ThumbnailRequest>>,
}

impl Server {
    /// Opens storage and binds the control listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, StartupError> {
        Self::bind_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn bind_with_clock(
        config: ServerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        let core = &config.core;

        let resolver = PathResolver::new(&core.storage_path_template)?;
        let db = Arc::new(Database::open(&core.database_file)?);
        info!("Metadata database: {}", core.database_file.display());

        let ledger = Arc::new(QuotaLedger::new());
        let users = Arc::new(UserDirectory::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            resolver.clone(),
            core,
        ));
        users.load_accounts().await?;
        provision_users(&users, &config.users, core.default_quota_bytes).await?;

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&users),
            Arc::clone(&db),
            Arc::clone(&clock),
            core,
        ));
        sessions.load().await?;

        let store = Arc::new(StorageStore::new(
            resolver,
            db,
            clock,
            core.max_upload_bytes,
        ));

        let mut gate = AccessGate::new(Arc::clone(&sessions), users, ledger, store);
        let thumbnail_rx = if core.enable_thumbnails {
            let (sink, rx) = ChannelThumbnailSink::channel(THUMBNAIL_QUEUE);
            gate = gate.with_thumbnails(Arc::new(sink));
            Some(rx)
        } else {
            None
        };

        let context = Arc::new(ProtocolContext {
            gate: Arc::new(gate),
            links: Links::new(&core.root_url),
            filter: ClientFilter::new(core.block_ios_clients),
            show_errors: core.errors_show,
        });

        let addr = config.control_socket();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server bound to {}", addr);

        Ok(Self {
            listener,
            connections: Arc::new(Semaphore::new(config.network.max_clients)),
            config: Arc::new(config),
            context,
            sessions,
            thumbnail_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gate(&self) -> Arc<AccessGate> {
        Arc::clone(&self.context.gate)
    }

    /// Runs the accept loop along with the background sweep and thumbnail worker.
    pub async fn run(mut self) {
        if let Some(rx) = self.thumbnail_rx.take() {
            tokio::spawn(run_thumbnail_worker(rx));
        }

        if let Some(period) = self.config.core.session_sweep_interval() {
            let sessions = Arc::clone(&self.sessions);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = sessions.sweep_expired().await {
                        error!("Session sweep failed: {}", e);
                    }
                }
            });
        }

        info!(
            "Starting RAX DAV server on {} (max {} clients)",
            self.config.control_socket(),
            self.config.network.max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((mut stream, addr)) => {
                    let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                        warn!("Refusing {}: connection limit reached", addr);
                        tokio::spawn(async move {
                            let busy = format_response(SERVICE_UNAVAILABLE, "Too many connections");
                            let _ = stream.write_all(busy.as_bytes()).await;
                        });
                        continue;
                    };

                    let context = Arc::clone(&self.context);
                    let max_command_length = self.config.network.max_command_length;

                    // Spawn a task for each client so accept loop doesn't block
                    tokio::spawn(async move {
                        handle_client(stream, addr, context, max_command_length).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Creates configured accounts that do not exist yet.
async fn provision_users(
    users: &UserDirectory,
    accounts: &[ProvisionedUser],
    default_quota: u64,
) -> Result<(), AuthError> {
    for account in accounts {
        match users.get_user(&account.id).await {
            Ok(_) => continue,
            Err(AuthError::UserNotFound(_)) => {
                users
                    .create_user_with_quota(
                        &account.id,
                        &account.password,
                        account.quota_bytes.unwrap_or(default_quota),
                    )
                    .await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
