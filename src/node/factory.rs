//! Collaborator seams used to build node handles.
//!
//! The context never opens sockets itself. For every new node address it
//! runs the pipeline
//!
//! ```text
//! PoolConfig + Endpoint ──▶ ConnectionPool ──▶ IoStrategy ──▶ AuthMechanism
//!                           (pool factory)    (io factory)   (auth factory)
//! ```
//!
//! and wraps the resulting dispatch strategy in a [`Node`].

use super::handle::{Node, NodeHandle};
use crate::config::PoolConfig;
use crate::error::NodeError;
use crate::topology::NodeDescriptor;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Where and how a pool connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub secure: bool,
}

/// A pool of connections to one node.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Endpoint the pool connects to.
    fn endpoint(&self) -> Endpoint;

    /// Close every connection in the pool.
    fn close(&self);
}

/// Request dispatch strategy layered over a connection pool.
pub trait IoStrategy: Send + Sync + 'static {
    /// The underlying pool.
    fn pool(&self) -> Arc<dyn ConnectionPool>;

    /// Attach the authentication mechanism used for new connections.
    fn set_auth(&self, auth: Arc<dyn AuthMechanism>);

    /// Stop dispatching and close the pool.
    fn close(&self);
}

/// Authentication mechanism negotiated on each connection.
pub trait AuthMechanism: Send + Sync + 'static {
    /// Mechanism name, e.g. `PLAIN`.
    fn mechanism(&self) -> &str;

    /// Bucket the mechanism authenticates against.
    fn bucket(&self) -> &str;
}

/// Payload transcoder shared by every node of a bucket.
pub trait Transcoder: Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Opens a connection pool for an endpoint.
pub type PoolFactory =
    Arc<dyn Fn(&PoolConfig, Endpoint) -> Result<Arc<dyn ConnectionPool>, NodeError> + Send + Sync>;

/// Wraps a connection pool in a dispatch strategy.
pub type IoStrategyFactory = Arc<dyn Fn(Arc<dyn ConnectionPool>) -> Arc<dyn IoStrategy> + Send + Sync>;

/// Creates the authentication mechanism for (bucket, password, strategy, transcoder).
pub type AuthFactory = Arc<
    dyn Fn(
            &str,
            &str,
            Arc<dyn IoStrategy>,
            Arc<dyn Transcoder>,
        ) -> Result<Arc<dyn AuthMechanism>, NodeError>
        + Send
        + Sync,
>;

/// Everything needed to turn a node descriptor into a live handle.
#[derive(Clone)]
pub struct NodeFactories {
    pub pool: PoolFactory,
    pub io_strategy: IoStrategyFactory,
    pub auth: AuthFactory,
    pub transcoder: Arc<dyn Transcoder>,
}

/// Per-bucket inputs for building a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildParams<'a> {
    pub bucket: &'a str,
    pub password: &'a str,
    pub pool: &'a PoolConfig,
    pub tls: bool,
    pub default_tls_port: u16,
}

impl NodeFactories {
    /// Bundle the collaborator factories.
    pub fn new(
        pool: PoolFactory,
        io_strategy: IoStrategyFactory,
        auth: AuthFactory,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            pool,
            io_strategy,
            auth,
            transcoder,
        }
    }

    /// Build a handle for one descriptor.
    ///
    /// If authentication setup fails the already opened strategy is closed
    /// before the error is returned.
    pub(crate) fn build_node(
        &self,
        descriptor: &NodeDescriptor,
        params: BuildParams<'_>,
    ) -> Result<NodeHandle, NodeError> {
        let endpoint = Endpoint {
            addr: descriptor.endpoint(params.tls, params.default_tls_port),
            secure: params.tls,
        };

        let pool = (self.pool)(params.pool, endpoint)?;
        let io = (self.io_strategy)(pool);

        match (self.auth)(
            params.bucket,
            params.password,
            io.clone(),
            self.transcoder.clone(),
        ) {
            Ok(auth) => io.set_auth(auth),
            Err(e) => {
                io.close();
                return Err(e);
            }
        }

        Ok(Arc::new(Node::new(
            descriptor.address,
            endpoint,
            descriptor.capabilities,
            io,
        )))
    }
}

impl fmt::Debug for NodeFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFactories")
            .field("transcoder", &self.transcoder.name())
            .finish_non_exhaustive()
    }
}
