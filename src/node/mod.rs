//! Node handles and the collaborators that build them.

mod factory;
mod handle;

pub use factory::{
    AuthFactory, AuthMechanism, ConnectionPool, Endpoint, IoStrategy, IoStrategyFactory,
    NodeFactories, PoolFactory, Transcoder,
};
pub use handle::{Node, NodeHandle};

pub(crate) use factory::BuildParams;
