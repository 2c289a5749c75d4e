//! Node handles and their typed identifiers.

use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use uuid::Uuid;

/// A live handle to a started component.
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Shut the node down and release what it owns.
    async fn stop(&mut self) -> Result<()>;
}

/// A node that answers `M` messages with `R` results.
#[async_trait]
pub trait CommunicationNode<M, R>: Node {
    /// Send one message and wait for the result.
    async fn send(&self, message: &M) -> Result<R>;
}

/// Node storage with downcasting, used by simulations holding mixed node types.
pub(crate) trait AnyNode: Node {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<N: Node> AnyNode for N {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Identifier of a registered component that remembers the node type it starts.
///
/// The type parameter exists only at compile time; two ids compare equal
/// when their tokens do.
pub struct NodeId<N> {
    token: Uuid,
    _node: PhantomData<fn() -> N>,
}

impl<N> NodeId<N> {
    /// Mint a fresh random id.
    pub(crate) fn new() -> Self {
        Self {
            token: Uuid::new_v4(),
            _node: PhantomData,
        }
    }

    /// The underlying token.
    pub fn as_uuid(&self) -> Uuid {
        self.token
    }
}

impl<N> Clone for NodeId<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for NodeId<N> {}

impl<N> PartialEq for NodeId<N> {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl<N> Eq for NodeId<N> {}

impl<N> Hash for NodeId<N> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl<N> fmt::Debug for NodeId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId<{}>({})", short_type_name::<N>(), self.token)
    }
}

impl<N> fmt::Display for NodeId<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

fn short_type_name<N>() -> &'static str {
    let full = std::any::type_name::<N>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
