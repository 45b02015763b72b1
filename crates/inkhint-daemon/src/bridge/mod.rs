//! Compositor bridges
//!
//! A bridge watches some source of window information and keeps the
//! registry in step with it. Bridges only ever see a [`MutationSink`], never
//! the registry itself.

mod niri;
mod session;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::registry::{Applied, Mutation, RegistryError};
use crate::service::{ServiceError, ServiceHandle};

pub use niri::NiriBridge;
pub use session::{BridgeSession, WindowSnapshot};

/// Where bridges send their registry changes
pub trait MutationSink: Send + Sync {
    fn apply(&self, mutation: Mutation) -> BoxFuture<'_, Result<Applied, ServiceError>>;
}

impl MutationSink for ServiceHandle {
    fn apply(&self, mutation: Mutation) -> BoxFuture<'_, Result<Applied, ServiceError>> {
        ServiceHandle::apply(self, mutation).boxed()
    }
}

impl<T: MutationSink + ?Sized> MutationSink for Arc<T> {
    fn apply(&self, mutation: Mutation) -> BoxFuture<'_, Result<Applied, ServiceError>> {
        (**self).apply(mutation)
    }
}

fn is_not_found(e: &ServiceError) -> bool {
    matches!(
        e,
        ServiceError::Registry(RegistryError::AppNotFound(_) | RegistryError::WindowNotFound(_))
    )
}
