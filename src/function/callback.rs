//! Function callback trait.

use async_trait::async_trait;
use std::future::Future;

use super::outcome::Reply;
use crate::middleware::Args;
use crate::types::{PeerId, Result};

/// Handles requests arriving on a function channel.
///
/// Implemented for any `Fn(Option<PeerId>, Args) -> impl Future<Output = Result<Reply>>`
/// closure, so most callers never name the trait:
///
/// ```ignore
/// functions.get("getScore")?.set_callback(|peer, args| async move {
///     Ok(Reply::Value(json!(42)))
/// })?;
/// ```
#[async_trait]
pub trait FunctionCallback: Send + Sync + 'static {
    /// `sender` is the requesting client on the server, `None` on a client.
    async fn call(&self, sender: Option<PeerId>, args: Args) -> Result<Reply>;
}

#[async_trait]
impl<F, Fut> FunctionCallback for F
where
    F: Fn(Option<PeerId>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    async fn call(&self, sender: Option<PeerId>, args: Args) -> Result<Reply> {
        (self)(sender, args).await
    }
}
