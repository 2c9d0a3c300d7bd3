//! Argument-validating interceptor.
//!
//! Inserted first in a channel's inbound pipeline whenever incoming guards are
//! enabled, so user middleware only ever sees validated arguments. A failing
//! argument never raises: the message is reported on the diagnostics bus and
//! the pipeline returns the channel's failure value instead of calling `next`.

use serde_json::Value;
use std::sync::Arc;

use super::{middleware, processor, Args, MiddlewareFactory, Processor};
use crate::diagnostics::Diagnostics;
use crate::guard::GuardSet;
use crate::network_info::NetworkInfo;
use crate::types::PeerId;

/// Build the guard interceptor for one channel.
///
/// `failure` produces the short-circuit value: `()` for events, a
/// `Reply::BadRequest` future for functions.
pub fn guard_middleware<O: 'static>(
    name: impl Into<String>,
    guards: GuardSet,
    warn_on_invalid: bool,
    diagnostics: Diagnostics,
    failure: Arc<dyn Fn() -> O + Send + Sync>,
) -> MiddlewareFactory<O> {
    let name: Arc<str> = Arc::from(name.into());

    middleware(move |next: Processor<O>, info: &NetworkInfo| {
        let name = name.clone();
        let guards = guards.clone();
        let diagnostics = diagnostics.clone();
        let failure = failure.clone();
        let info = info.clone();

        processor(move |peer: Option<PeerId>, args: Args| {
            let Some(index) = guards.first_failure(&args) else {
                return next(peer, args);
            };

            let value = args.get(index).cloned().unwrap_or(Value::Null);
            if warn_on_invalid {
                match &peer {
                    Some(peer) => tracing::warn!(
                        "'{}' sent invalid arguments for {} '{}' (arg #{}): {}",
                        peer,
                        kind_label(&info),
                        name,
                        index,
                        value
                    ),
                    None => tracing::warn!(
                        "Server sent invalid arguments for {} '{}' (arg #{}): {}",
                        kind_label(&info),
                        name,
                        index,
                        value
                    ),
                }
            }

            diagnostics.publish_bad_request(peer, &info, index, value);
            failure()
        })
    })
}

fn kind_label(info: &NetworkInfo) -> &'static str {
    match info.kind {
        crate::network_info::ChannelKind::Event => "event",
        crate::network_info::ChannelKind::Function => "function",
    }
}
