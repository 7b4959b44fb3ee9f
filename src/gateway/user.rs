//! UserInputHandler (§4.7): the thinnest possible handler — it exists
//! only so `InputGateway` has a uniform `SourceHandler`-shaped call site
//! for the one source that isn't short-circuited.

use crate::router::IntentRouter;
use crate::types::{RequestContext, RoutingDecision};
use std::sync::Arc;

pub struct UserInputHandler {
    router: Arc<IntentRouter>,
}

impl UserInputHandler {
    pub fn new(router: Arc<IntentRouter>) -> Self {
        Self { router }
    }

    pub async fn handle(&self, text: &str, context: &RequestContext) -> RoutingDecision {
        self.router.route(text, context).await
    }
}
