//! REST API surface (ambient addition tying the dispatcher to HTTP transport,
//! spec.md deliberately excludes framing from its core).

pub mod rest;

use crate::dispatcher::Dispatcher;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        AppState { dispatcher }
    }
}
