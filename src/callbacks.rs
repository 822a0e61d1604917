//! Hooks a hosting application implements to take part in the module lifecycle
//!
//! Every connectivity hook defaults to a no-op. `on_message` and `get_status`
//! have no default: they carry the application's own traffic.

use crate::protocol::Document;

pub trait ModuleCallbacks: Send + Sync {
    fn on_network_join_begin(&self) {}

    fn on_network_join_result(&self, _success: bool) {}

    fn on_network_lost(&self) {}

    fn on_messaging_begin(&self) {}

    fn on_messaging_result(&self, _success: bool) {}

    fn on_messaging_lost(&self) {}

    /// Called in arrival order for every message on a subscribed topic
    fn on_message(&self, topic: &str, payload: &str);

    /// Heartbeat content for `status/<name>`; `None` skips the heartbeat
    fn get_status(&self) -> Option<Document>;
}

/// Callbacks for modules that neither subscribe nor publish a heartbeat
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCallbacks;

impl ModuleCallbacks for SilentCallbacks {
    fn on_message(&self, _topic: &str, _payload: &str) {}

    fn get_status(&self) -> Option<Document> {
        None
    }
}
