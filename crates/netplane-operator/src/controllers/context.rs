//! Shared controller context

use kube::Client;

use crate::config::ReconcileSettings;

/// State handed to every reconcile of one controller set.
pub struct Context<H> {
    pub client: Client,
    pub handler: H,
    pub settings: ReconcileSettings,
}

impl<H> Context<H> {
    pub fn new(client: Client, handler: H, settings: ReconcileSettings) -> Self {
        Self {
            client,
            handler,
            settings,
        }
    }
}
