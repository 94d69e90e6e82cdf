use std::sync::Arc;

use crate::label::LabelRenderer;
use crate::session::SessionStore;
use crate::settings::Settings;

pub(crate) struct ServerState {
    pub(crate) settings: Settings,
    pub(crate) sessions: SessionStore,
    pub(crate) labels: Arc<LabelRenderer>,
}

impl ServerState {
    pub(crate) fn new(settings: Settings) -> Self {
        let sessions = SessionStore::new(settings.history_limit);
        let labels = Arc::new(LabelRenderer::new(settings.label.clone()));
        Self {
            settings,
            sessions,
            labels,
        }
    }
}
