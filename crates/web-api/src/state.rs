use std::sync::Arc;

use application::{RealtimeGateway, DEFAULT_COOKIE_NAME};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RealtimeGateway>,
    /// 携带访问令牌的 cookie 名
    pub cookie_name: Arc<str>,
}

impl AppState {
    pub fn new(gateway: Arc<RealtimeGateway>) -> Self {
        Self {
            gateway,
            cookie_name: Arc::from(DEFAULT_COOKIE_NAME),
        }
    }

    pub fn with_cookie_name(mut self, cookie_name: impl Into<Arc<str>>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }
}
