use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 凭证校验通过后绑定到连接上的身份，在连接生命周期内不变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

impl Identity {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}
