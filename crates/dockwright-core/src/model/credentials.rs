//! レジストリ認証情報

use serde::{Deserialize, Serialize};
use std::fmt;

/// ユーザー名とパスワードによるレジストリ認証
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPasswordAuth {
    pub username: String,
    pub password: String,
}

impl UserPasswordAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// パスワードをログに出さない
impl fmt::Debug for UserPasswordAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPasswordAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let auth = UserPasswordAuth::new("user", "s3cret");
        let debug = format!("{:?}", auth);
        assert!(debug.contains("user"));
        assert!(!debug.contains("s3cret"));
    }
}
