use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Serves the shared cleartext password to the pgwire startup handshake.
/// Identity is carried by the startup `user` parameter, not the password;
/// the password only gates access to the server as a whole.
#[derive(Debug)]
pub struct StaydAuthSource {
    password: String,
}

impl StaydAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaydAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
