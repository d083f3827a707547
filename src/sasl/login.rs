//! `LOGIN`: a non-standard but widely deployed two-step exchange — a
//! `Username:` challenge, then a `Password:` challenge, each answered with a
//! base64-encoded value.

use async_trait::async_trait;

use crate::backend::{Backend, Credentials};
use crate::error::AuthError;

use super::{SaslMechanism, SaslStep};

enum LoginState {
    AwaitingUsername,
    AwaitingPassword(String),
    Done,
}

pub(super) struct LoginMechanism {
    state: LoginState,
}

impl Default for LoginMechanism {
    fn default() -> Self {
        Self {
            state: LoginState::AwaitingUsername,
        }
    }
}

#[async_trait]
impl<B: Backend> SaslMechanism<B> for LoginMechanism {
    async fn step(
        &mut self,
        backend: &B,
        response: Option<&[u8]>,
    ) -> Result<SaslStep<B::User>, AuthError> {
        match std::mem::replace(&mut self.state, LoginState::Done) {
            LoginState::AwaitingUsername => {
                let Some(response) = response else {
                    self.state = LoginState::AwaitingUsername;
                    return Ok(SaslStep::Challenge(b"Username:".to_vec()));
                };
                let username = std::str::from_utf8(response)
                    .map_err(|_| AuthError::new("LOGIN username is not valid UTF-8"))?
                    .to_string();
                self.state = LoginState::AwaitingPassword(username);
                Ok(SaslStep::Challenge(b"Password:".to_vec()))
            }
            LoginState::AwaitingPassword(username) => {
                let response = response.ok_or_else(|| AuthError::new("expected a password response"))?;
                let password = std::str::from_utf8(response)
                    .map_err(|_| AuthError::new("LOGIN password is not valid UTF-8"))?;
                let user = backend
                    .login(
                        "LOGIN",
                        Credentials::Login {
                            username: &username,
                            password,
                        },
                    )
                    .await?;
                Ok(SaslStep::Done(user))
            }
            LoginState::Done => Err(AuthError::new("LOGIN exchange already completed")),
        }
    }
}
