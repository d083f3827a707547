//! RFC 4616 `PLAIN`: a single message of `authzid NUL authcid NUL passwd`.

use async_trait::async_trait;

use crate::backend::{Backend, Credentials};
use crate::error::AuthError;

use super::{SaslMechanism, SaslStep};

#[derive(Default)]
pub(super) struct PlainMechanism {
    done: bool,
}

#[async_trait]
impl<B: Backend> SaslMechanism<B> for PlainMechanism {
    async fn step(
        &mut self,
        backend: &B,
        response: Option<&[u8]>,
    ) -> Result<SaslStep<B::User>, AuthError> {
        if self.done {
            return Err(AuthError::new("PLAIN exchange already completed"));
        }

        let Some(response) = response else {
            // No initial response was given on the AUTH line; prompt for one
            // with an empty challenge.
            self.done = false;
            return Ok(SaslStep::Challenge(Vec::new()));
        };

        self.done = true;

        let mut parts = response.splitn(3, |&b| b == 0);
        let authzid = parts.next().unwrap_or(b"");
        let authcid = parts
            .next()
            .ok_or_else(|| AuthError::new("malformed PLAIN response"))?;
        let password = parts
            .next()
            .ok_or_else(|| AuthError::new("malformed PLAIN response"))?;

        let authorization_id =
            std::str::from_utf8(authzid).map_err(|_| AuthError::new("PLAIN response is not valid UTF-8"))?;
        let authentication_id =
            std::str::from_utf8(authcid).map_err(|_| AuthError::new("PLAIN response is not valid UTF-8"))?;
        let password =
            std::str::from_utf8(password).map_err(|_| AuthError::new("PLAIN response is not valid UTF-8"))?;

        let user = backend
            .login(
                "PLAIN",
                Credentials::Plain {
                    authorization_id,
                    authentication_id,
                    password,
                },
            )
            .await?;

        Ok(SaslStep::Done(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;

    struct AcceptAllBackend;

    #[derive(Debug)]
    struct PlainTestUser;

    #[async_trait]
    impl Backend for AcceptAllBackend {
        type User = PlainTestUser;

        async fn login(&self, _mechanism: &str, _credentials: Credentials<'_>) -> Result<PlainTestUser, AuthError> {
            Ok(PlainTestUser)
        }
    }

    #[async_trait]
    impl crate::backend::User for PlainTestUser {
        async fn send(&self, _message: crate::backend::Message<'_>) -> Result<(), DeliveryError> {
            Ok(())
        }
        async fn logout(&self) {}
    }

    #[tokio::test]
    async fn parses_authzid_authcid_password() {
        let backend = AcceptAllBackend;
        let mut mech = PlainMechanism::default();
        let response = b"\0user\0pass";
        let step = mech.step(&backend, Some(response)).await.unwrap();
        assert!(matches!(step, SaslStep::Done(PlainTestUser)));
    }

    #[tokio::test]
    async fn no_initial_response_prompts_empty_challenge() {
        let backend = AcceptAllBackend;
        let mut mech = PlainMechanism::default();
        let step = mech.step(&backend, None).await.unwrap();
        match step {
            SaslStep::Challenge(bytes) => assert!(bytes.is_empty()),
            SaslStep::Done(_) => panic!("expected a challenge"),
        }
    }

    #[tokio::test]
    async fn malformed_response_is_auth_error() {
        let backend = AcceptAllBackend;
        let mut mech = PlainMechanism::default();
        let err = mech.step(&backend, Some(b"no-nuls-here")).await.unwrap_err();
        assert!(err.0.contains("malformed"));
    }
}
