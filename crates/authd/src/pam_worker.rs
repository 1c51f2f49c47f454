//! Serialized PAM authentication.
//!
//! PAM is not thread-safe, so a single dedicated worker thread owns every
//! conversation; async callers queue requests and await the reply. The
//! password travels inside [`Zeroizing`] and is wiped when the request is
//! dropped in the worker.

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::warn;
use zeroize::Zeroizing;

use protocol::limits::PAM_TIMEOUT;

use crate::error::AuthdError;

/// PAM service name registered under `/etc/pam.d/`.
pub const PAM_SERVICE: &str = "linuxio";

/// A credential verifier the worker drains requests through.
///
/// Production uses [`PamCheck`]; tests substitute a stub.
pub trait CredentialCheck: Send + 'static {
    /// Verifies `password` for `user`, returning a rendered failure reason.
    fn verify(&mut self, user: &str, password: &str) -> Result<(), String>;
}

/// The production PAM-backed verifier.
pub struct PamCheck {
    service: String,
}

impl PamCheck {
    /// Builds a verifier for the given PAM service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl CredentialCheck for PamCheck {
    fn verify(&mut self, user: &str, password: &str) -> Result<(), String> {
        let mut authenticator =
            pam::Authenticator::with_password(&self.service).map_err(|err| err.to_string())?;
        authenticator
            .get_handler()
            .set_credentials(user, password);
        authenticator.authenticate().map_err(|err| err.to_string())
    }
}

struct VerifyRequest {
    user: String,
    password: Zeroizing<String>,
    reply: oneshot::Sender<Result<(), String>>,
}

/// Handle to the single PAM worker thread.
#[derive(Clone)]
pub struct PamWorker {
    tx: mpsc::Sender<VerifyRequest>,
}

impl PamWorker {
    /// Spawns the worker thread around a verifier.
    pub fn spawn(mut check: impl CredentialCheck) -> Self {
        let (tx, mut rx) = mpsc::channel::<VerifyRequest>(16);
        let spawned = std::thread::Builder::new()
            .name("pam-worker".to_owned())
            .spawn(move || {
                while let Some(request) = rx.blocking_recv() {
                    let result = check.verify(&request.user, &request.password);
                    let _ = request.reply.send(result);
                }
            });
        if let Err(err) = spawned {
            warn!(%err, "failed to spawn pam worker thread");
        }
        Self { tx }
    }

    /// Queues one verification and awaits the outcome.
    pub async fn verify(
        &self,
        user: &str,
        password: Zeroizing<String>,
    ) -> Result<(), AuthdError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VerifyRequest {
                user: user.to_owned(),
                password,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AuthdError::PamWorkerGone)?;

        match timeout(PAM_TIMEOUT, reply_rx).await {
            Err(_) => Err(AuthdError::Pam("authentication timed out".to_owned())),
            Ok(Err(_)) => Err(AuthdError::PamWorkerGone),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(AuthdError::Pam(reason)),
        }
    }
}
