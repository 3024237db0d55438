use tokio::sync::oneshot;

use crate::{Error, ErrorKind, Result, WaiterCleaner, msg::Response};

/// Response slot of one pending call.
pub struct Receiver<'a> {
    rx: oneshot::Receiver<Result<Response>>,
    _cleaner: WaiterCleaner<'a>,
}

impl<'a> Receiver<'a> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Response>>, cleaner: WaiterCleaner<'a>) -> Self {
        Self {
            rx,
            _cleaner: cleaner,
        }
    }

    /// # Errors
    ///
    /// Returns the error the call was failed with, or `ConnectionClosed` if
    /// the slot was dropped without an answer.
    pub async fn recv(self) -> Result<Response> {
        self.rx
            .await
            .map_err(|e| Error::new(ErrorKind::ConnectionClosed, e.to_string()))?
    }
}
