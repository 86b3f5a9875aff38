//! Filtered views over the message broadcast

use crate::error::FramingError;
use crate::protocol::EslMessage;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, warn};

/// Item carried by a connection's message broadcast.
pub(crate) type MessageItem = Result<Arc<EslMessage>, FramingError>;

type Selector<T> = Box<dyn Fn(&Arc<EslMessage>) -> Option<T> + Send + Sync>;

/// A live, filtered subscription to a connection's messages.
///
/// Only messages broadcast after the subscription was created are seen. `recv`
/// returns `None` once the connection is gone, after a framing error, or after
/// [`close`](Self::close). Dropping the handle unsubscribes.
pub struct Subscription<T> {
    rx: Option<broadcast::Receiver<MessageItem>>,
    select: Selector<T>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("open", &self.rx.is_some())
            .finish()
    }
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new(
        rx: Option<broadcast::Receiver<MessageItem>>,
        select: impl Fn(&Arc<EslMessage>) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            select: Box::new(select),
        }
    }

    /// Next matching item.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let rx = self
                .rx
                .as_mut()?;
            match rx
                .recv()
                .await
            {
                Ok(Ok(message)) => {
                    if let Some(item) = (self.select)(&message) {
                        return Some(item);
                    }
                }
                Ok(Err(e)) => {
                    error!("Message stream ended: {}", e);
                    self.rx = None;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Subscriber lagged, {} messages lost", missed);
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                }
            }
        }
    }

    /// Keep only items matching `predicate`.
    pub fn filter(self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let select = self.select;
        Self {
            rx: self.rx,
            select: Box::new(move |message| select(message).filter(|item| predicate(item))),
        }
    }

    /// Transform items, dropping those mapped to `None`.
    pub fn filter_map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> Option<U> + Send + Sync + 'static,
    ) -> Subscription<U> {
        let select = self.select;
        Subscription {
            rx: self.rx,
            select: Box::new(move |message| select(message).and_then(&f)),
        }
    }

    /// Stop receiving. Later `recv` calls return `None`. Idempotent.
    pub fn close(&mut self) {
        self.rx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.rx
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;
    use crate::protocol::ContentType;

    fn message(content_type: &str) -> MessageItem {
        let headers: HeaderMap = [("Content-Type", content_type)]
            .into_iter()
            .collect();
        Ok(Arc::new(EslMessage::new(headers, None)))
    }

    #[tokio::test]
    async fn filter_applies_at_subscription_time() {
        let (tx, rx) = broadcast::channel(8);
        let mut replies = Subscription::new(Some(rx), |m: &Arc<EslMessage>| Some(m.clone()))
            .filter(|m| m.content_type() == &ContentType::CommandReply);
        tx.send(message("api/response"))
            .unwrap();
        tx.send(message("command/reply"))
            .unwrap();
        let got = replies
            .recv()
            .await
            .unwrap();
        assert_eq!(got.content_type(), &ContentType::CommandReply);
    }

    #[tokio::test]
    async fn framing_error_ends_subscription() {
        let (tx, rx) = broadcast::channel(8);
        let mut all = Subscription::new(Some(rx), |m: &Arc<EslMessage>| Some(m.clone()));
        tx.send(Err(FramingError::Truncated {
            expected: 4,
            received: 1,
        }))
        .unwrap();
        assert!(all
            .recv()
            .await
            .is_none());
        assert!(all.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_tx, rx) = broadcast::channel::<MessageItem>(8);
        let mut all = Subscription::new(Some(rx), |m: &Arc<EslMessage>| Some(m.clone()));
        all.close();
        all.close();
        assert!(all
            .recv()
            .await
            .is_none());
    }
}
