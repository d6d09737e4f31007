//! Network exchange
//!
//! A [`Transport`] performs one signed HTTP exchange and hands back the
//! status, request id and an unread body stream. It does not interpret the
//! status; the dispatcher decodes success and error bodies alike.
//!
//! The body must stop yielding data once the exchange's cancellation token
//! fires, and release the underlying connection at that point.

use crate::config::AwsClientConfig;
use crate::decoder::RawResponse;
use crate::error::{AwsError, Result};
use crate::service::ServiceTarget;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use std::io;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;

const REQUEST_ID_HEADERS: [&str; 3] = ["x-amzn-requestid", "x-amz-request-id", "x-amzn-request-id"];

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        target: &ServiceTarget,
        request: http::Request<String>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse>;
}

/// Ends `stream` with an error as soon as `cancel` fires. The inner stream
/// is dropped before that error is yielded.
pub fn cancellable<S, B>(stream: S, cancel: CancellationToken) -> impl Stream<Item = io::Result<B>> + Send
where
    S: Stream<Item = io::Result<B>> + Send + Unpin,
    B: Send,
{
    futures_util::stream::unfold(Some((stream, cancel)), |state| async move {
        let (mut stream, cancel) = state?;
        tokio::select! {
            _ = cancel.cancelled() => {
                drop(stream);
                Some((Err(io::Error::other("response body cancelled")), None))
            }
            item = stream.next() => item.map(|item| (item, Some((stream, cancel)))),
        }
    })
}

/// reqwest-backed transport. One instance per cached (family, region)
/// client; connection pooling lives inside it.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &AwsClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("skyport/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        target: &ServiceTarget,
        request: http::Request<String>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        let request = reqwest::Request::try_from(request)?;
        tracing::debug!(
            "[{}] {} {}",
            target.service_name,
            request.method(),
            request.url()
        );

        let response = self.client.execute(request).await?;
        let status = response.status().as_u16();
        let request_id = REQUEST_ID_HEADERS
            .iter()
            .find_map(|name| response.headers().get(*name))
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));
        let stream = cancellable(stream, cancel.clone());
        let body = SyncIoBridge::new(StreamReader::new(Box::pin(stream)));
        Ok(RawResponse::new(status, request_id, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};

    /// Yields one chunk, then never again
    struct Stalled {
        first: Option<&'static [u8]>,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for Stalled {
        type Item = io::Result<&'static [u8]>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.first.take() {
                Some(chunk) => Poll::Ready(Some(Ok(chunk))),
                None => Poll::Pending,
            }
        }
    }

    impl Drop for Stalled {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_stalled_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let body = Stalled {
            first: Some(&b"<DescribeRegionsResponse>"[..]),
            dropped: dropped.clone(),
        };
        let mut stream = Box::pin(cancellable(body, cancel.clone()));

        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        assert!(stream.next().await.unwrap().is_err());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_uncancelled_stream_passes_through() {
        let chunks: Vec<io::Result<&'static [u8]>> = vec![Ok(&b"a"[..]), Ok(&b"b"[..])];
        let stream = cancellable(futures_util::stream::iter(chunks), CancellationToken::new());
        let collected: Vec<&[u8]> = stream.try_collect().await.unwrap();
        assert_eq!(collected, vec![&b"a"[..], &b"b"[..]]);
    }
}
