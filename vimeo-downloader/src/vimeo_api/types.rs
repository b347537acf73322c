//! Shared types and streaming infrastructure for the Vimeo API client.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

/// A raw response from the Vimeo API.
///
/// The body is kept as an untyped JSON tree since the shape of Vimeo's responses depends on the
/// endpoint, the `fields` filter, and the permissions of the authenticated user.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: http::StatusCode,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == http::StatusCode::OK
    }
}

type OneFuturePage<'a, F, T> =
    Pin<Box<dyn Future<Output = eyre::Result<(F, (VecDeque<T>, Option<String>))>> + 'a + Send>>;

/// A paginated stream that automatically fetches subsequent pages from a Vimeo API list endpoint.
///
/// The fetcher is called with `None` for the first page and with the `paging.next` cursor of the
/// previous page after that. Only supports forward pagination.
pub struct PagedStream<'a, T, F> {
    /// Current batch of items from the most recent API response
    current_items: VecDeque<T>,
    /// Future representing the currently pending API request, if any
    pending_request: Option<OneFuturePage<'a, F, T>>,
    /// Whether we've reached the end of all available data
    is_done: bool,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    /// Create a new PagedStream that starts by fetching the first page.
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(Option<String>) -> Fut,
        F: Send + 'a,
        Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
    {
        let first_page = async move {
            let results = fetcher(None).await?;
            Ok((fetcher, results))
        };
        Self {
            pending_request: Some(Box::pin(first_page)),
            current_items: VecDeque::new(),
            is_done: false,
        }
    }
}

impl<'a, T: Unpin, F> Unpin for PagedStream<'a, T, F> {}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(Option<String>) -> Fut,
    F: Send + 'a,
    Fut: Future<Output = eyre::Result<(VecDeque<T>, Option<String>)>> + Send + 'a,
{
    type Item = eyre::Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current_items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if self.is_done {
                return Poll::Ready(None);
            }

            let Some(pending) = self.pending_request.as_mut() else {
                self.is_done = true;
                return Poll::Ready(None);
            };

            match pending.as_mut().poll(cx) {
                Poll::Ready(Ok((fetcher, (items, next_cursor)))) => {
                    self.current_items.extend(items);

                    if let Some(next_cursor) = next_cursor {
                        // set up the next page, but only poll it once this one is drained
                        self.pending_request = Some(Box::pin(async move {
                            let results = fetcher(Some(next_cursor)).await?;
                            Ok((fetcher, results))
                        }));
                    } else {
                        self.is_done = true;
                        self.pending_request = None;
                    }
                }
                Poll::Ready(Err(e)) => {
                    self.pending_request = None;
                    self.is_done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn follows_cursors_until_exhausted() {
        let pages = PagedStream::new(|cursor: Option<String>| async move {
            Ok(match cursor.as_deref() {
                None => (VecDeque::from([1, 2]), Some("p2".to_string())),
                Some("p2") => (VecDeque::new(), Some("p3".to_string())),
                Some("p3") => (VecDeque::from([3]), None),
                Some(other) => eyre::bail!("unexpected cursor {other}"),
            })
        });
        let items: Vec<u32> = pages.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn yields_errors_then_ends() {
        let pages = PagedStream::new(|cursor: Option<String>| async move {
            match cursor {
                None => Ok((VecDeque::from(["a"]), Some("next".to_string()))),
                Some(_) => Err(eyre::eyre!("page two broke")),
            }
        });
        let mut pages = std::pin::pin!(pages);
        assert_eq!(pages.next().await.unwrap().unwrap(), "a");
        assert!(pages.next().await.unwrap().is_err());
        assert!(pages.next().await.is_none());
    }
}
