use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::ProgressFn;

pin_project! {
    /// 统计已发送字节数并回调进度的请求体
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        loaded: u64,
        total: u64,
        on_progress: ProgressFn,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total: u64, on_progress: ProgressFn) -> Self {
        Self {
            inner,
            loaded: 0,
            total,
            on_progress,
        }
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.loaded += chunk.len() as u64;
                    (this.on_progress)(*this.loaded, *this.total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
