//! Async adaptation of the synchronous split handler.
//!
//! [`split_events`] drives one [`SplitStreamHandler`] over an async chunk
//! stream and yields the resulting events as a stream of their own. The
//! handler itself never suspends; cancellation belongs to the caller and
//! simply stops the iteration.

use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::delta::StreamChunk;
use crate::events::StepEvent;
use crate::split::{SplitOptions, SplitStreamHandler};

/// Split an async chunk stream into an async event stream.
///
/// # Example
///
/// ```rust
/// use convoy_stream::{split_events, SplitOptions, StreamChunk};
/// use futures::{stream, StreamExt};
///
/// # futures::executor::block_on(async {
/// let chunks = stream::iter(vec![StreamChunk::text("Hello "), StreamChunk::text("world")]);
/// let events: Vec<_> = split_events(chunks, SplitOptions::new()).collect().await;
/// assert!(!events.is_empty());
/// # });
/// ```
pub fn split_events<S>(chunks: S, options: SplitOptions) -> impl Stream<Item = StepEvent>
where
    S: Stream<Item = StreamChunk>,
{
    stream! {
        let mut handler = SplitStreamHandler::new(options);
        let mut buffer: Vec<StepEvent> = Vec::new();
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            handler.handle(&chunk, &mut buffer);
            for event in buffer.drain(..) {
                yield event;
            }
        }
    }
}
