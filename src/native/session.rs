//! Scoped ownership of the native handle currently being read.

use std::fmt;
use std::time::Duration;

use super::NativeEventSource;
use crate::types::Result;

/// Holds at most one native handle for the duration of a dispatch call.
///
/// `fetch` polls the next handle before releasing the previous one, so
/// accessor reads against the current handle stay valid for the whole
/// iteration. The last handle is released by `close` or on drop, which covers
/// early returns and a dropped dispatch future.
pub struct PollSession<'a, S: NativeEventSource> {
    source: &'a S,
    held: Option<S::Event>,
}

impl<'a, S: NativeEventSource> PollSession<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source, held: None }
    }

    /// Poll the next handle, then release the one previously held.
    ///
    /// On error the previous handle stays held until the session ends.
    pub async fn fetch(&mut self, timeout: Duration) -> Result<Option<&S::Event>> {
        let next = self.source.poll_next(timeout).await?;
        self.release_held();
        self.held = next;
        Ok(self.held.as_ref())
    }

    /// End the session, releasing the held handle.
    pub fn close(mut self) {
        self.release_held();
    }

    fn release_held(&mut self) {
        if let Some(event) = self.held.take() {
            self.source.release(event);
        }
    }
}

impl<S: NativeEventSource> Drop for PollSession<'_, S> {
    fn drop(&mut self) {
        self.release_held();
    }
}

impl<S: NativeEventSource> fmt::Debug for PollSession<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollSession")
            .field("holding", &self.held.is_some())
            .finish()
    }
}
